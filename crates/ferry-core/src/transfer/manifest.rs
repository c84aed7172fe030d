//! Remote-generated size manifests.
//!
//! One `<size_bytes>\t<relative_path>` line per remote file, written into the
//! remote directory before a download and compared against the local copy
//! afterwards. A completeness check, not an integrity check.

use std::path::Path;

use anyhow::Context;
use serde::Serialize;

use crate::remote::sh_quote;

use super::filter::GlobFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub size_bytes: u64,
    pub relative_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizeMismatch {
    pub path: String,
    pub expected: u64,
    pub actual: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct ManifestVerification {
    /// Entries checked after filtering.
    pub expected: usize,
    pub missing: Vec<String>,
    pub size_mismatch: Vec<SizeMismatch>,
}

impl ManifestVerification {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.size_mismatch.is_empty()
    }
}

impl Manifest {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let mut entries = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let (size, path) = line
                .split_once('\t')
                .with_context(|| format!("manifest line {} has no tab separator", idx + 1))?;
            let size_bytes = size
                .trim()
                .parse::<u64>()
                .with_context(|| format!("manifest line {} has invalid size {:?}", idx + 1, size))?;
            let relative_path = path.trim_start_matches("./").to_string();
            if relative_path.is_empty() {
                anyhow::bail!("manifest line {} has an empty path", idx + 1);
            }
            entries.push(ManifestEntry {
                size_bytes,
                relative_path,
            });
        }
        Ok(Self { entries })
    }

    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Failed to parse manifest: {}", path.display()))
    }

    /// Compare against files under `local_root`. With a filter, only matching
    /// entries are expected locally.
    pub fn verify(&self, local_root: &Path, filter: Option<&GlobFilter>) -> ManifestVerification {
        let mut report = ManifestVerification::default();
        for entry in &self.entries {
            if let Some(filter) = filter
                && !filter.matches(&entry.relative_path)
            {
                continue;
            }
            report.expected += 1;
            match std::fs::metadata(local_root.join(&entry.relative_path)) {
                Ok(meta) if meta.is_file() => {
                    if meta.len() != entry.size_bytes {
                        report.size_mismatch.push(SizeMismatch {
                            path: entry.relative_path.clone(),
                            expected: entry.size_bytes,
                            actual: meta.len(),
                        });
                    }
                }
                _ => report.missing.push(entry.relative_path.clone()),
            }
        }
        report
    }
}

/// Remote script that writes the manifest of `remote_dir` into
/// `<remote_dir>/<manifest_name>`, excluding the manifest itself.
pub fn generate_script(remote_dir: &str, manifest_name: &str) -> anyhow::Result<String> {
    let dir = sh_quote(remote_dir)?;
    let exclude_path = format!("./{manifest_name}");
    let exclude = sh_quote(&exclude_path)?;
    let name = sh_quote(manifest_name)?;
    Ok(format!(
        r#"set -e
cd {dir}
tmp="$(mktemp)"
find . -type f ! -path {exclude} -printf '%s\t%P\n' > "$tmp"
mv "$tmp" {name}
chmod 644 {name}
wc -l < {name}
"#
    ))
}
