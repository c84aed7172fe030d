//! Glob filtering of downloaded trees.
//!
//! A pattern without `/` matches file basenames anywhere in the tree; a
//! pattern with `/` matches the path relative to the download root. These are
//! the same semantics the rsync include rules get, so pruning after an scp
//! download leaves the tree rsync would have produced.

use std::path::{Component, Path};

use anyhow::Context;
use globset::{GlobBuilder, GlobMatcher};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct GlobFilter {
    pattern: String,
    matcher: GlobMatcher,
    match_basename: bool,
}

impl GlobFilter {
    pub fn new(pattern: &str) -> anyhow::Result<Self> {
        let trimmed = pattern.trim().trim_start_matches('/');
        if trimmed.is_empty() {
            anyhow::bail!("download glob cannot be empty");
        }
        let match_basename = !trimmed.contains('/');
        let mut builder = GlobBuilder::new(trimmed);
        builder.literal_separator(true);
        let matcher = builder
            .build()
            .with_context(|| format!("invalid download glob '{pattern}'"))?
            .compile_matcher();
        Ok(Self {
            pattern: trimmed.to_string(),
            matcher,
            match_basename,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Match a `/`-separated path relative to the download root.
    pub fn matches(&self, rel_path: &str) -> bool {
        if self.match_basename {
            let basename = rel_path.rsplit('/').next().unwrap_or(rel_path);
            self.matcher.is_match(basename)
        } else {
            self.matcher.is_match(rel_path)
        }
    }
}

/// Convert a relative path to a forward-slash string for glob matching.
pub fn rel_path_to_slash(path: &Path) -> String {
    let mut out = String::new();
    for comp in path.components() {
        if let Component::Normal(os) = comp {
            if !out.is_empty() {
                out.push('/');
            }
            out.push_str(&os.to_string_lossy());
        }
    }
    out
}

/// Delete files under `root` that do not match `filter`, except those named
/// in `keep`, then remove directories left empty. Returns the number of files
/// removed.
pub fn prune_to_glob(root: &Path, filter: &GlobFilter, keep: &[&str]) -> anyhow::Result<usize> {
    let mut removed = 0;
    let mut dirs = Vec::new();

    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = match entry {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("encountered error when enumerating downloaded files: {:?}", e);
                continue;
            }
        };
        if entry.file_type().is_dir() {
            dirs.push(entry.path().to_path_buf());
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel = rel_path_to_slash(rel);
        if keep.contains(&rel.as_str()) || filter.matches(&rel) {
            continue;
        }
        std::fs::remove_file(entry.path())
            .with_context(|| format!("Failed to remove {}", entry.path().display()))?;
        removed += 1;
    }

    // Deepest first so parents empty out after their children.
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
    for dir in dirs {
        let is_empty = std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?
            .next()
            .is_none();
        if is_empty {
            std::fs::remove_dir(&dir)
                .with_context(|| format!("Failed to remove {}", dir.display()))?;
        }
    }

    tracing::debug!(root = %root.display(), pattern = filter.pattern(), removed, "pruned download to glob");
    Ok(removed)
}
