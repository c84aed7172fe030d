//! Local result directory layout: `<root>/<label-or-id>/<YYYYMMDD-HHMMSS>/`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};

use crate::state::InstanceRef;

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Directory name for an instance: its label when set, else its id, with
/// path-hostile characters replaced by `_`.
pub fn instance_dir_name(instance: &InstanceRef) -> String {
    let name: String = instance
        .display_name()
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match name.trim_matches('.') {
        "" => "instance".to_string(),
        _ => name,
    }
}

/// Create a fresh run directory. A directory already taken in the same
/// second gets a `-1`, `-2`, ... suffix; an existing run is never reused.
pub fn results_dir(root: &Path, instance: &InstanceRef, now: DateTime<Utc>) -> anyhow::Result<PathBuf> {
    let parent = root.join(instance_dir_name(instance));
    std::fs::create_dir_all(&parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let stamp = now.format(TIMESTAMP_FORMAT).to_string();
    let mut suffix = 0u32;
    loop {
        let name = if suffix == 0 {
            stamp.clone()
        } else {
            format!("{stamp}-{suffix}")
        };
        let candidate = parent.join(name);
        match std::fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => suffix += 1,
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to create directory: {}", candidate.display()));
            }
        }
    }
}
