//! Persistence of the single selected instance.
//!
//! The record is one JSON object, `{instance_id, primary_ip, label}`, replaced
//! atomically (tmp + rename) on every selection. Dependent stages call
//! [`InstanceStateStore::require`], which turns a missing or unreadable record
//! into a typed error instead of guessing defaults.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::FerryError;

/// The selected remote instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRef {
    #[serde(rename = "instance_id")]
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub primary_ip: String,
}

impl InstanceRef {
    pub fn new(id: impl Into<String>, label: impl Into<String>, primary_ip: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            primary_ip: primary_ip.into(),
        }
    }

    /// Label when set, otherwise the instance id.
    pub fn display_name(&self) -> &str {
        if self.label.trim().is_empty() {
            &self.id
        } else {
            &self.label
        }
    }
}

/// Outcome of reading the instance record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateLoad {
    Found(InstanceRef),
    NotFound,
    Corrupt { reason: String },
}

#[derive(Debug, Clone)]
pub struct InstanceStateStore {
    path: PathBuf,
}

impl InstanceStateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> StateLoad {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return StateLoad::NotFound,
            Err(err) => {
                return StateLoad::Corrupt {
                    reason: err.to_string(),
                };
            }
        };
        match serde_json::from_slice::<InstanceRef>(&bytes) {
            Ok(instance) if instance.primary_ip.trim().is_empty() => StateLoad::Corrupt {
                reason: "primary_ip is empty".to_string(),
            },
            Ok(instance) if instance.id.trim().is_empty() => StateLoad::Corrupt {
                reason: "instance_id is empty".to_string(),
            },
            Ok(instance) => StateLoad::Found(instance),
            Err(err) => StateLoad::Corrupt {
                reason: err.to_string(),
            },
        }
    }

    /// Load the record or fail with a directive to reselect.
    pub fn require(&self) -> anyhow::Result<InstanceRef> {
        match self.load() {
            StateLoad::Found(instance) => Ok(instance),
            StateLoad::NotFound => Err(FerryError::StateNotFound {
                path: self.path.display().to_string(),
            }
            .into()),
            StateLoad::Corrupt { reason } => Err(FerryError::StateCorrupt {
                path: self.path.display().to_string(),
                reason,
            }
            .into()),
        }
    }

    /// Replace the record atomically.
    pub fn save(&self, instance: &InstanceRef) -> anyhow::Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;

        let bytes =
            serde_json::to_vec_pretty(instance).context("Failed to serialize instance record")?;

        let tmp_path = dir.join(format!(".instance.{}.json.tmp", std::process::id()));
        fs::write(&tmp_path, bytes)
            .with_context(|| format!("Failed to write tmp record: {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path).with_context(|| {
            format!(
                "Failed to move {} into place at {}",
                tmp_path.display(),
                self.path.display()
            )
        })?;

        tracing::info!(
            instance = %instance.id,
            ip = %instance.primary_ip,
            path = %self.path.display(),
            "selected instance saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn display_name_falls_back_to_id() {
        let unlabeled = InstanceRef::new("cb676a46", "", "10.0.0.1");
        assert_eq!(unlabeled.display_name(), "cb676a46");
        let labeled = InstanceRef::new("cb676a46", "gpu-box", "10.0.0.1");
        assert_eq!(labeled.display_name(), "gpu-box");
    }

    #[test]
    fn record_uses_external_field_names() {
        let json = serde_json::to_value(InstanceRef::new("id-1", "lab", "1.2.3.4"))
            .expect("serialize should succeed");
        assert_eq!(json["instance_id"], "id-1");
        assert_eq!(json["primary_ip"], "1.2.3.4");
        assert_eq!(json["label"], "lab");
    }

    #[test]
    fn empty_ip_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("instance.json");
        fs::write(&path, r#"{"instance_id":"x","primary_ip":"","label":""}"#).unwrap();
        let store = InstanceStateStore::new(path);
        assert!(matches!(store.load(), StateLoad::Corrupt { .. }));
    }
}
