//! Environment overlays passed to remote commands.
//!
//! Values are transmitted verbatim. [`EnvOverlay::masked`] exists only for
//! human-facing output: it hides values whose key contains `token`, `secret`,
//! `key` or `password` (case-insensitive). That is a naming heuristic, not a
//! redaction guarantee; a credential stored under an innocuous key is printed.

use std::fmt::Write as _;

use super::sh_quote;

pub const MASK: &str = "***";

const SENSITIVE_KEY_PARTS: [&str; 4] = ["token", "secret", "key", "password"];

pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEY_PARTS.iter().any(|part| lower.contains(part))
}

/// Ordered `KEY=value` assignments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverlay {
    vars: Vec<(String, String)>,
}

impl EnvOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable, replacing an earlier value for the same key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.vars.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.vars.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copy for display with sensitive values replaced by `***`.
    pub fn masked(&self) -> Vec<(String, String)> {
        self.vars
            .iter()
            .map(|(k, v)| {
                let shown = if is_sensitive_key(k) && !v.is_empty() {
                    MASK.to_string()
                } else {
                    v.clone()
                };
                (k.clone(), shown)
            })
            .collect()
    }

    /// `KEY='value' ` assignments suitable for prefixing a POSIX command.
    pub fn to_shell_prefix(&self) -> anyhow::Result<String> {
        let mut prefix = String::new();
        for (key, value) in &self.vars {
            anyhow::ensure!(
                !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
                "Invalid environment variable name: {key:?}"
            );
            let _ = write!(prefix, "{key}={} ", sh_quote(value)?);
        }
        Ok(prefix)
    }

    /// Same as [`Self::to_shell_prefix`] but with sensitive values masked.
    pub fn to_masked_prefix(&self) -> String {
        self.masked()
            .into_iter()
            .map(|(k, v)| format!("{k}={v} "))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvOverlay {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut overlay = EnvOverlay::new();
        for (k, v) in iter {
            overlay.set(k, v);
        }
        overlay
    }
}
