//! Config path resolution helpers.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "ferry.toml";

/// Environment variable naming a config file; loses to `--config`.
pub const CONFIG_ENV: &str = "FERRY_CONFIG";

/// Pick the config override: the explicit path, else a non-empty
/// `FERRY_CONFIG` value.
pub fn config_override(explicit: Option<&Path>, env_value: Option<OsString>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    env_value.filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// Resolve which config file to read.
///
/// Order: explicit path (see [`config_override`]), `./ferry.toml`,
/// `<global_dir>/ferry.toml`. When none exists the global location is
/// returned so that `load` yields defaults.
pub fn resolve_config_path(
    explicit: Option<&Path>,
    working_dir: &Path,
    global_dir: &Path,
) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let local = working_dir.join(CONFIG_FILE_NAME);
    if local.exists() {
        return local;
    }
    global_dir.join(CONFIG_FILE_NAME)
}

/// Expand a leading `~` against `home`.
pub fn expand_home(path: &Path, home: Option<&Path>) -> PathBuf {
    let Some(home) = home else {
        return path.to_path_buf();
    };
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// Default location of the instance record.
pub fn default_state_path() -> anyhow::Result<PathBuf> {
    let base = if cfg!(unix) {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .ok_or_else(|| anyhow::anyhow!("Cannot determine state directory"))?
    } else {
        dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot determine local app data directory"))?
    };
    Ok(base.join("ferry").join("instance.json"))
}
