//! Typed failure taxonomy shared by every stage.
//!
//! Stages return `anyhow::Result`; the variants below are attached to those
//! errors so frontends can downcast and pick an exit code and remediation hint.

use std::fmt;

use crate::deploy::DeployFailure;
use crate::transfer::Direction;

/// Exit code for an operator-interrupted log stream.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Exit code for a download that finished but did not match its manifest.
pub const EXIT_INCOMPLETE: i32 = 10;

#[derive(Debug, thiserror::Error)]
pub enum FerryError {
    #[error("no instance selected yet (missing {path}); select an instance first")]
    StateNotFound { path: String },

    #[error("instance record {path} is unreadable ({reason}); select the instance again")]
    StateCorrupt { path: String, reason: String },

    #[error("cannot reach {host}: {kind} ({detail})")]
    Connectivity {
        kind: ConnectivityKind,
        host: String,
        detail: String,
    },

    #[error("{direction} failed after {attempts} attempt(s): {detail}")]
    TransferExhausted {
        direction: Direction,
        attempts: u32,
        detail: String,
    },

    #[error("local directory {path} has no content to upload")]
    MissingContent { path: String },

    #[error("session '{session}' is already running; stop it or request a restart")]
    SessionAlreadyRunning { session: String },

    #[error("{0}")]
    Deploy(DeployFailure),

    #[error("bootstrap script aborted with exit code {exit_code}")]
    BootstrapAborted { exit_code: i32 },

    #[error("inventory API rejected the credential (HTTP {status}); check {credential_env}")]
    InventoryUnauthorized { status: u16, credential_env: String },

    #[error("inventory API kept rate-limiting after {attempts} attempt(s)")]
    InventoryRateLimited { attempts: u32 },

    #[error("inventory API returned HTTP {status}: {body}")]
    InventoryHttp { status: u16, body: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl FerryError {
    /// Process exit code for this failure category.
    pub fn exit_code(&self) -> i32 {
        match self {
            FerryError::StateNotFound { .. } | FerryError::StateCorrupt { .. } => 3,
            FerryError::Connectivity { .. } => 4,
            FerryError::TransferExhausted { .. } | FerryError::MissingContent { .. } => 5,
            FerryError::SessionAlreadyRunning { .. } => 6,
            FerryError::Deploy(_) => 7,
            FerryError::BootstrapAborted { .. } => 8,
            FerryError::InventoryUnauthorized { .. }
            | FerryError::InventoryRateLimited { .. }
            | FerryError::InventoryHttp { .. } => 9,
            FerryError::Config(_) => 2,
        }
    }

    /// Operator-facing remediation hint.
    pub fn hint(&self) -> Option<String> {
        match self {
            FerryError::StateNotFound { .. } | FerryError::StateCorrupt { .. } => {
                Some("run `ferry instances` then `ferry select <id>`".to_string())
            }
            FerryError::Connectivity { kind, .. } => Some(kind.hint().to_string()),
            FerryError::TransferExhausted { .. } => Some(
                "check network connectivity, free disk space on both ends, and write permissions on the target directory"
                    .to_string(),
            ),
            FerryError::SessionAlreadyRunning { .. } => {
                Some("use `ferry run --restart` or `ferry stop` first".to_string())
            }
            FerryError::Deploy(failure) => failure.hint(),
            FerryError::BootstrapAborted { .. } => Some(
                "inspect the script output above; the bootstrap is safe to re-run".to_string(),
            ),
            FerryError::InventoryUnauthorized { credential_env, .. } => Some(format!(
                "export a valid API key in {credential_env}"
            )),
            _ => None,
        }
    }
}

/// Connection-level failure kinds. These need operator action and are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityKind {
    PermissionDenied,
    HostKeyMismatch,
    UnknownHost,
    Unreachable,
}

impl ConnectivityKind {
    pub fn hint(self) -> &'static str {
        match self {
            ConnectivityKind::PermissionDenied => {
                "check ssh.user and ssh.keyfile, and that the public key is in ~/.ssh/authorized_keys on the instance"
            }
            ConnectivityKind::HostKeyMismatch => {
                "the host key changed; verify the instance and remove the stale entry with `ssh-keygen -R <host>`"
            }
            ConnectivityKind::UnknownHost => "check the instance address in the selected record",
            ConnectivityKind::Unreachable => {
                "check that the instance is running and that port 22 is reachable from this machine"
            }
        }
    }
}

impl fmt::Display for ConnectivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectivityKind::PermissionDenied => "permission denied",
            ConnectivityKind::HostKeyMismatch => "host key verification failed",
            ConnectivityKind::UnknownHost => "hostname could not be resolved",
            ConnectivityKind::Unreachable => "host unreachable",
        };
        f.write_str(text)
    }
}

/// Classify ssh/scp/rsync stderr into a connectivity failure, if it is one.
pub fn classify_connectivity(stderr: &str) -> Option<ConnectivityKind> {
    const PATTERNS: [(&str, ConnectivityKind); 8] = [
        ("Permission denied", ConnectivityKind::PermissionDenied),
        ("Host key verification failed", ConnectivityKind::HostKeyMismatch),
        (
            "REMOTE HOST IDENTIFICATION HAS CHANGED",
            ConnectivityKind::HostKeyMismatch,
        ),
        ("Could not resolve hostname", ConnectivityKind::UnknownHost),
        ("Connection refused", ConnectivityKind::Unreachable),
        ("No route to host", ConnectivityKind::Unreachable),
        ("Connection timed out", ConnectivityKind::Unreachable),
        ("Network is unreachable", ConnectivityKind::Unreachable),
    ];
    PATTERNS
        .iter()
        .find(|(needle, _)| stderr.contains(needle))
        .map(|(_, kind)| *kind)
}

/// Find the first typed failure in an error chain.
pub fn find_ferry_error(err: &anyhow::Error) -> Option<&FerryError> {
    err.chain().find_map(|cause| cause.downcast_ref::<FerryError>())
}
