//! Ferry Core Library
//!
//! Drives the lifecycle of a job on a single remote instance: bootstrap,
//! repository deployment, input upload, detached job control, result
//! download with manifest verification, and remote housekeeping.

pub mod bootstrap;
pub mod config;
pub mod context;
pub mod deploy;
pub mod error;
pub mod housekeeping;
pub mod inventory;
pub mod remote;
pub mod session;
pub mod state;
pub mod transfer;
pub mod transport;

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::{ConfigStore, FerryConfig};
    pub use crate::context::AppContext;
    pub use crate::error::{FerryError, find_ferry_error};

    // Instance selection
    pub use crate::inventory::{InstanceSummary, InventoryClient};
    pub use crate::state::{InstanceRef, InstanceStateStore, StateLoad};

    // Remote execution
    pub use crate::remote::{CancelToken, EnvOverlay, RemoteShell, SshShell, StreamOutcome};
    pub use crate::transport::{FileTransport, TransportSelector, TransportStrategy};

    // Stages
    pub use crate::bootstrap::{BootstrapOrchestrator, BootstrapReport, HealthReport};
    pub use crate::deploy::{DeployReport, DeployRequest, RepoDeploymentPipeline};
    pub use crate::housekeeping::{CleanupPlan, HousekeepingManager};
    pub use crate::session::{JobLaunch, JobSessionController, StartMode};
    pub use crate::transfer::{RetryPolicy, TransferEngine, TransferReport};
}
