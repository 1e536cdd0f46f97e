//! Harvester engine: rate-limited I/O around the pure harvester core.
mod address;
mod clock;
mod config;
mod control_plane;
mod error;
mod harvest;
mod lease;
mod persist;
mod progress;
mod rate_limit;
mod worker;

pub use address::{AddressLookup, AddressLookupSettings, ReqwestAddressLookup};
pub use clock::now;
pub use config::{BudgetSettings, HarvestConfig, LoopSettings, PacingSettings, RotationSettings};
pub use control_plane::{
    ControlPlane, ControlPlaneError, ControlPlaneFailure, ControlPlaneSettings, ProxyEndpoint,
    ReqwestControlPlane,
};
pub use error::{ConfigError, HarvestError};
pub use harvest::{HarvestLoop, RunReport};
pub use lease::{IdentityLeaseManager, LeaseError, NetworkIdentity};
pub use persist::{ensure_output_dir, AtomicFileWriter, PersistError};
pub use progress::{OutputRecord, ProgressError, ProgressStore, ResumeMode, StoreSettings};
pub use rate_limit::{EndpointClass, RateLimiter};
pub use worker::{HttpWorker, TargetSettings, Worker};
