use harvester_core::BreakerTrip;
use thiserror::Error;

use crate::progress::ProgressError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("control-plane configuration unusable: {0}")]
    ControlPlane(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors that end a run.
///
/// Budget exhaustion and per-key worker failures are deliberately absent:
/// the former is a clean stop, the latter a classified outcome.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("circuit open after {0}")]
    CircuitOpen(BreakerTrip),
    #[error("vendor rejection: {0}")]
    VendorRejection(String),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Config(ConfigError),
}

impl From<ConfigError> for HarvestError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::ControlPlane(message) => HarvestError::VendorRejection(message),
            other => HarvestError::Config(other),
        }
    }
}
