use std::path::PathBuf;
use std::time::Duration;

use harvester_core::{BudgetLimits, RotationPolicy};
use serde::{Deserialize, Serialize};

use crate::address::AddressLookupSettings;
use crate::control_plane::ControlPlaneSettings;
use crate::progress::{ResumeMode, StoreSettings};
use crate::worker::TargetSettings;
use crate::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSettings {
    pub elapsed_limit_secs: u64,
    pub query_limit: u64,
    pub failure_limit: u32,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            // Leaves headroom under a 30 minute scheduler slot for the final
            // flush and release.
            elapsed_limit_secs: 28 * 60,
            query_limit: 5000,
            failure_limit: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationSettings {
    pub interval_secs: u64,
    pub max_queries: Option<u64>,
    pub failure_limit: u32,
    pub lease_ttl_secs: u64,
    pub rotate_on_rate_limit: bool,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            interval_secs: 5 * 60,
            max_queries: None,
            failure_limit: 3,
            lease_ttl_secs: 30 * 60,
            rotate_on_rate_limit: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingSettings {
    pub control_plane_min_interval_ms: u64,
    /// The vendor's published minimum spacing; the configured interval must
    /// stay strictly above it.
    pub control_plane_floor_ms: u64,
    pub target_min_interval_ms: u64,
    pub inter_item_delay_ms: u64,
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            control_plane_min_interval_ms: 35_000,
            control_plane_floor_ms: 30_000,
            target_min_interval_ms: 1_500,
            inter_item_delay_ms: 0,
        }
    }
}

/// Everything one run needs, as loaded from the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub budget: BudgetSettings,
    pub rotation: RotationSettings,
    pub pacing: PacingSettings,
    pub control_plane: ControlPlaneSettings,
    pub address_lookup: AddressLookupSettings,
    pub target: TargetSettings,
    pub store: StoreSettings,
}

impl HarvestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.budget.elapsed_limit_secs == 0 {
            return Err(ConfigError::invalid(
                "budget.elapsed_limit_secs",
                "must be greater than zero",
            ));
        }
        if self.budget.query_limit == 0 {
            return Err(ConfigError::invalid("budget.query_limit", "must be greater than zero"));
        }
        if self.budget.failure_limit == 0 {
            return Err(ConfigError::invalid("budget.failure_limit", "must be greater than zero"));
        }
        if self.rotation.interval_secs == 0 {
            return Err(ConfigError::invalid("rotation.interval_secs", "must be greater than zero"));
        }
        if self.rotation.max_queries == Some(0) {
            return Err(ConfigError::invalid(
                "rotation.max_queries",
                "must be greater than zero when set",
            ));
        }
        if self.rotation.failure_limit == 0 {
            return Err(ConfigError::invalid("rotation.failure_limit", "must be greater than zero"));
        }
        if self.rotation.lease_ttl_secs < self.rotation.interval_secs {
            return Err(ConfigError::invalid(
                "rotation.lease_ttl_secs",
                "must not be shorter than the rotation interval",
            ));
        }
        if self.pacing.control_plane_min_interval_ms <= self.pacing.control_plane_floor_ms {
            return Err(ConfigError::invalid(
                "pacing.control_plane_min_interval_ms",
                format!(
                    "{} ms must be strictly greater than the vendor floor of {} ms",
                    self.pacing.control_plane_min_interval_ms, self.pacing.control_plane_floor_ms
                ),
            ));
        }
        if self.address_lookup.urls.is_empty() {
            return Err(ConfigError::ControlPlane(
                "at least one address lookup url is required".to_string(),
            ));
        }
        self.control_plane.validate()?;
        self.target.validate()?;
        if self.store.output_path.file_name().is_none() {
            return Err(ConfigError::invalid("store.output_path", "must name a file"));
        }
        Ok(())
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            budget: BudgetLimits {
                elapsed_limit: Duration::from_secs(self.budget.elapsed_limit_secs),
                query_limit: self.budget.query_limit,
                failure_limit: self.budget.failure_limit,
            },
            rotation: RotationPolicy {
                interval: Duration::from_secs(self.rotation.interval_secs),
                max_queries: self.rotation.max_queries,
                failure_limit: self.rotation.failure_limit,
                lease_ttl: self.lease_ttl(),
                rotate_on_rate_limit: self.rotation.rotate_on_rate_limit,
            },
            control_plane_min_interval: Duration::from_millis(
                self.pacing.control_plane_min_interval_ms,
            ),
            target_min_interval: Duration::from_millis(self.pacing.target_min_interval_ms),
            inter_item_delay: Duration::from_millis(self.pacing.inter_item_delay_ms),
            checkpoint_every: self.store.checkpoint_every,
            resume_mode: self.store.resume_mode,
            output_path: self.store.output_path.clone(),
        }
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.rotation.lease_ttl_secs)
    }
}

/// Resolved, typed settings the harvest loop runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopSettings {
    pub budget: BudgetLimits,
    pub rotation: RotationPolicy,
    pub control_plane_min_interval: Duration,
    pub target_min_interval: Duration,
    pub inter_item_delay: Duration,
    pub checkpoint_every: usize,
    pub resume_mode: ResumeMode,
    pub output_path: PathBuf,
}
