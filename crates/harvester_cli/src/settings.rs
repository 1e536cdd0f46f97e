//! Config file loading and command line overrides.

use std::fs;
use std::path::Path;

use anyhow::Context;
use engine_logging::engine_info;
use harvester_engine::HarvestConfig;

use crate::cli::Args;

/// Reads a RON config file. A missing file falls back to defaults so that a
/// run configured purely from flags and environment still works.
pub fn load_config(path: &Path) -> anyhow::Result<HarvestConfig> {
    let content = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            engine_info!("No config file at {:?}; using defaults", path);
            return Ok(HarvestConfig::default());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read config {path:?}"));
        }
    };
    let config =
        ron::from_str(&content).with_context(|| format!("failed to parse config {path:?}"))?;
    engine_info!("Loaded config from {:?}", path);
    Ok(config)
}

pub fn apply_overrides(config: &mut HarvestConfig, args: &Args) {
    if let Some(uid) = &args.uid {
        config.control_plane.uid = uid.clone();
    }
    if let Some(ukey) = &args.ukey {
        config.control_plane.ukey = ukey.clone();
    }
    if let Some(input) = &args.input {
        config.store.input_path = input.clone();
    }
    if let Some(output) = &args.output {
        config.store.output_path = output.clone();
    }
    if let Some(mode) = args.resume_mode {
        config.store.resume_mode = mode.into();
    }
    if let Some(limit) = args.query_limit {
        config.budget.query_limit = limit;
    }
}
