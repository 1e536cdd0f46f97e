mod cli;
mod logging;
mod settings;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use engine_logging::{engine_error, engine_info, engine_warn};
use harvester_engine::{
    HarvestError, HarvestLoop, HttpWorker, IdentityLeaseManager, ProgressStore,
    ReqwestAddressLookup, ReqwestControlPlane, RunReport,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::cli::Args;

// One thread of control: both the vendor and the target enforce a global
// call rate, so there is nothing to gain from parallel workers.
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::initialize(args.log_to, args.log_level, &args.log_file);

    match run(args).await {
        Ok(report) if report.is_fatal() => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            engine_error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<RunReport> {
    let mut config = settings::load_config(&args.config)?;
    settings::apply_overrides(&mut config, &args);
    config
        .validate()
        .map_err(HarvestError::from)
        .context("configuration rejected at startup")?;

    let keys = ProgressStore::load(&config.store.input_path)?;
    let store = ProgressStore::open(&config.store.output_path)?;

    let control_plane = ReqwestControlPlane::new(config.control_plane.clone())
        .context("failed to build control-plane client")?;
    let lookup = ReqwestAddressLookup::new(&config.address_lookup)
        .context("failed to build address lookup client")?;
    let worker = HttpWorker::new(config.target.clone())?;
    let leases = IdentityLeaseManager::new(control_plane, lookup, config.lease_ttl());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            engine_warn!("Interrupt received; stopping after the current key");
            on_signal.cancel();
        }
    });

    engine_info!(
        "Harvesting {} keys: query_limit={} failure_limit={} elapsed_limit={}s",
        keys.len(),
        config.budget.query_limit,
        config.budget.failure_limit,
        config.budget.elapsed_limit_secs
    );
    let mut harvest = HarvestLoop::new(config.loop_settings(), worker, leases, store)
        .with_cancellation(cancel);
    let report = harvest.run(&keys).await?;
    Ok(report)
}
