use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use harvester_engine::ResumeMode;
use log::LevelFilter;

use crate::logging::LogDestination;

/// Command line arguments. Anything given here overrides the config file.
#[derive(Parser, Debug)]
#[command(name = "harvester", version)]
#[command(
    about = "Budget-bounded, resumable key harvester with rotating proxy identity",
    after_help = "Examples:
  harvester --config harvester.ron
  HARVESTER_UID=12345 HARVESTER_UKEY=... harvester --input vid.json --output shops.json
  harvester --resume-mode refresh --log-to both

Exit status is non-zero when a circuit breaker opens or the vendor rejects the
credentials; a spent time or query budget is a clean exit."
)]
pub struct Args {
    /// Path to the RON configuration file
    #[arg(short, long, value_name = "PATH", default_value = "harvester.ron")]
    pub config: PathBuf,

    /// Vendor user id
    #[arg(long, env = "HARVESTER_UID")]
    pub uid: Option<String>,

    /// Vendor user key
    #[arg(long, env = "HARVESTER_UKEY", hide_env_values = true)]
    pub ukey: Option<String>,

    /// Ordered input key list (JSON array)
    #[arg(long, value_name = "PATH")]
    pub input: Option<PathBuf>,

    /// Output record list (JSON array), also the resume checkpoint
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Where to start in the input list
    #[arg(long, value_enum)]
    pub resume_mode: Option<ResumeModeArg>,

    /// Stop after this many queries
    #[arg(long)]
    pub query_limit: Option<u64>,

    /// Where log output goes
    #[arg(long, value_enum, default_value = "terminal")]
    pub log_to: LogDestination,

    /// Log file used with --log-to file|both
    #[arg(long, value_name = "PATH", default_value = "harvester.log")]
    pub log_file: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: LevelFilter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResumeModeArg {
    /// Continue after the last recorded key
    Checkpoint,
    /// Re-walk the list and query every key without data
    Refresh,
}

impl From<ResumeModeArg> for ResumeMode {
    fn from(arg: ResumeModeArg) -> Self {
        match arg {
            ResumeModeArg::Checkpoint => ResumeMode::Checkpoint,
            ResumeModeArg::Refresh => ResumeMode::Refresh,
        }
    }
}
