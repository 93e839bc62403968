//! SnapStep - Step-by-step program state recorder
//!
//! Compiles a program, runs it under a debugger one source line at a time, and writes
//! one JSON snapshot per step to stdout for a visualizer.

use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, ValueEnum};
use eyre::Result;
use snapstep_common::env::{
    SNAPSTEP_EVENT_TIMEOUT, SNAPSTEP_JAVA, SNAPSTEP_JAVAC, SNAPSTEP_MAX_STEPS,
};
use snapstep_engine::CaptureMode;

mod cmd;

/// Command line interface
#[derive(Debug, Parser)]
#[command(name = "snapstep")]
#[command(about = "SnapStep - Step-by-step program state recorder for visualizers")]
#[command(version)]
pub struct Cli {
    /// Source file of the entry class, e.g. Main.java
    pub source: PathBuf,

    /// Number of steps recorded before the program is terminated
    #[arg(long, env = SNAPSTEP_MAX_STEPS, default_value_t = snapstep_engine::DEFAULT_MAX_STEPS)]
    pub max_steps: u64,

    /// Seconds to wait for the next debugger event before giving up
    #[arg(long, env = SNAPSTEP_EVENT_TIMEOUT, default_value = "5")]
    pub event_timeout_secs: u64,

    /// How program output is attached to step records
    #[arg(long, value_enum, default_value = "cumulative")]
    pub capture_mode: CaptureArg,

    /// Java compiler to use (default: $JAVA_HOME/bin/javac, then PATH)
    #[arg(long, env = SNAPSTEP_JAVAC)]
    pub javac: Option<PathBuf>,

    /// Java launcher to use (default: $JAVA_HOME/bin/java, then PATH)
    #[arg(long, env = SNAPSTEP_JAVA)]
    pub java: Option<PathBuf>,

    /// Also write debug logs to a rolling file in the temp directory
    #[arg(long)]
    pub log_file: bool,
}

/// Output capture modes
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CaptureArg {
    /// Every step carries all output so far
    Cumulative,
    /// Every step carries only new output
    Delta,
}

impl From<CaptureArg> for CaptureMode {
    fn from(arg: CaptureArg) -> Self {
        match arg {
            CaptureArg::Cumulative => Self::Cumulative,
            CaptureArg::Delta => Self::Delta,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Logs go to stderr, stdout carries the records
    snapstep_utils::logging::init_logging("snapstep", cli.log_file)?;

    cmd::record_program(&cli).await
}
