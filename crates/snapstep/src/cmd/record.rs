//! Record command - compile the target, step through it, and stream records

use std::{
    io,
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};

use eyre::{eyre, Result, WrapErr};
use snapstep_common::types::Record;
use snapstep_engine::{
    discover_sources, jdwp::JdwpLauncher, CompileError, Compiler, DebugSession, Javac,
    JsonLinesSink, RecordSink, SessionConfig, SessionOutcome,
};
use tracing::{error, info};

/// Compile `cli.source`, record every step of its entry class, and write records to stdout.
///
/// Compilation problems are reported as records and yield a failing exit code. Once the
/// `start` record is out, an `end` record always follows.
pub async fn record_program(cli: &crate::Cli) -> Result<ExitCode> {
    let mut sink = JsonLinesSink::new(io::stdout());

    let (entry_scope, root) = match entry_of(&cli.source) {
        Ok(entry) => entry,
        Err(e) => {
            error!("{e}");
            sink.emit(&Record::error(e.to_string()))?;
            return Ok(ExitCode::FAILURE);
        }
    };

    // Step 1: Compile everything next to the entry source
    let sources = discover_sources(&root, &cli.source);
    let mut javac = Javac::new();
    if let Some(program) = &cli.javac {
        javac = javac.with_program(program);
    }
    match javac.compile(&sources, &root) {
        Ok(()) => info!(files = sources.len(), "Compiled target"),
        Err(CompileError::CompileFailure { diagnostics }) => {
            sink.emit(&Record::compile_error(diagnostics))?;
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => {
            error!(error = %e, "Compilation could not run");
            sink.emit(&Record::error(e.to_string()))?;
            return Ok(ExitCode::FAILURE);
        }
    }
    sink.emit(&Record::start(&entry_scope, sources.len()))?;

    // Step 2: Launch and step through the target on a blocking thread
    let config = SessionConfig::new(entry_scope)
        .with_max_steps(cli.max_steps)
        .with_event_timeout(Duration::from_secs(cli.event_timeout_secs))
        .with_capture_mode(cli.capture_mode.into());
    let mut launcher = JdwpLauncher::new();
    if let Some(java) = &cli.java {
        launcher = launcher.with_java(java);
    }

    let result = tokio::task::spawn_blocking(move || run_session(config, launcher, root))
        .await
        .map_err(|e| eyre!("session thread failed: {e}"))
        .and_then(|result| result);

    // Step 3: Report failures and close the stream
    match result {
        Ok(outcome) => info!(?outcome, "Recording finished"),
        Err(e) => {
            error!("{e:#}");
            sink.emit(&Record::error(format!("{e:#}")))?;
        }
    }
    sink.emit(&Record::End)?;
    Ok(ExitCode::SUCCESS)
}

/// Entry class name and the directory holding the sources
fn entry_of(source: &Path) -> Result<(String, PathBuf)> {
    if !source.is_file() {
        return Err(eyre!("Source file not found: {}", source.display()));
    }
    let entry_scope = source
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| eyre!("Cannot derive a class name from {}", source.display()))?
        .to_string();
    let root = match source.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((entry_scope, root))
}

fn run_session(
    config: SessionConfig,
    launcher: JdwpLauncher,
    class_path: PathBuf,
) -> Result<SessionOutcome> {
    let (target, output) = launcher
        .launch(&config.entry_scope, &class_path)
        .wrap_err("failed to launch the target")?;
    let sink = JsonLinesSink::new(io::stdout());
    DebugSession::new(target, output, sink, config).run()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_of_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("Fib.java");
        std::fs::write(&source, "class Fib {}").unwrap();

        let (scope, root) = entry_of(&source).unwrap();
        assert_eq!(scope, "Fib");
        assert_eq!(root, dir.path());
    }

    #[test]
    fn test_entry_of_missing_source() {
        let err = entry_of(Path::new("/nonexistent/snapstep/Main.java")).unwrap_err();
        assert!(err.to_string().contains("Source file not found"));
    }
}
