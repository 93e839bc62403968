// SnapStep - Step-by-step program state recorder
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Starting a JVM under JDWP control.
//!
//! The launcher listens on an ephemeral loopback port and starts the JVM with the JDWP
//! agent in client mode, suspended before the first bytecode runs. The VM connects
//! back, and the accepted socket becomes the [`JdwpTarget`].

use std::{
    io::{self, BufRead, BufReader},
    net::{TcpListener, TcpStream},
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info};

use super::JdwpTarget;
use crate::{compiler::locate_jdk_tool, spawn_output_pump, ChannelOutput, TargetError};

/// Default time the VM gets to connect back
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Launches the target program in a debuggable JVM
#[derive(Debug, Clone)]
pub struct JdwpLauncher {
    java: Option<PathBuf>,
    accept_timeout: Duration,
}

impl Default for JdwpLauncher {
    fn default() -> Self {
        Self { java: None, accept_timeout: DEFAULT_ACCEPT_TIMEOUT }
    }
}

impl JdwpLauncher {
    /// Launcher locating `java` through `JAVA_HOME` or `PATH`
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit `java` binary
    pub fn with_java(mut self, java: impl Into<PathBuf>) -> Self {
        self.java = Some(java.into());
        self
    }

    /// Set how long the VM gets to connect back
    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }

    /// Start `main_class` from `class_path`, suspended, and attach to it.
    ///
    /// Returns the target and the source of its captured stdout.
    pub fn launch(
        &self,
        main_class: &str,
        class_path: &Path,
    ) -> Result<(JdwpTarget, ChannelOutput), TargetError> {
        let java = locate_jdk_tool("java", self.java.as_deref())
            .ok_or_else(|| TargetError::Launch("Java runtime not available".into()))?;

        let listener = TcpListener::bind(("127.0.0.1", 0))?;
        let port = listener.local_addr()?.port();
        info!(java = %java.display(), main_class, port, "Launching target");

        let mut child = Command::new(&java)
            .arg(format!(
                "-agentlib:jdwp=transport=dt_socket,server=n,suspend=y,address=127.0.0.1:{port}"
            ))
            .arg("-cp")
            .arg(class_path)
            .arg(main_class)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TargetError::Launch(format!("failed to start {}: {e}", java.display())))?;

        let (tx, output) = ChannelOutput::channel();
        let pump = match child.stdout.take() {
            Some(stdout) => Some(spawn_output_pump(stdout, tx)?),
            None => None,
        };
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_logger(stderr)?;
        }

        let stream = match accept_with_deadline(&listener, &mut child, self.accept_timeout) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        let target = JdwpTarget::attach(stream, Some(child), pump)?;
        Ok((target, output))
    }
}

fn accept_with_deadline(
    listener: &TcpListener,
    child: &mut Child,
    timeout: Duration,
) -> Result<TcpStream, TargetError> {
    listener.set_nonblocking(true)?;
    let deadline = Instant::now().checked_add(timeout);
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                stream.set_nodelay(true)?;
                debug!(%peer, "Target connected");
                return Ok(stream);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if let Some(status) = child.try_wait()? {
                    return Err(TargetError::Launch(format!(
                        "target exited before attaching ({status})"
                    )));
                }
                if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    return Err(TargetError::Launch(format!(
                        "target did not connect within {timeout:?}"
                    )));
                }
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Forward the target's stderr to the log
fn spawn_stderr_logger<R>(stderr: R) -> io::Result<thread::JoinHandle<()>>
where
    R: io::Read + Send + 'static,
{
    thread::Builder::new().name("snapstep-stderr".to_string()).spawn(move || {
        for line in BufReader::new(stderr).lines() {
            match line {
                Ok(line) => debug!(target: "snapstep::target", "{line}"),
                Err(_) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_java_is_a_launch_error() {
        snapstep_utils::logging::ensure_test_logging(None);
        let launcher = JdwpLauncher::new()
            .with_java("/nonexistent/snapstep/java")
            .with_accept_timeout(Duration::from_millis(100));
        let dir = tempfile::tempdir().unwrap();
        let result = launcher.launch("Main", dir.path());
        assert!(matches!(result, Err(TargetError::Launch(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_unbounded_accept_timeout() {
        snapstep_utils::logging::ensure_test_logging(None);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();

        let vm = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            TcpStream::connect(addr).unwrap()
        });
        let result = accept_with_deadline(&listener, &mut child, Duration::MAX);
        let _ = child.kill();
        let _ = child.wait();

        assert!(result.is_ok());
        vm.join().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_child_exit_before_attach_is_a_launch_error() {
        snapstep_utils::logging::ensure_test_logging(None);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut child = Command::new("true").spawn().unwrap();

        let result = accept_with_deadline(&listener, &mut child, Duration::MAX);
        assert!(matches!(result, Err(TargetError::Launch(message)) if message.contains("exited")));
    }
}
