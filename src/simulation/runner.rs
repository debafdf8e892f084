//! Simulator process runner.
//!
//! Runs the simulator as a batch subprocess and waits for it with a
//! timeout that a [`CancelToken`] can cut short.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::debug;

use crate::config::SimulatorConfig;
use crate::error::{Error, Result};
use crate::types::AnalysisMode;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

// ===== CANCELLATION =====

/// Cancels every wait observing the paired [`CancelToken`]. Dropping the
/// handle cancels as well.
#[derive(Debug)]
pub struct CancelHandle {
    _tx: Sender<()>,
}

impl CancelHandle {
    pub fn cancel(self) {}
}

#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> (CancelHandle, CancelToken) {
        let (tx, rx) = channel::bounded(0);
        (CancelHandle { _tx: tx }, CancelToken { rx })
    }

    /// A token that never fires.
    pub fn never() -> Self {
        Self {
            rx: channel::never(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep up to `timeout`; returns true if cancelled meanwhile.
    pub fn wait(&self, timeout: Duration) -> bool {
        matches!(
            self.rx.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::never()
    }
}

// ===== BACKEND =====

/// Files taking part in one simulator invocation.
#[derive(Debug, Clone)]
pub struct SimulationJob {
    pub mode: AnalysisMode,
    pub netlist: PathBuf,
    pub raw: PathBuf,
    pub log: PathBuf,
}

/// Something that turns a netlist into a waveform dump and a log.
pub trait SimulatorBackend: Send + Sync {
    fn simulate(&self, job: &SimulationJob, cancel: &CancelToken) -> Result<()>;
}

/// Batch-mode ngspice (or any simulator with a compatible argument template).
#[derive(Debug, Clone)]
pub struct NgspiceRunner {
    config: SimulatorConfig,
}

impl NgspiceRunner {
    pub fn new(config: SimulatorConfig) -> Self {
        Self { config }
    }

    fn arguments(&self, job: &SimulationJob) -> Vec<String> {
        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{netlist}", &job.netlist.to_string_lossy())
                    .replace("{raw}", &job.raw.to_string_lossy())
                    .replace("{log}", &job.log.to_string_lossy())
            })
            .collect()
    }
}

impl SimulatorBackend for NgspiceRunner {
    fn simulate(&self, job: &SimulationJob, cancel: &CancelToken) -> Result<()> {
        let args = self.arguments(job);
        debug!("{} {}", self.config.executable, args.join(" "));

        let mut cmd = Command::new(&self.config.executable);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(dir) = job.netlist.parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| Error::SimulatorNotFound {
            executable: self.config.executable.clone(),
            reason: e.to_string(),
        })?;

        let (status, stderr) = wait_with_timeout(child, job.mode, self.config.timeout(), cancel)?;
        if !status.success() {
            return Err(Error::SimulatorFailed {
                mode: job.mode,
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Wait for a child process, killing it on timeout or cancellation.
fn wait_with_timeout(
    mut child: Child,
    mode: AnalysisMode,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<(ExitStatus, String)> {
    // Drain stderr concurrently so a chatty simulator cannot fill the pipe
    let stderr_reader = child.stderr.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            pipe.read_to_end(&mut buf).ok();
            String::from_utf8_lossy(&buf).into_owned()
        })
    });

    let start = Instant::now();
    let outcome = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Ok(status),
            Ok(None) => {
                if start.elapsed() > timeout {
                    break Err(Error::SimulatorTimeout { mode, timeout });
                }
                if cancel.wait(POLL_INTERVAL) {
                    break Err(Error::Cancelled(mode));
                }
            }
            Err(e) => break Err(Error::Io(e)),
        }
    };

    match outcome {
        Ok(status) => {
            let stderr = stderr_reader
                .and_then(|h| h.join().ok())
                .unwrap_or_default();
            Ok((status, stderr))
        }
        Err(e) => {
            // Grandchildren may still hold stderr open; leave the reader detached
            let _ = child.kill();
            let _ = child.wait();
            Err(e)
        }
    }
}

/// Check if an executable can be started.
pub fn is_available(executable: &str) -> bool {
    Command::new(executable)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

/// True when `path` exists and has content.
pub fn is_nonempty(path: &Path) -> bool {
    path.metadata().map(|m| m.len() > 0).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(dir: &Path) -> SimulationJob {
        SimulationJob {
            mode: AnalysisMode::Transient,
            netlist: dir.join("run.net"),
            raw: dir.join("run.raw"),
            log: dir.join("run.log"),
        }
    }

    #[test]
    fn arguments_substitute_paths() {
        let runner = NgspiceRunner::new(SimulatorConfig::default());
        let args = runner.arguments(&job(Path::new("/sim")));
        assert_eq!(args, ["-b", "-r", "/sim/run.raw", "-o", "/sim/run.log", "/sim/run.net"]);
    }

    #[test]
    fn cancel_token_fires_when_handle_is_used() {
        let (handle, token) = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(!token.wait(Duration::from_millis(1)));
        handle.cancel();
        assert!(token.is_cancelled());
        assert!(token.wait(Duration::from_secs(5)));
        assert!(!CancelToken::never().is_cancelled());
    }

    #[test]
    fn missing_executable_is_reported() {
        let config = SimulatorConfig {
            executable: "definitely-not-a-simulator-4217".to_string(),
            ..SimulatorConfig::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let err = NgspiceRunner::new(config)
            .simulate(&job(dir.path()), &CancelToken::never())
            .unwrap_err();
        assert!(matches!(err, Error::SimulatorNotFound { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn slow_process_times_out() {
        let config = SimulatorConfig {
            executable: "sh".to_string(),
            args: vec!["-c".to_string(), "sleep 5".to_string()],
            timeout_secs: 0.3,
            ..SimulatorConfig::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let start = Instant::now();
        let err = NgspiceRunner::new(config)
            .simulate(&job(dir.path()), &CancelToken::never())
            .unwrap_err();
        assert!(matches!(err, Error::SimulatorTimeout { .. }));
        assert!(err.is_retryable());
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn failing_process_keeps_stderr() {
        let config = SimulatorConfig {
            executable: "sh".to_string(),
            args: vec!["-c".to_string(), "echo broken netlist >&2; exit 3".to_string()],
            ..SimulatorConfig::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let err = NgspiceRunner::new(config)
            .simulate(&job(dir.path()), &CancelToken::never())
            .unwrap_err();
        match err {
            Error::SimulatorFailed { stderr, .. } => assert_eq!(stderr, "broken netlist"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn cancelled_wait_kills_process() {
        let config = SimulatorConfig {
            executable: "sh".to_string(),
            args: vec!["-c".to_string(), "sleep 5".to_string()],
            ..SimulatorConfig::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let (handle, token) = CancelToken::new();
        handle.cancel();
        let err = NgspiceRunner::new(config)
            .simulate(&job(dir.path()), &token)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled(AnalysisMode::Transient)));
    }
}
