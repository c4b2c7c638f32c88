//! AgentServerSupervisor (C7): manages the `opencode serve` subprocess that
//! backs the HTTP/SSE agent adapter.

use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::error::AgentError;

const PORT_RANGE_START: u16 = 14096;
const PORT_RANGE_END: u16 = 14196;
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(30);
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_millis(500);
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// A running `opencode serve` process plus the HTTP client needed to reach it.
pub struct AgentServer {
    working_dir: PathBuf,
    port: u16,
    model: String,
    verbose: bool,
    process: Option<Child>,
    http: reqwest::Client,
}

impl AgentServer {
    /// Construct a supervisor bound to an explicit port, or auto-assign one
    /// from the configured range (falling back to an OS-chosen port).
    pub async fn new(working_dir: PathBuf, port: Option<u16>, model: String, verbose: bool) -> Self {
        let port = match port {
            Some(p) => p,
            None => Self::find_free_port().await,
        };
        Self {
            working_dir,
            port,
            model,
            verbose,
            process: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|c| c.id())
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn is_running(&mut self) -> bool {
        match &mut self.process {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn find_free_port() -> u16 {
        for candidate in PORT_RANGE_START..PORT_RANGE_END {
            if TcpListener::bind(("127.0.0.1", candidate)).await.is_ok() {
                return candidate;
            }
        }
        // Fall back to an OS-assigned ephemeral port.
        TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("OS can always assign an ephemeral port")
            .local_addr()
            .expect("bound listener has a local address")
            .port()
    }

    /// Spawn `opencode serve` in its own process group.
    pub fn start(&mut self) -> Result<(), AgentError> {
        debug!(port = self.port, working_dir = ?self.working_dir, "AgentServer::start: called");

        let mut cmd = Command::new("opencode");
        cmd.args(["serve", "--port", &self.port.to_string(), "--log-level", "DEBUG"]);
        if !self.model.is_empty() {
            cmd.args(["--model", &self.model]);
        }
        if self.verbose {
            cmd.arg("--print-logs");
        }
        cmd.current_dir(&self.working_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .process_group(0);

        let child = cmd.spawn().map_err(|e| AgentError::SpawnFailed(e.to_string()))?;
        info!(pid = child.id(), port = self.port, "started opencode serve");
        self.process = Some(child);
        Ok(())
    }

    /// Poll `GET /global/health` until it succeeds or the timeout elapses.
    pub async fn wait_until_healthy(&mut self) -> Result<(), AgentError> {
        debug!("AgentServer::wait_until_healthy: called");
        let deadline = Instant::now() + HEALTH_CHECK_TIMEOUT;

        while Instant::now() < deadline {
            if !self.is_running() {
                let stderr = self.drain_stderr().await;
                return Err(AgentError::ServerDiedDuringStartup(stderr));
            }
            if self.health_check().await {
                debug!("AgentServer::wait_until_healthy: health check passed");
                return Ok(());
            }
            tokio::time::sleep(HEALTH_CHECK_INTERVAL).await;
        }

        Err(AgentError::HealthCheckTimeout(HEALTH_CHECK_TIMEOUT.as_secs()))
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/global/health", self.base_url());
        match self.http.get(&url).timeout(Duration::from_secs(2)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn drain_stderr(&mut self) -> String {
        use tokio::io::AsyncReadExt;
        let Some(child) = self.process.as_mut() else {
            return String::new();
        };
        let Some(stderr) = child.stderr.as_mut() else {
            return String::new();
        };
        let mut buf = String::new();
        let _ = stderr.read_to_string(&mut buf).await;
        buf
    }

    /// SIGTERM the process group, escalating to SIGKILL if it doesn't exit
    /// within the grace period.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.process.take() else {
            return;
        };
        let Some(pid) = child.id() else {
            return;
        };
        debug!(pid, "AgentServer::stop: called");

        let nix_pid = Pid::from_raw(pid as i32);
        if signal::killpg(nix_pid, Signal::SIGTERM).is_err() {
            warn!(pid, "AgentServer::stop: SIGTERM to process group failed, process likely already gone");
            return;
        }

        match tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, child.wait()).await {
            Ok(_) => info!(pid, "opencode serve stopped cleanly"),
            Err(_) => {
                warn!(pid, "SIGTERM timeout, sending SIGKILL");
                let _ = signal::killpg(nix_pid, Signal::SIGKILL);
                let _ = child.wait().await;
            }
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    // Binds a real TCP port to probe availability; serialized so concurrent
    // test runs can't race over the same ephemeral port range.
    #[tokio::test]
    #[serial]
    async fn find_free_port_returns_port_in_range_or_fallback() {
        let port = AgentServer::find_free_port().await;
        assert!(port > 0);
    }
}
