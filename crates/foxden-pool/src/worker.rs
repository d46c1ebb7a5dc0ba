//! Browser engine subprocess wrapper.
//!
//! A worker is an opaque process: started with its launch configuration, it
//! eventually writes a connection endpoint to its output stream and runs
//! until terminated. stdout and stderr are piped and merged into one line
//! stream owned by the caller.

use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_stream::wrappers::LinesStream;
use tokio_stream::{Stream, StreamExt as _};
use tracing::{debug, warn};

use foxden_core::config::Config;
use foxden_core::error::{FoxdenError, Result};

/// Merged stdout+stderr of a worker, line by line.
pub type OutputStream = Pin<Box<dyn Stream<Item = std::io::Result<String>> + Send>>;

/// Fully resolved launch invocation for one worker slot.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl WorkerCommand {
    /// Build the launch invocation for `slot_id` from the service config.
    ///
    /// Proxy settings travel through the environment the way the engine
    /// expects them; the username carries the slot's sticky-session token so
    /// each slot keeps a consistent egress point.
    pub fn from_config(config: &Config, slot_id: &str) -> Self {
        let worker = config.worker();

        let mut args = worker.args.clone();
        if worker.headless {
            args.push("--headless".into());
        }

        let mut env: Vec<(String, String)> = vec![("FOXDEN_SLOT_ID".into(), slot_id.into())];

        if let Some(proxy) = &config.proxy {
            env.push(("PROXY_SERVER".into(), proxy.server.clone()));
            if let Some(username) = proxy.sticky_username(slot_id) {
                env.push(("PROXY_USERNAME".into(), username));
            }
            if let Some(password) = proxy.resolve_password() {
                env.push(("PROXY_PASSWORD".into(), password));
            }
        }

        if config.geoip_enabled() {
            env.push(("CAMOUFOX_GEOIP".into(), "true".into()));
        }

        Self {
            program: worker.program,
            args,
            env,
        }
    }
}

/// Handle to a running worker subprocess.
pub struct WorkerProcess {
    child: Child,
    pid: Option<u32>,
}

impl WorkerProcess {
    /// Spawn the worker and hand back its merged output stream.
    pub fn spawn(cmd: &WorkerCommand) -> Result<(Self, OutputStream)> {
        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &cmd.env {
            command.env(key, value);
        }

        let mut child = command
            .spawn()
            .map_err(|e| FoxdenError::Launch(format!("failed to spawn {}: {e}", cmd.program)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FoxdenError::Launch("worker stdout missing".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| FoxdenError::Launch("worker stderr missing".into()))?;

        let merged = LinesStream::new(BufReader::new(stdout).lines())
            .merge(LinesStream::new(BufReader::new(stderr).lines()));

        let pid = child.id();
        Ok((Self { child, pid }, Box::pin(merged)))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the worker to exit, escalating to a forced kill if it has not
    /// done so within `grace`.
    pub async fn terminate(&mut self, grace: Duration) -> Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }

        self.send_term();

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(pid = ?self.pid, %status, "worker exited after SIGTERM");
                Ok(())
            }
            Ok(Err(e)) => Err(FoxdenError::Io(e)),
            Err(_) => {
                warn!(pid = ?self.pid, grace_ms = grace.as_millis() as u64,
                    "worker ignored SIGTERM, killing");
                self.kill().await
            }
        }
    }

    #[cfg(unix)]
    fn send_term(&self) {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if let Some(pid) = self.pid {
            if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!(pid, %err, "SIGTERM delivery failed");
            }
        }
    }

    #[cfg(not(unix))]
    fn send_term(&self) {
        // No graceful signal available; terminate() escalates to kill.
    }

    /// Forcibly kill the worker and reap it.
    pub async fn kill(&mut self) -> Result<()> {
        // start_kill errors once the process is already gone
        if let Err(err) = self.child.start_kill() {
            debug!(pid = ?self.pid, %err, "kill on exited worker");
        }
        self.child.wait().await?;
        Ok(())
    }

    /// Block until the worker exits.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        Ok(self.child.wait().await?)
    }

    /// Non-blocking exit check.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }
}
