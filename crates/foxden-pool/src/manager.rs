//! Lifecycle manager: staggered launch, exit watching, ordered shutdown.
//!
//! One-shot state machine: `Initializing → Launching → Ready → ShuttingDown
//! → Stopped`. Failed slots stay failed; nothing is respawned.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use foxden_core::config::Config;
use foxden_core::error::{FoxdenError, Result};

use crate::discovery::spawn_output_reader;
use crate::forward::{ForwarderHandle, publish};
use crate::registry::{PoolRegistry, slot_id};
use crate::worker::{WorkerCommand, WorkerProcess};

/// How often the exit watcher sweeps the pool for dead workers.
const EXIT_SWEEP_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Initializing,
    Launching,
    Ready,
    ShuttingDown,
    Stopped,
}

/// Everything a slot owns at runtime. Process handles are exclusive to the
/// slot; no two slots ever share one.
struct SlotRuntime {
    index: usize,
    id: String,
    worker: WorkerProcess,
    forwarder: Option<ForwarderHandle>,
    reader: JoinHandle<()>,
}

pub struct PoolManager {
    config: Arc<Config>,
    registry: Arc<PoolRegistry>,
    slots: Mutex<Vec<SlotRuntime>>,
    state: RwLock<PoolState>,
    shutdown_token: CancellationToken,
    shutdown_done: Mutex<bool>,
    endpoint_file: PathBuf,
}

impl PoolManager {
    pub fn new(config: Arc<Config>, registry: Arc<PoolRegistry>) -> Self {
        let endpoint_file = PathBuf::from(config.endpoint_file());
        Self {
            config,
            registry,
            slots: Mutex::new(Vec::new()),
            state: RwLock::new(PoolState::Initializing),
            shutdown_token: CancellationToken::new(),
            shutdown_done: Mutex::new(false),
            endpoint_file,
        }
    }

    pub async fn state(&self) -> PoolState {
        *self.state.read().await
    }

    /// Token cancelled when shutdown begins; shared with the status service.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn registry(&self) -> Arc<PoolRegistry> {
        self.registry.clone()
    }

    /// Launch every configured slot, one at a time with a fixed delay.
    ///
    /// Slot `i+1` never starts before slot `i`'s discovery has resolved.
    /// Per-slot failures are recorded and never abort siblings; the pass is
    /// fatal only when zero slots reach ready.
    pub async fn launch_all(&self) -> Result<()> {
        *self.state.write().await = PoolState::Launching;
        let pool_size = self.config.pool_size();
        info!(pool_size, "launching worker pool");

        for index in 0..pool_size {
            if index > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.launch_delay()) => {}
                    _ = self.shutdown_token.cancelled() => {}
                }
            }
            if self.shutdown_token.is_cancelled() {
                info!("shutdown requested during launch pass");
                return Ok(());
            }
            self.launch_slot(index).await;
        }

        self.registry.set_launch_complete().await;

        let counts = self.registry.counts().await;
        if counts.ready == 0 {
            return Err(FoxdenError::Launch(format!(
                "no worker out of {pool_size} reached ready"
            )));
        }

        *self.state.write().await = PoolState::Ready;
        info!(ready = counts.ready, total = counts.total, "worker pool ready");
        Ok(())
    }

    async fn launch_slot(&self, index: usize) {
        let id = slot_id(index);
        self.registry.insert_starting(index).await;

        let cmd = WorkerCommand::from_config(&self.config, &id);
        let (mut worker, stream) = match WorkerProcess::spawn(&cmd) {
            Ok(spawned) => spawned,
            Err(err) => {
                warn!(slot = %id, %err, "worker launch failed");
                self.registry.mark_failed(index).await;
                return;
            }
        };
        info!(slot = %id, pid = ?worker.pid(), "worker launched");

        let (tx, rx) = oneshot::channel();
        let reader = spawn_output_reader(id.clone(), stream, tx);

        let runtime = match tokio::time::timeout(self.config.discovery_timeout(), rx).await {
            Ok(Ok(dynamic)) => {
                let published = publish(
                    index,
                    self.config.base_port(),
                    &dynamic,
                    &self.config.forwarder(),
                );
                self.registry
                    .mark_ready(index, dynamic, published.endpoint.clone())
                    .await;
                if index == 0 {
                    self.write_endpoint_record(&published.endpoint);
                }
                info!(slot = %id, endpoint = %published.endpoint, "slot ready");
                SlotRuntime {
                    index,
                    id,
                    worker,
                    forwarder: published.forwarder,
                    reader,
                }
            }
            Ok(Err(_closed)) => {
                warn!(slot = %id, "worker exited before advertising an endpoint");
                self.registry.mark_failed(index).await;
                if let Err(err) = worker.terminate(self.config.terminate_grace()).await {
                    warn!(slot = %id, %err, "failed to reap worker");
                }
                SlotRuntime {
                    index,
                    id,
                    worker,
                    forwarder: None,
                    reader,
                }
            }
            Err(_elapsed) => {
                warn!(
                    slot = %id,
                    timeout_ms = self.config.discovery_timeout().as_millis() as u64,
                    "endpoint discovery timed out"
                );
                self.registry.mark_failed(index).await;
                if let Err(err) = worker.terminate(self.config.terminate_grace()).await {
                    warn!(slot = %id, %err, "failed to terminate undiscovered worker");
                }
                SlotRuntime {
                    index,
                    id,
                    worker,
                    forwarder: None,
                    reader,
                }
            }
        };

        self.slots.lock().await.push(runtime);
    }

    /// Resolves when every worker in the pool has exited. Used by the binary
    /// to trigger shutdown when the whole pool dies out from under it.
    pub async fn wait_all_exited(&self) {
        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => return,
                _ = tokio::time::sleep(EXIT_SWEEP_INTERVAL) => {}
            }

            let mut slots = self.slots.lock().await;
            if slots.is_empty() {
                continue;
            }
            let all_exited = slots
                .iter_mut()
                .all(|slot| matches!(slot.worker.try_wait(), Ok(Some(_))));
            if all_exited {
                return;
            }
        }
    }

    /// Drive the ordered shutdown sequence: forwarders, then workers, then
    /// the endpoint record and the registry.
    ///
    /// Safe to call more than once, concurrently included: a second caller
    /// waits for the first pass to finish and returns without touching any
    /// process handle again.
    pub async fn shutdown(&self) {
        let mut done = self.shutdown_done.lock().await;
        if *done {
            return;
        }

        *self.state.write().await = PoolState::ShuttingDown;
        self.shutdown_token.cancel();
        info!("shutting down worker pool");

        let mut slots = std::mem::take(&mut *self.slots.lock().await);

        // Forwarders first: a dead worker behind a live forwarder is a
        // listener handing out connections to nothing.
        for slot in &mut slots {
            if let Some(forwarder) = slot.forwarder.as_mut() {
                forwarder.terminate().await;
            }
        }

        let grace = self.config.terminate_grace();
        for slot in &mut slots {
            if let Err(err) = slot.worker.terminate(grace).await {
                warn!(slot = %slot.id, %err, "worker termination failed");
            }
            self.registry.mark_terminated(slot.index).await;
            slot.reader.abort();
        }

        self.remove_endpoint_record();
        self.registry.clear().await;
        *self.state.write().await = PoolState::Stopped;
        *done = true;
        info!("worker pool stopped");
    }

    fn write_endpoint_record(&self, endpoint: &str) {
        let tmp = self.endpoint_file.with_extension("tmp");
        // temp-then-rename so a concurrent reader never sees a torn record
        let result = std::fs::write(&tmp, format!("{endpoint}\n"))
            .and_then(|_| std::fs::rename(&tmp, &self.endpoint_file));
        match result {
            Ok(()) => {
                info!(path = %self.endpoint_file.display(), endpoint = %endpoint,
                    "wrote primary endpoint record");
            }
            Err(err) => {
                warn!(path = %self.endpoint_file.display(), %err,
                    "failed to write endpoint record");
            }
        }
    }

    fn remove_endpoint_record(&self) {
        match std::fs::remove_file(&self.endpoint_file) {
            Ok(()) => info!(path = %self.endpoint_file.display(), "removed endpoint record"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %self.endpoint_file.display(), %err,
                    "failed to remove endpoint record");
            }
        }
    }
}
