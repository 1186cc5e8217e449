//! Correlation-based execution channel.
//!
//! Each `execute` call registers a pending entry under a fresh correlation id,
//! sends a `run` message to the host, and races the host's reply against a
//! local timer of `timeout + grace`. Whichever side removes the pending entry
//! first decides the outcome; the other side becomes a no-op.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Result;
use tokio::{
    sync::{mpsc, oneshot, watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{ExecutionFailure, ExecutionResult};
use crate::{
    config::Config,
    process::{HostEndpoint, HostLauncher},
    protocol::{ChannelMessage, HostMessage},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostStatus {
    Starting,
    Ready,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Added to every request's timeout to absorb host scheduling latency.
    pub grace: Duration,
    pub default_timeout: Duration,
    /// Replace the host with a fresh one after any timeout.
    pub recycle_on_timeout: bool,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            grace: Duration::from_millis(2000),
            default_timeout: Duration::from_millis(5000),
            recycle_on_timeout: true,
        }
    }
}

impl ChannelOptions {
    pub fn from_config(cfg: &Config) -> Self {
        let defaults = Self::default();
        Self {
            grace: cfg.get_millis("PYQUEST_GRACE_MS").unwrap_or(defaults.grace),
            default_timeout: cfg
                .get_millis("PYQUEST_EXEC_TIMEOUT_MS")
                .filter(|d| !d.is_zero())
                .unwrap_or(defaults.default_timeout),
            recycle_on_timeout: cfg.get_bool("PYQUEST_RECYCLE_ON_TIMEOUT"),
        }
    }
}

struct PendingRun {
    tx: oneshot::Sender<ExecutionResult>,
    generation: u64,
}

struct Shared {
    pending: Mutex<HashMap<String, PendingRun>>,
    status: watch::Sender<HostStatus>,
    generation: AtomicU64,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Resolve every request still waiting on `generation` as interrupted.
    async fn interrupt(&self, generation: u64) {
        let mut pending = self.pending.lock().await;
        let stale: Vec<String> = pending
            .iter()
            .filter(|(_, p)| p.generation == generation)
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            if let Some(p) = pending.remove(&id) {
                let _ = p.tx.send(ExecutionResult::failed(ExecutionFailure::Interrupted));
            }
        }
    }
}

struct Connection {
    outbound: mpsc::UnboundedSender<String>,
    reader: JoinHandle<()>,
    generation: u64,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

pub struct ExecutionChannel {
    shared: Arc<Shared>,
    launcher: Arc<dyn HostLauncher>,
    connection: Mutex<Option<Connection>>,
    options: ChannelOptions,
}

impl ExecutionChannel {
    /// Launch a host and start listening to it. The channel is not ready until
    /// the host announces itself.
    pub fn connect(launcher: Arc<dyn HostLauncher>, options: ChannelOptions) -> Result<Self> {
        let (status, _) = watch::channel(HostStatus::Starting);
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            status,
            generation: AtomicU64::new(0),
        });
        let endpoint = match launcher.launch() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                error!(error = %e, "interpreter host failed to launch");
                shared.status.send_replace(HostStatus::Failed(e.to_string()));
                return Err(e);
            }
        };
        let connection = spawn_reader(Arc::clone(&shared), endpoint, 0);
        Ok(Self { shared, launcher, connection: Mutex::new(Some(connection)), options })
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    pub fn status(&self) -> HostStatus {
        self.shared.status.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        *self.shared.status.borrow() == HostStatus::Ready
    }

    /// The reason the host is unavailable, once it has failed.
    pub fn host_fatal(&self) -> Option<ExecutionFailure> {
        match self.status() {
            HostStatus::Failed(reason) => Some(ExecutionFailure::HostFatal(reason)),
            _ => None,
        }
    }

    /// Wait until the host is ready or has failed, at most `limit`.
    pub async fn wait_ready(&self, limit: Duration) -> HostStatus {
        let mut rx = self.shared.status.subscribe();
        let settled = tokio::time::timeout(limit, rx.wait_for(|s| *s != HostStatus::Starting)).await;
        match settled {
            Ok(Ok(status)) => status.clone(),
            _ => self.status(),
        }
    }

    /// Number of requests currently awaiting a reply.
    pub async fn in_flight(&self) -> usize {
        self.shared.pending.lock().await.len()
    }

    pub async fn execute_default(&self, code: String) -> ExecutionResult {
        self.execute(code, self.options.default_timeout).await
    }

    /// Run `code` on the host. Never fails: every problem is reported in the result.
    pub async fn execute(&self, code: String, timeout: Duration) -> ExecutionResult {
        if !self.is_ready() {
            return ExecutionResult::failed(ExecutionFailure::NotReady);
        }
        let (outbound, generation) = {
            let slot = self.connection.lock().await;
            match slot.as_ref() {
                Some(c) => (c.outbound.clone(), c.generation),
                None => return ExecutionResult::failed(ExecutionFailure::NotReady),
            }
        };

        let (id, mut rx) = self.register(generation).await;
        let msg = ChannelMessage::Run {
            id: id.clone(),
            code,
            timeout: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        };
        let sent = msg.to_line().ok().map(|line| outbound.send(line).is_ok());
        if sent != Some(true) {
            self.shared.pending.lock().await.remove(&id);
            warn!(id = %id, "failed to submit run request to host");
            return ExecutionResult::failed(ExecutionFailure::NotReady);
        }
        debug!(id = %id, timeout_ms = timeout.as_millis() as u64, "run request sent");

        match tokio::time::timeout(timeout.saturating_add(self.options.grace), &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => ExecutionResult::failed(ExecutionFailure::Interrupted),
            Err(_) => {
                let expired = self.shared.pending.lock().await.remove(&id);
                if expired.is_none() {
                    // The reply won the race while the timer was firing.
                    if let Ok(result) = rx.try_recv() {
                        return result;
                    }
                }
                warn!(id = %id, timeout_ms = timeout.as_millis() as u64, "execution timed out");
                if self.options.recycle_on_timeout {
                    self.recycle(generation).await;
                }
                ExecutionResult::failed(ExecutionFailure::Timeout)
            }
        }
    }

    /// Discard the current host (if any) and launch a fresh one.
    pub async fn restart(&self) -> Result<()> {
        let mut slot = self.connection.lock().await;
        self.replace(&mut slot).await
    }

    /// Drop the host connection. Pending requests resolve as interrupted.
    pub async fn shutdown(&self) {
        let old = self.connection.lock().await.take();
        if let Some(old) = old {
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            self.shared.status.send_replace(HostStatus::Failed("interpreter host shut down".into()));
            let generation = old.generation;
            drop(old);
            self.shared.interrupt(generation).await;
        }
    }

    async fn register(&self, generation: u64) -> (String, oneshot::Receiver<ExecutionResult>) {
        let mut pending = self.shared.pending.lock().await;
        let mut id = Uuid::new_v4().to_string();
        while pending.contains_key(&id) {
            id = Uuid::new_v4().to_string();
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(id.clone(), PendingRun { tx, generation });
        (id, rx)
    }

    async fn recycle(&self, stale: u64) {
        let mut slot = self.connection.lock().await;
        if slot.as_ref().map(|c| c.generation) != Some(stale) {
            // Someone already replaced that host.
            return;
        }
        info!(generation = stale, "recycling interpreter host after timeout");
        if let Err(e) = self.replace(&mut slot).await {
            error!(error = %e, "failed to relaunch interpreter host");
        }
    }

    async fn replace(&self, slot: &mut Option<Connection>) -> Result<()> {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.status.send_replace(HostStatus::Starting);
        if let Some(old) = slot.take() {
            let stale = old.generation;
            drop(old);
            self.shared.interrupt(stale).await;
        }
        match self.launcher.launch() {
            Ok(endpoint) => {
                *slot = Some(spawn_reader(Arc::clone(&self.shared), endpoint, generation));
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "interpreter host failed to launch");
                self.shared.status.send_replace(HostStatus::Failed(e.to_string()));
                Err(e)
            }
        }
    }
}

fn spawn_reader(shared: Arc<Shared>, endpoint: HostEndpoint, generation: u64) -> Connection {
    let HostEndpoint { outbound, inbound } = endpoint;
    let reader = tokio::spawn(read_host(shared, inbound, generation));
    Connection { outbound, reader, generation }
}

async fn read_host(shared: Arc<Shared>, mut inbound: mpsc::UnboundedReceiver<String>, generation: u64) {
    while let Some(line) = inbound.recv().await {
        let Some(msg) = HostMessage::parse(&line) else {
            debug!(len = line.len(), "ignoring malformed host message");
            continue;
        };
        match msg {
            HostMessage::Ready => {
                if shared.is_current(generation) {
                    shared.status.send_replace(HostStatus::Ready);
                    info!(generation, "interpreter host ready");
                }
            }
            HostMessage::Result(reply) => {
                let entry = shared.pending.lock().await.remove(&reply.id);
                match entry {
                    Some(p) => {
                        let _ = p.tx.send(reply.into());
                    }
                    None => debug!(id = %reply.id, "discarding reply with no pending request"),
                }
            }
            HostMessage::Error { error } => {
                error!(error = %error, "interpreter host failed");
                if shared.is_current(generation) {
                    shared.status.send_replace(HostStatus::Failed(error));
                }
            }
        }
    }

    if shared.is_current(generation) {
        warn!(generation, "interpreter host exited");
        shared.status.send_if_modified(|status| {
            if matches!(status, HostStatus::Failed(_)) {
                return false;
            }
            *status = HostStatus::Failed("interpreter host exited".into());
            true
        });
        shared.interrupt(generation).await;
    }
}
