//! In-memory collaborators for driving the worker without a real store.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use peergroup_topology::{ControllerId, ControllerMember, HostPort, ServingPorts};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::error::{SessionError, StateError};
use crate::publisher::Hub;
use crate::session::{ReplicaSetConfig, Session};
use crate::state::ControllerState;

#[derive(Clone)]
/// A replicated store session held in memory.
///
/// Writes are validated the way a store would, the version must move
/// forward by exactly one and the voter count must be odd. Failures can be
/// scripted ahead of time to exercise retries.
pub struct MemorySession(Arc<MemorySessionInner>);

struct MemorySessionInner {
    config: RwLock<ReplicaSetConfig>,
    history: Mutex<Vec<ReplicaSetConfig>>,
    failures: Mutex<VecDeque<SessionError>>,
    hangs: Mutex<VecDeque<Duration>>,
    reads: AtomicUsize,
}

impl MemorySession {
    /// Creates a session with an empty configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(ReplicaSetConfig {
            name: name.into(),
            version: 0,
            members: Vec::new(),
        })
    }

    /// Creates a session already holding the given configuration.
    pub fn with_config(config: ReplicaSetConfig) -> Self {
        Self(Arc::new(MemorySessionInner {
            config: RwLock::new(config),
            history: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            hangs: Mutex::new(VecDeque::new()),
            reads: AtomicUsize::new(0),
        }))
    }

    /// Makes the next write fail with the given error.
    ///
    /// Calls queue up, each write consumes one failure.
    pub fn fail_next(&self, error: SessionError) {
        self.0.failures.lock().push_back(error);
    }

    /// Makes the next read stall for the given duration before answering.
    pub fn hang_next(&self, duration: Duration) {
        self.0.hangs.lock().push_back(duration);
    }

    /// The configuration currently held.
    pub fn config(&self) -> ReplicaSetConfig {
        self.0.config.read().clone()
    }

    /// Every configuration successfully written, oldest first.
    pub fn history(&self) -> Vec<ReplicaSetConfig> {
        self.0.history.lock().clone()
    }

    /// The number of successful writes.
    pub fn writes(&self) -> usize {
        self.0.history.lock().len()
    }

    /// The number of reads served.
    pub fn reads(&self) -> usize {
        self.0.reads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn current_config(&self) -> Result<ReplicaSetConfig, SessionError> {
        let hang = self.0.hangs.lock().pop_front();
        if let Some(duration) = hang {
            tokio::time::sleep(duration).await;
        }

        self.0.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.config())
    }

    async fn set_config(&self, config: ReplicaSetConfig) -> Result<u64, SessionError> {
        if let Some(error) = self.0.failures.lock().pop_front() {
            return Err(error);
        }

        let voters = config.members.iter().filter(|m| m.votes > 0).count();
        if voters % 2 == 0 {
            return Err(SessionError::Rejected(format!(
                "replica set must have an odd number of voters, got {}",
                voters
            )));
        }

        let mut current = self.0.config.write();
        if config.version != current.version + 1 {
            return Err(SessionError::Rejected(format!(
                "expected version {}, got {}",
                current.version + 1,
                config.version
            )));
        }

        *current = config.clone();
        self.0.history.lock().push(config.clone());
        Ok(config.version)
    }
}

#[derive(Clone)]
/// A controller snapshot source held in memory.
///
/// Every change to the controllers notifies watchers.
pub struct MemoryState(Arc<MemoryStateInner>);

struct MemoryStateInner {
    controllers: RwLock<Vec<ControllerMember>>,
    ports: RwLock<BTreeMap<ControllerId, ServingPorts>>,
    unavailable: AtomicBool,
    changes: watch::Sender<u64>,
}

impl Default for MemoryState {
    fn default() -> Self {
        let (changes, _) = watch::channel(0);
        Self(Arc::new(MemoryStateInner {
            controllers: RwLock::new(Vec::new()),
            ports: RwLock::new(BTreeMap::new()),
            unavailable: AtomicBool::new(false),
            changes,
        }))
    }
}

impl MemoryState {
    /// Replaces the controller snapshot and notifies watchers.
    pub fn set_controllers(&self, controllers: impl IntoIterator<Item = ControllerMember>) {
        *self.0.controllers.write() = controllers.into_iter().collect();
        self.notify();
    }

    /// Overrides the ports a controller serves on.
    pub fn set_serving_ports(&self, id: ControllerId, ports: ServingPorts) {
        self.0.ports.write().insert(id, ports);
        self.notify();
    }

    /// Makes snapshots fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.0.unavailable.store(unavailable, Ordering::Relaxed);
    }

    fn notify(&self) {
        self.0.changes.send_modify(|generation| *generation += 1);
    }
}

#[async_trait]
impl ControllerState for MemoryState {
    async fn controllers(&self) -> Result<Vec<ControllerMember>, StateError> {
        if self.0.unavailable.load(Ordering::Relaxed) {
            return Err(StateError(anyhow!("state is unavailable")));
        }

        Ok(self.0.controllers.read().clone())
    }

    fn watch_controllers(&self) -> BoxStream<'static, ()> {
        WatchStream::new(self.0.changes.subscribe())
            .map(|_| ())
            .boxed()
    }

    fn serving_ports(&self, id: ControllerId) -> Option<ServingPorts> {
        self.0.ports.read().get(&id).copied()
    }
}

#[derive(Clone, Default)]
/// A hub which records everything published to it.
pub struct RecordingHub {
    published: Arc<Mutex<Vec<(String, Vec<HostPort>)>>>,
    fail_next: Arc<AtomicBool>,
}

impl RecordingHub {
    /// Every `(topic, host ports)` pair published, oldest first.
    pub fn published(&self) -> Vec<(String, Vec<HostPort>)> {
        self.published.lock().clone()
    }

    /// Makes the next publish fail.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::Relaxed);
    }
}

impl Hub for RecordingHub {
    fn publish(&self, topic: &str, host_ports: Vec<HostPort>) -> anyhow::Result<()> {
        if self.fail_next.swap(false, Ordering::Relaxed) {
            return Err(anyhow!("hub is not accepting messages"));
        }

        self.published.lock().push((topic.to_string(), host_ports));
        Ok(())
    }
}
