//! # Peer Group Worker
//!
//! Keeps the replica set of a replicated store in line with the controller
//! machines of a cluster, and announces the controllers' API addresses to the
//! rest of the system.
//!
//! The worker is a single task which exclusively owns the store session.
//! Each cycle it observes the controllers, computes the next safe topology
//! step, applies it and loops straight back until nothing is left to do,
//! after which the API addresses are published if they changed. Cycles are
//! triggered by change notifications from the [ControllerState] and by a
//! poll timer so drift is still corrected without a notification.
//!
//! ### Basic Example
//! ```rust
//! use peergroup_worker::test_utils::{MemorySession, MemoryState, RecordingHub};
//! use peergroup_worker::PeerGrouperBuilder;
//! use peergroup_topology::{Address, ControllerMember, MemberStatus};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let state = MemoryState::default();
//! state.set_controllers((0..3).map(|id| {
//!     let addr = Address::derive(format!("10.0.0.{}", id + 1));
//!     ControllerMember::new(id, vec![addr], true, MemberStatus::Healthy)
//! }));
//!
//! let session = MemorySession::new("juju");
//! let handle = PeerGrouperBuilder::new(state, session.clone(), RecordingHub::default())
//!     .start()?;
//!
//! // Wait for the first cycle to complete.
//! while handle.statistics().num_cycles() == 0 {
//!     tokio::time::sleep(std::time::Duration::from_millis(10)).await;
//! }
//! assert_eq!(handle.statistics().num_voters(), 3);
//!
//! handle.kill();
//! handle.wait().await?;
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate tracing;

mod clock;
mod config;
mod error;
mod publisher;
mod reconciler;
mod session;
mod state;
mod statistics;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
mod worker;

use std::sync::Arc;

pub use clock::{Clock, TokioClock};
pub use config::{
    WorkerConfig,
    DEFAULT_API_PORT,
    DEFAULT_MANAGEMENT_PORT,
    DEFAULT_REPLICA_SET_NAME,
};
pub use error::{ConfigError, SessionError, StateError, WorkerError};
pub use publisher::{AddressPublisher, Hub, API_HOST_PORTS_TOPIC};
pub use reconciler::{ApplyOutcome, Backoff, RetryPolicy, SessionReconciler};
pub use session::{ReplicaSetConfig, Session, StoreMember};
pub use state::ControllerState;
pub use statistics::PeerGroupStatistics;
use tokio::sync::watch;
use tokio::task::JoinHandle;
pub use worker::WorkerState;

use crate::worker::PeerGrouper;

/// Build a peer group worker from its collaborators.
pub struct PeerGrouperBuilder<St, S, H> {
    state: St,
    session: S,
    hub: H,
    clock: Arc<dyn Clock>,
    config: WorkerConfig,
}

impl<St, S, H> PeerGrouperBuilder<St, S, H>
where
    St: ControllerState,
    S: Session,
    H: Hub,
{
    /// Create a new builder using the default configuration and the tokio clock.
    pub fn new(state: St, session: S, hub: H) -> Self {
        Self {
            state,
            session,
            hub,
            clock: Arc::new(TokioClock),
            config: WorkerConfig::default(),
        }
    }

    /// Replace the whole worker configuration.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the time source used for timers, backoff and timeouts.
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Set the ports controllers serve the store and the API on.
    pub fn with_ports(mut self, management: u16, api: u16) -> Self {
        self.config.ports.management = management;
        self.config.ports.api = api;
        self
    }

    /// Restrict replica set traffic to the given network space.
    pub fn with_ha_space(mut self, space: impl Into<String>) -> Self {
        self.config.supports_spaces = true;
        self.config.ha_space = Some(space.into());
        self
    }

    /// Set how often controllers are re-observed without a notification.
    pub fn with_poll_interval(mut self, interval: std::time::Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set how transient store failures are retried.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Validates the configuration and spawns the worker onto the current
    /// tokio runtime.
    ///
    /// The returned handle is the only way to stop the worker, dropping it
    /// also stops the worker once the current step has been drained.
    pub fn start(self) -> Result<PeerGrouperHandle, ConfigError> {
        self.config.validate()?;

        let statistics = PeerGroupStatistics::default();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (changes_tx, changes_rx) = flume::bounded(1);

        let watcher = tokio::spawn(state::forward_changes(
            self.state.watch_controllers(),
            changes_tx,
        ));

        let reconciler = SessionReconciler::new(
            self.session,
            self.config.replica_set_name.clone(),
            self.config.retry.clone(),
            self.clock.clone(),
            statistics.clone(),
        );
        let publisher = AddressPublisher::new(self.hub, statistics.clone());

        let worker = PeerGrouper {
            state: self.state,
            reconciler,
            publisher,
            config: self.config,
            clock: self.clock,
            statistics: statistics.clone(),
            changes: changes_rx,
            stop: stop_rx,
        };

        let task = tokio::spawn(async move {
            let result = worker.run().await;
            watcher.abort();
            if let Err(e) = &result {
                error!(error = %e, "Peer group worker has stopped due to a fatal error.");
            }
            result
        });

        Ok(PeerGrouperHandle {
            stop: stop_tx,
            task,
            statistics,
        })
    }
}

/// A handle to a running peer group worker.
pub struct PeerGrouperHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<Result<(), WorkerError>>,
    statistics: PeerGroupStatistics,
}

impl PeerGrouperHandle {
    /// Requests the worker to stop.
    ///
    /// A store write in progress is completed first.
    pub fn kill(&self) {
        let _ = self.stop.send(true);
    }

    #[inline]
    /// Gets the live worker statistics.
    pub fn statistics(&self) -> PeerGroupStatistics {
        self.statistics.clone()
    }

    /// If the worker task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the worker to exit, returning the fatal error which stopped it if any.
    pub async fn wait(self) -> Result<(), WorkerError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(WorkerError::Crashed(e.to_string())),
        }
    }
}

/// Completes once a stop is requested or the stop sender is gone.
pub(crate) async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }

        if stop.changed().await.is_err() {
            return;
        }
    }
}
