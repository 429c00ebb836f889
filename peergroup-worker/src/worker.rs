use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use peergroup_topology::{
    compute_next_step,
    AddressPolicy,
    AppliedConfiguration,
    ControllerMember,
    Step,
    StepOutcome,
};
use tokio::sync::watch;

use crate::clock::Clock;
use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::publisher::{AddressPublisher, Hub};
use crate::reconciler::{ApplyOutcome, SessionReconciler};
use crate::session::Session;
use crate::state::ControllerState;
use crate::statistics::PeerGroupStatistics;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
/// The states of the worker's reconciliation cycle.
pub enum WorkerState {
    /// Waiting for a change notification or the poll timer.
    Idle,
    /// Taking a fresh controller snapshot.
    Observing,
    /// Working out the next topology step.
    Computing,
    /// Writing the next step to the store.
    Applying,
    /// Announcing the controller API addresses.
    Publishing,
    /// A stop was requested, the worker exits.
    Stopped,
}

impl Display for WorkerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkerState::Idle => "idle",
            WorkerState::Observing => "observing",
            WorkerState::Computing => "computing",
            WorkerState::Applying => "applying",
            WorkerState::Publishing => "publishing",
            WorkerState::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// The single owner of the applied configuration and the store session.
pub(crate) struct PeerGrouper<St, S, H> {
    pub(crate) state: St,
    pub(crate) reconciler: SessionReconciler<S>,
    pub(crate) publisher: AddressPublisher<H>,
    pub(crate) config: WorkerConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) statistics: PeerGroupStatistics,
    pub(crate) changes: flume::Receiver<()>,
    pub(crate) stop: watch::Receiver<bool>,
}

/// The per cycle values carried between states.
struct Cycle {
    controllers: Vec<ControllerMember>,
    policy: AddressPolicy,
    pending: Option<Step>,
}

impl<St, S, H> PeerGrouper<St, S, H>
where
    St: ControllerState,
    S: Session,
    H: Hub,
{
    /// Runs cycles until a stop is requested or a fatal error occurs.
    pub(crate) async fn run(mut self) -> Result<(), WorkerError> {
        let mut applied = None;
        let mut watcher_open = true;
        let mut cycle = Cycle {
            controllers: Vec::new(),
            policy: self.config.address_policy(BTreeMap::new()),
            pending: None,
        };

        info!(
            replica_set = %self.config.replica_set_name,
            management_port = self.config.ports.management,
            api_port = self.config.ports.api,
            ha_space = ?self.config.ha_space,
            "Peer group worker started."
        );

        let mut current = WorkerState::Observing;
        let result = loop {
            let stop_requested = *self.stop.borrow();
            let next = match current {
                WorkerState::Stopped => break Ok(()),
                _ if stop_requested => WorkerState::Stopped,
                WorkerState::Idle => self.idle(&mut watcher_open).await,
                WorkerState::Observing => self.observe(&mut cycle, &mut applied).await?,
                WorkerState::Computing => self.compute(&mut cycle, applied.as_ref())?,
                WorkerState::Applying => self.apply(&mut cycle, &mut applied).await?,
                WorkerState::Publishing => {
                    self.publisher.publish(&cycle.controllers, &cycle.policy);
                    self.statistics.num_cycles.fetch_add(1, Ordering::Relaxed);
                    WorkerState::Idle
                },
            };

            if next != current {
                debug!(from = %current, to = %next, "Worker state transition.");
            }
            current = next;
        };

        info!("Peer group worker stopped.");
        result
    }

    async fn idle(&mut self, watcher_open: &mut bool) -> WorkerState {
        tokio::select! {
            _ = crate::wait_for_stop(&mut self.stop) => WorkerState::Stopped,
            change = self.changes.recv_async(), if *watcher_open => {
                if change.is_err() {
                    warn!("Controller change watcher closed, relying on the poll timer.");
                    *watcher_open = false;
                }
                WorkerState::Observing
            },
            _ = self.clock.sleep(self.config.poll_interval) => WorkerState::Observing,
        }
    }

    async fn observe(
        &mut self,
        cycle: &mut Cycle,
        applied: &mut Option<AppliedConfiguration>,
    ) -> Result<WorkerState, WorkerError> {
        if applied.is_none() {
            match self.reconciler.load().await {
                Ok(loaded) => {
                    info!(
                        version = loaded.version,
                        topology = %loaded.topology,
                        "Loaded replica set configuration from the store."
                    );
                    self.record_applied(&loaded);
                    *applied = Some(loaded);
                },
                Err(e) if e.is_transient() => {
                    warn!(
                        error = %e,
                        "Failed to read replica set configuration, retrying next cycle."
                    );
                    return Ok(WorkerState::Idle);
                },
                Err(e) => return Err(WorkerError::Session(e)),
            }
        }

        let controllers = match self.state.controllers().await {
            Ok(controllers) => controllers,
            Err(e) => {
                warn!(error = %e, "Failed to observe controllers, retrying next cycle.");
                return Ok(WorkerState::Idle);
            },
        };

        let overrides = controllers
            .iter()
            .filter_map(|c| self.state.serving_ports(c.id).map(|ports| (c.id, ports)))
            .collect();

        cycle.policy = self.config.address_policy(overrides);
        cycle.controllers = controllers;
        Ok(WorkerState::Computing)
    }

    fn compute(
        &self,
        cycle: &mut Cycle,
        applied: Option<&AppliedConfiguration>,
    ) -> Result<WorkerState, WorkerError> {
        let outcome = compute_next_step(&cycle.controllers, applied, &cycle.policy)
            .map_err(|e| {
                error!(
                    error = %e,
                    num_controllers = cycle.controllers.len(),
                    "No safe topology can be produced, stopping worker."
                );
                e
            })?;

        match outcome {
            StepOutcome::Next(step) => {
                info!(
                    step = %step.kind,
                    topology = %step.topology,
                    address_updates = ?step.address_updates,
                    "Applying next peer group step."
                );
                cycle.pending = Some(step);
                Ok(WorkerState::Applying)
            },
            StepOutcome::Deferred(reason) => {
                warn!(reason = %reason, "Peer group change deferred.");
                Ok(WorkerState::Publishing)
            },
            StepOutcome::Unchanged => Ok(WorkerState::Publishing),
        }
    }

    async fn apply(
        &mut self,
        cycle: &mut Cycle,
        applied: &mut Option<AppliedConfiguration>,
    ) -> Result<WorkerState, WorkerError> {
        let step = match cycle.pending.take() {
            Some(step) => step,
            None => return Ok(WorkerState::Publishing),
        };

        match self.reconciler.apply(&step.topology, &mut self.stop).await {
            Ok(ApplyOutcome::Applied(confirmed)) => {
                info!(
                    version = confirmed.version,
                    voters = confirmed.topology.voter_count(),
                    "Applied peer group step."
                );
                self.statistics
                    .num_applied_steps
                    .fetch_add(1, Ordering::Relaxed);
                self.record_applied(&confirmed);
                *applied = Some(confirmed);
                Ok(WorkerState::Observing)
            },
            Ok(ApplyOutcome::Exhausted { attempts }) => {
                warn!(
                    attempts = attempts,
                    "Giving up on the peer group step until the next cycle."
                );
                // A write may have landed without being confirmed.
                *applied = None;
                Ok(WorkerState::Publishing)
            },
            Ok(ApplyOutcome::Cancelled) => Ok(WorkerState::Stopped),
            Err(e) => {
                error!(
                    error = %e,
                    topology = %step.topology,
                    step = %step.kind,
                    "Replica set configuration was refused, stopping worker."
                );
                Err(WorkerError::Session(e))
            },
        }
    }

    fn record_applied(&self, applied: &AppliedConfiguration) {
        let topology = &applied.topology;
        self.statistics
            .num_members
            .store(topology.len() as u64, Ordering::Relaxed);
        self.statistics
            .num_voters
            .store(topology.voter_count() as u64, Ordering::Relaxed);
        self.statistics
            .applied_version
            .store(applied.version, Ordering::Relaxed);
    }
}
