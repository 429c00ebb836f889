use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type Counter = AtomicU64;

#[derive(Debug, Clone, Default)]
/// Live metrics around the peer group worker.
pub struct PeerGroupStatistics(Arc<PeerGroupStatisticsInner>);

impl Deref for PeerGroupStatistics {
    type Target = PeerGroupStatisticsInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Default)]
pub struct PeerGroupStatisticsInner {
    /// The number of members in the applied replica set.
    pub(crate) num_members: Counter,
    /// The number of voters in the applied replica set.
    pub(crate) num_voters: Counter,
    /// The configuration version last read back from the store.
    pub(crate) applied_version: Counter,
    /// The number of completed reconciliation cycles.
    pub(crate) num_cycles: Counter,
    /// The number of topology steps written to the store.
    pub(crate) num_applied_steps: Counter,
    /// The number of store round-trips which failed with a transient error.
    pub(crate) num_transient_failures: Counter,
    /// The number of address lists pushed to the hub.
    pub(crate) num_publishes: Counter,
}

impl PeerGroupStatisticsInner {
    /// The number of members in the applied replica set.
    pub fn num_members(&self) -> u64 {
        self.num_members.load(Ordering::Relaxed)
    }

    /// The number of voters in the applied replica set.
    pub fn num_voters(&self) -> u64 {
        self.num_voters.load(Ordering::Relaxed)
    }

    /// The configuration version last read back from the store.
    pub fn applied_version(&self) -> u64 {
        self.applied_version.load(Ordering::Relaxed)
    }

    /// The number of completed reconciliation cycles.
    pub fn num_cycles(&self) -> u64 {
        self.num_cycles.load(Ordering::Relaxed)
    }

    /// The number of topology steps written to the store.
    pub fn num_applied_steps(&self) -> u64 {
        self.num_applied_steps.load(Ordering::Relaxed)
    }

    /// The number of store round-trips which failed with a transient error.
    pub fn num_transient_failures(&self) -> u64 {
        self.num_transient_failures.load(Ordering::Relaxed)
    }

    /// The number of address lists pushed to the hub.
    pub fn num_publishes(&self) -> u64 {
        self.num_publishes.load(Ordering::Relaxed)
    }
}
