//! # Peer Group Topology
//!
//! The data model shared by the peer group reconciler and the pure function
//! which decides how the replica set should change next.
//!
//! The replica set is never moved straight to its ideal shape, instead each
//! call to [compute_next_step] produces a single step which keeps an odd
//! number of voters and retains a majority of the previous voters. Feeding the
//! applied result back in converges on the ideal topology.
//!
//! ### Basic Example
//! ```rust
//! use peergroup_topology::{
//!     compute_next_step,
//!     Address,
//!     AddressPolicy,
//!     AppliedConfiguration,
//!     ControllerMember,
//!     MemberStatus,
//!     ServingPorts,
//!     StepOutcome,
//! };
//!
//! let policy = AddressPolicy::new(ServingPorts { management: 37017, api: 17070 });
//! let controllers = (0..3)
//!     .map(|id| {
//!         let addr = Address::derive(format!("10.0.0.{}", id + 1));
//!         ControllerMember::new(id, vec![addr], true, MemberStatus::Healthy)
//!     })
//!     .collect::<Vec<_>>();
//!
//! // With nothing applied yet, all three controllers become voters.
//! let step = match compute_next_step(&controllers, None, &policy).unwrap() {
//!     StepOutcome::Next(step) => step,
//!     other => panic!("unexpected outcome {:?}", other),
//! };
//! assert_eq!(step.topology.voter_count(), 3);
//!
//! // Once applied there is nothing left to do.
//! let applied = AppliedConfiguration::new(step.topology, 1);
//! let outcome = compute_next_step(&controllers, Some(&applied), &policy).unwrap();
//! assert_eq!(outcome, StepOutcome::Unchanged);
//! ```

mod address;
mod computer;
mod error;
mod model;

pub use address::{select_internal, Address, AddressPolicy, HostPort, Scope, ServingPorts};
pub use computer::{check_quorum, compute_next_step, Deferral, Step, StepKind, StepOutcome};
pub use error::TopologyError;
pub use model::{
    majority,
    AppliedConfiguration,
    ControllerId,
    ControllerMember,
    MemberStatus,
    ReplicaSetMember,
    Topology,
    CONTROLLER_ID_TAG,
};
