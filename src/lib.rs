//! # Peer Group
//! Keeps the replica set of a replicated store in line with the controller
//! machines of a cluster, one quorum-safe step at a time.
//!
//! This is a convenience package which includes all of the sub-projects,
//! realistically you probably only want one of these:
//!
//! ### Features
//! - `peergroup_topology` - The replica set data model and the pure topology computer.
//! - `peergroup_worker` - The worker which applies topology steps to a live store
//!   session and publishes controller API addresses.
//! - `test-utils` - In-memory collaborators for driving the worker in tests.
//! - `serde` - Serialization support for the topology data model.

#[cfg(feature = "peergroup-topology")]
pub use peergroup_topology as topology;
#[cfg(feature = "peergroup-worker")]
pub use peergroup_worker as worker;
