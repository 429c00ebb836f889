use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use crate::address::{Address, HostPort};
use crate::TopologyError;

/// The stable, cluster assigned identifier of a controller.
///
/// Identifiers are ordered numerically and this order is used for every
/// tie-break the topology computer makes.
pub type ControllerId = u64;

/// The tag used to correlate a replica set member back to its controller.
pub static CONTROLLER_ID_TAG: &str = "controller-id";

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-support", serde(rename_all = "kebab-case"))]
/// The liveness of a controller as last observed.
pub enum MemberStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
/// A controller machine as observed by the snapshot source.
///
/// Observations are immutable, a new snapshot replaces the previous one wholesale.
pub struct ControllerMember {
    pub id: ControllerId,
    pub addresses: Vec<Address>,
    /// If the controller wants to hold the controller role, and therefore a vote.
    pub wants_vote: bool,
    pub status: MemberStatus,
}

impl ControllerMember {
    pub fn new(
        id: ControllerId,
        addresses: Vec<Address>,
        wants_vote: bool,
        status: MemberStatus,
    ) -> Self {
        Self {
            id,
            addresses,
            wants_vote,
            status,
        }
    }

    #[inline]
    pub fn is_healthy(&self) -> bool {
        self.status == MemberStatus::Healthy
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
/// A member of the replicated store's replica set.
pub struct ReplicaSetMember {
    pub id: ControllerId,
    /// The address the other members replicate from.
    pub address: HostPort,
    pub voting: bool,
    pub tags: BTreeMap<String, String>,
}

impl ReplicaSetMember {
    /// Creates a new member tagged with the owning controller's id.
    pub fn new(id: ControllerId, address: HostPort, voting: bool) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert(CONTROLLER_ID_TAG.to_string(), id.to_string());

        Self {
            id,
            address,
            voting,
            tags,
        }
    }

    #[inline]
    /// The election priority exposed to the store.
    pub fn priority(&self) -> u8 {
        if self.voting {
            1
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
/// An ordered set of replica set members keyed by id.
///
/// The number of voters is always derived from the members, it is never
/// stored on its own.
pub struct Topology {
    members: BTreeMap<ControllerId, ReplicaSetMember>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a member, replacing any existing member with the same id.
    pub fn insert(&mut self, member: ReplicaSetMember) -> Option<ReplicaSetMember> {
        self.members.insert(member.id, member)
    }

    pub fn remove(&mut self, id: ControllerId) -> Option<ReplicaSetMember> {
        self.members.remove(&id)
    }

    #[inline]
    pub fn get(&self, id: ControllerId) -> Option<&ReplicaSetMember> {
        self.members.get(&id)
    }

    #[inline]
    pub fn get_mut(&mut self, id: ControllerId) -> Option<&mut ReplicaSetMember> {
        self.members.get_mut(&id)
    }

    #[inline]
    pub fn contains(&self, id: ControllerId) -> bool {
        self.members.contains_key(&id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Iterates over the members in id order.
    pub fn members(&self) -> impl Iterator<Item = &ReplicaSetMember> {
        self.members.values()
    }

    pub fn ids(&self) -> BTreeSet<ControllerId> {
        self.members.keys().copied().collect()
    }

    /// The ids of all voting members.
    pub fn voters(&self) -> BTreeSet<ControllerId> {
        self.members
            .values()
            .filter(|member| member.voting)
            .map(|member| member.id)
            .collect()
    }

    pub fn voter_count(&self) -> usize {
        self.members.values().filter(|member| member.voting).count()
    }

    /// Sets the voting flag of a member, returning `false` if no such member exists.
    pub fn set_voting(&mut self, id: ControllerId, voting: bool) -> bool {
        match self.members.get_mut(&id) {
            Some(member) => {
                member.voting = voting;
                true
            },
            None => false,
        }
    }

    /// Checks the voter count is odd and at least one.
    pub fn validate(&self) -> Result<(), TopologyError> {
        let voters = self.voter_count();
        if voters % 2 == 0 {
            return Err(TopologyError::InvalidVoterCount { voters });
        }

        Ok(())
    }
}

impl FromIterator<ReplicaSetMember> for Topology {
    fn from_iter<T: IntoIterator<Item = ReplicaSetMember>>(iter: T) -> Self {
        Self {
            members: iter.into_iter().map(|member| (member.id, member)).collect(),
        }
    }
}

impl Display for Topology {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, member) in self.members.values().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }

            let marker = if member.voting { "*" } else { "" };
            write!(f, "{}{}@{}", member.id, marker, member.address)?;
        }
        write!(f, "]")
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
/// The last topology known to be written to the store.
pub struct AppliedConfiguration {
    pub topology: Topology,
    /// The configuration version read back from the store.
    pub version: u64,
}

impl AppliedConfiguration {
    pub fn new(topology: Topology, version: u64) -> Self {
        Self { topology, version }
    }
}

/// The number of voters which must remain for a group of `voters` to keep quorum.
///
/// This is `voters / 2 + 1`, the same as `ceil((voters + 1) / 2)`, and applies
/// equally to even sized legacy configurations. An empty group has no quorum to keep.
pub fn majority(voters: usize) -> usize {
    if voters == 0 {
        0
    } else {
        voters / 2 + 1
    }
}
