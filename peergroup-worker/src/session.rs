use std::collections::BTreeMap;

use async_trait::async_trait;
use peergroup_topology::{
    Address,
    ControllerId,
    HostPort,
    ReplicaSetMember,
    Topology,
    CONTROLLER_ID_TAG,
};

use crate::error::SessionError;

#[async_trait]
/// The live session of the replicated store.
///
/// The worker owns its session exclusively, no other writer may change the
/// replica set configuration while the worker is running.
pub trait Session: Send + Sync + 'static {
    /// Reads the store's current replica set configuration.
    async fn current_config(&self) -> Result<ReplicaSetConfig, SessionError>;

    /// Writes a new replica set configuration, returning the version the
    /// store acknowledged.
    async fn set_config(&self, config: ReplicaSetConfig) -> Result<u64, SessionError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
/// The replica set configuration document in the store's own shape.
pub struct ReplicaSetConfig {
    pub name: String,
    pub version: u64,
    pub members: Vec<StoreMember>,
}

#[derive(Debug, Clone, PartialEq)]
/// A replica set member as the store describes it.
pub struct StoreMember {
    /// The store's own member id.
    pub id: u64,
    /// The `host:port` the member replicates from.
    pub host: String,
    pub priority: f64,
    pub votes: u8,
    pub tags: BTreeMap<String, String>,
}

impl ReplicaSetConfig {
    /// Builds the store document for a topology.
    pub fn from_topology(name: impl Into<String>, version: u64, topology: &Topology) -> Self {
        let members = topology
            .members()
            .map(|member| StoreMember {
                id: member.id,
                host: member.address.to_string(),
                priority: member.priority() as f64,
                votes: u8::from(member.voting),
                tags: member.tags.clone(),
            })
            .collect();

        Self {
            name: name.into(),
            version,
            members,
        }
    }

    /// Reads the topology described by this document.
    ///
    /// Members are correlated back to their controller through the
    /// controller id tag, falling back to the store id when the tag is missing.
    pub fn to_topology(&self) -> Result<Topology, SessionError> {
        let mut topology = Topology::new();
        for member in &self.members {
            let id = controller_id(member)?;
            let address = parse_host_port(&member.host)?;
            let mut replica = ReplicaSetMember::new(id, address, member.votes > 0);
            replica.tags.extend(member.tags.clone());

            if topology.insert(replica).is_some() {
                return Err(SessionError::Malformed(format!(
                    "controller {} appears more than once",
                    id
                )));
            }
        }

        Ok(topology)
    }
}

fn controller_id(member: &StoreMember) -> Result<ControllerId, SessionError> {
    match member.tags.get(CONTROLLER_ID_TAG) {
        None => Ok(member.id),
        Some(tag) => tag.parse().map_err(|_| {
            SessionError::Malformed(format!(
                "member {} has an invalid {} tag {:?}",
                member.id, CONTROLLER_ID_TAG, tag
            ))
        }),
    }
}

/// Parses a `host:port` or `[v6]:port` pair.
fn parse_host_port(value: &str) -> Result<HostPort, SessionError> {
    let malformed = || SessionError::Malformed(format!("invalid member host {:?}", value));

    let (host, port) = value.rsplit_once(':').ok_or_else(malformed)?;
    let host = host
        .strip_prefix('[')
        .and_then(|host| host.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return Err(malformed());
    }

    let port = port.parse::<u16>().map_err(|_| malformed())?;
    Ok(Address::derive(host).with_port(port))
}
