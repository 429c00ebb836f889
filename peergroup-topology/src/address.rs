use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

use crate::model::{ControllerId, ControllerMember};

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-support", serde(rename_all = "kebab-case"))]
/// The network reachability scope of an address.
pub enum Scope {
    /// Reachable from anywhere.
    Public,
    /// Reachable from within the same cloud / provider network.
    CloudLocal,
    /// Reachable over the fan overlay network.
    FanLocal,
    /// Only reachable from the machine itself, i.e. loopback.
    MachineLocal,
    /// Only reachable from the same link segment.
    LinkLocal,
    /// The scope could not be determined, this is typically a hostname.
    Unknown,
}

impl Scope {
    /// The preference rank of the scope when choosing an internally routable
    /// address, lower is better.
    ///
    /// Machine and link local addresses are never routable between controllers
    /// and have no rank.
    fn internal_rank(self) -> Option<u8> {
        match self {
            Scope::CloudLocal => Some(0),
            Scope::FanLocal => Some(1),
            Scope::Unknown => Some(2),
            Scope::Public => Some(3),
            Scope::MachineLocal | Scope::LinkLocal => None,
        }
    }
}

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
/// A single network address of a controller.
pub struct Address {
    /// The host, either an IP literal or a hostname.
    pub value: String,
    /// How far the address can be reached.
    pub scope: Scope,
    /// The network space the address belongs to, if known.
    #[cfg_attr(feature = "serde-support", serde(default))]
    pub space: Option<String>,
}

impl Address {
    pub fn new(value: impl Into<String>, scope: Scope) -> Self {
        Self {
            value: value.into(),
            scope,
            space: None,
        }
    }

    /// Creates a new address deriving its scope from the value.
    ///
    /// Private ranges are treated as cloud local, `252.0.0.0/8` is the default
    /// fan overlay and anything which is not an IP literal has an unknown scope.
    pub fn derive(value: impl Into<String>) -> Self {
        let value = value.into();
        let scope = derive_scope(&value);
        Self::new(value, scope)
    }

    /// Sets the network space of the address.
    pub fn in_space(mut self, space: impl Into<String>) -> Self {
        self.space = Some(space.into());
        self
    }

    #[inline]
    /// Attaches a port to the address.
    pub fn with_port(&self, port: u16) -> HostPort {
        HostPort {
            address: self.clone(),
            port,
        }
    }
}

fn derive_scope(value: &str) -> Scope {
    let ip = match value.parse::<IpAddr>() {
        Ok(ip) => ip,
        Err(_) => return Scope::Unknown,
    };

    match ip {
        IpAddr::V4(ip) => {
            if ip.is_loopback() {
                Scope::MachineLocal
            } else if ip.is_link_local() {
                Scope::LinkLocal
            } else if ip.octets()[0] == 252 {
                Scope::FanLocal
            } else if ip.is_private() {
                Scope::CloudLocal
            } else {
                Scope::Public
            }
        },
        IpAddr::V6(ip) => {
            let first = ip.segments()[0];
            if ip.is_loopback() {
                Scope::MachineLocal
            } else if first & 0xffc0 == 0xfe80 {
                Scope::LinkLocal
            } else if first & 0xfe00 == 0xfc00 {
                Scope::CloudLocal
            } else {
                Scope::Public
            }
        },
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
/// An address paired with the port a service listens on.
pub struct HostPort {
    pub address: Address,
    pub port: u16,
}

impl HostPort {
    #[inline]
    pub fn host(&self) -> &str {
        &self.address.value
    }
}

// Host ports compare by what a client would dial, the scope and space
// metadata does not make two endpoints different.
impl PartialEq for HostPort {
    fn eq(&self, other: &Self) -> bool {
        self.host() == other.host() && self.port == other.port
    }
}

impl Eq for HostPort {}

impl Hash for HostPort {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host().hash(state);
        self.port.hash(state);
    }
}

impl Ord for HostPort {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.host(), self.port).cmp(&(other.host(), other.port))
    }
}

impl PartialOrd for HostPort {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for HostPort {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.host().contains(':') {
            write!(f, "[{}]:{}", self.host(), self.port)
        } else {
            write!(f, "{}:{}", self.host(), self.port)
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
/// The ports a controller serves on.
pub struct ServingPorts {
    /// The port of the replicated store's management protocol.
    pub management: u16,
    /// The port of the external API server.
    pub api: u16,
}

#[derive(Debug, Clone)]
/// Describes how addresses are chosen for controllers.
pub struct AddressPolicy {
    /// The ports used by any controller without an override.
    pub ports: ServingPorts,
    /// Per controller port overrides reported by the state provider.
    pub port_overrides: BTreeMap<ControllerId, ServingPorts>,
    /// If network topology aware (space aware) selection is enabled.
    pub supports_spaces: bool,
    /// The space replica set traffic must use when space aware selection is enabled.
    pub ha_space: Option<String>,
}

impl AddressPolicy {
    pub fn new(ports: ServingPorts) -> Self {
        Self {
            ports,
            port_overrides: BTreeMap::new(),
            supports_spaces: false,
            ha_space: None,
        }
    }

    /// Restricts replica set addresses to the given space.
    pub fn with_ha_space(mut self, space: impl Into<String>) -> Self {
        self.supports_spaces = true;
        self.ha_space = Some(space.into());
        self
    }

    #[inline]
    pub fn ports_for(&self, id: ControllerId) -> ServingPorts {
        self.port_overrides.get(&id).copied().unwrap_or(self.ports)
    }

    /// The address the replicated store should use to reach the controller.
    ///
    /// Returns `None` if the controller has no resolvable address, in which case
    /// it cannot hold a vote.
    pub fn management_host_port(&self, member: &ControllerMember) -> Option<HostPort> {
        let port = self.ports_for(member.id).management;

        let selected = match (self.supports_spaces, self.ha_space.as_deref()) {
            (true, Some(space)) => select_internal(
                member
                    .addresses
                    .iter()
                    .filter(|addr| addr.space.as_deref() == Some(space)),
            ),
            _ => select_internal(member.addresses.iter()),
        };

        selected.map(|addr| addr.with_port(port))
    }

    /// The address clients should use to reach the controller's API server.
    pub fn api_host_port(&self, member: &ControllerMember) -> Option<HostPort> {
        let port = self.ports_for(member.id).api;
        select_internal(member.addresses.iter()).map(|addr| addr.with_port(port))
    }
}

/// Selects the most internally routable address.
///
/// Addresses are ranked cloud local, fan, unknown and then public. Within a rank
/// the first address observed wins.
pub fn select_internal<'a>(
    addresses: impl IntoIterator<Item = &'a Address>,
) -> Option<&'a Address> {
    addresses
        .into_iter()
        .filter_map(|addr| addr.scope.internal_rank().map(|rank| (rank, addr)))
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, addr)| addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemberStatus;

    fn controller(id: ControllerId, addresses: Vec<Address>) -> ControllerMember {
        ControllerMember::new(id, addresses, true, MemberStatus::Healthy)
    }

    #[test]
    fn test_derive_scope() {
        assert_eq!(Address::derive("10.0.0.1").scope, Scope::CloudLocal);
        assert_eq!(Address::derive("192.168.1.4").scope, Scope::CloudLocal);
        assert_eq!(Address::derive("252.10.0.3").scope, Scope::FanLocal);
        assert_eq!(Address::derive("127.0.0.1").scope, Scope::MachineLocal);
        assert_eq!(Address::derive("169.254.0.9").scope, Scope::LinkLocal);
        assert_eq!(Address::derive("8.8.8.8").scope, Scope::Public);
        assert_eq!(Address::derive("fd00::1").scope, Scope::CloudLocal);
        assert_eq!(Address::derive("fe80::1").scope, Scope::LinkLocal);
        assert_eq!(Address::derive("::1").scope, Scope::MachineLocal);
        assert_eq!(Address::derive("2001:db8::1").scope, Scope::Public);
        assert_eq!(Address::derive("controller-0.internal").scope, Scope::Unknown);
    }

    #[test]
    fn test_select_internal_prefers_cloud_local() {
        let addresses = vec![
            Address::derive("127.0.0.1"),
            Address::derive("54.1.2.3"),
            Address::derive("controller.example.com"),
            Address::derive("10.0.0.5"),
        ];

        let selected = select_internal(&addresses).expect("Address should be selected.");
        assert_eq!(selected.value, "10.0.0.5");
    }

    #[test]
    fn test_select_internal_ignores_unroutable() {
        let addresses = vec![Address::derive("127.0.0.1"), Address::derive("fe80::1")];
        assert!(select_internal(&addresses).is_none());

        let addresses = vec![Address::derive("54.1.2.3"), Address::derive("169.254.1.1")];
        assert_eq!(select_internal(&addresses).unwrap().value, "54.1.2.3");
    }

    #[test]
    fn test_management_address_respects_ha_space() {
        let ports = ServingPorts {
            management: 37017,
            api: 17070,
        };
        let member = controller(
            1,
            vec![
                Address::derive("10.0.0.1").in_space("default"),
                Address::derive("10.1.0.1").in_space("ha"),
            ],
        );

        let policy = AddressPolicy::new(ports);
        let hp = policy.management_host_port(&member).unwrap();
        assert_eq!(hp.to_string(), "10.0.0.1:37017");

        let policy = AddressPolicy::new(ports).with_ha_space("ha");
        let hp = policy.management_host_port(&member).unwrap();
        assert_eq!(hp.to_string(), "10.1.0.1:37017");

        let policy = AddressPolicy::new(ports).with_ha_space("missing");
        assert!(policy.management_host_port(&member).is_none());

        // The API address is not restricted to the HA space.
        let hp = policy.api_host_port(&member).unwrap();
        assert_eq!(hp.to_string(), "10.0.0.1:17070");
    }

    #[test]
    fn test_port_overrides() {
        let mut policy = AddressPolicy::new(ServingPorts {
            management: 37017,
            api: 17070,
        });
        policy.port_overrides.insert(
            2,
            ServingPorts {
                management: 1234,
                api: 5678,
            },
        );

        let member = controller(2, vec![Address::derive("10.0.0.2")]);
        assert_eq!(policy.management_host_port(&member).unwrap().port, 1234);
        assert_eq!(policy.api_host_port(&member).unwrap().port, 5678);

        let member = controller(3, vec![Address::derive("10.0.0.3")]);
        assert_eq!(policy.management_host_port(&member).unwrap().port, 37017);
    }

    #[test]
    fn test_host_port_display_and_order() {
        let v6 = Address::derive("fd00::2").with_port(17070);
        assert_eq!(v6.to_string(), "[fd00::2]:17070");

        let a = Address::new("10.0.0.1", Scope::CloudLocal).with_port(1);
        let b = Address::new("10.0.0.1", Scope::Public).with_port(1);
        assert_eq!(a.cmp(&b), Ordering::Equal);
        assert_eq!(a, b);
        assert!(Address::derive("10.0.0.1").with_port(1) < Address::derive("10.0.0.1").with_port(2));
    }
}
