use peergroup_topology::{Address, ServingPorts};

/// The ports every test controller serves on.
pub const TEST_PORTS: ServingPorts = ServingPorts {
    management: 37017,
    api: 17070,
};

/// A cloud local address unique to the given controller.
pub fn cloud_addr(id: u64) -> Address {
    Address::derive(format!("10.0.{}.{}", id / 250, id % 250 + 1))
}

/// A public address unique to the given controller.
pub fn public_addr(id: u64) -> Address {
    Address::derive(format!("54.0.{}.{}", id / 250, id % 250 + 1))
}

#[cfg(test)]
mod tests {
    use peergroup_topology::Scope;

    use super::*;

    #[test]
    fn test_addresses_are_unique_and_scoped() {
        assert_eq!(cloud_addr(0).value, "10.0.0.1");
        assert_eq!(cloud_addr(250).value, "10.0.1.1");
        assert_eq!(cloud_addr(3).scope, Scope::CloudLocal);
        assert_eq!(public_addr(3).scope, Scope::Public);
    }
}
