use std::collections::BTreeMap;
use std::time::Duration;

use peergroup_topology::{AddressPolicy, ServingPorts};

use crate::error::ConfigError;
use crate::reconciler::RetryPolicy;

pub static DEFAULT_REPLICA_SET_NAME: &str = "juju";
pub const DEFAULT_MANAGEMENT_PORT: u16 = 37017;
pub const DEFAULT_API_PORT: u16 = 17070;
const DEFAULT_POLL_INTERVAL: Duration = if cfg!(any(test, feature = "test-utils")) {
    Duration::from_secs(1)
} else {
    Duration::from_secs(60)
};

#[derive(Debug, Clone)]
/// The settings a peer group worker is started with.
pub struct WorkerConfig {
    /// The replica set name used until one is read back from the store.
    pub replica_set_name: String,
    /// The ports controllers serve on unless the state reports otherwise.
    pub ports: ServingPorts,
    /// If network topology aware address selection is enabled.
    pub supports_spaces: bool,
    /// The space replica set traffic is restricted to.
    pub ha_space: Option<String>,
    /// How often the controllers are re-observed without a change notification.
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            replica_set_name: DEFAULT_REPLICA_SET_NAME.to_string(),
            ports: ServingPorts {
                management: DEFAULT_MANAGEMENT_PORT,
                api: DEFAULT_API_PORT,
            },
            supports_spaces: false,
            ha_space: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry: RetryPolicy::default(),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ports.management == 0 {
            return Err(ConfigError::ZeroPort("management"));
        }

        if self.ports.api == 0 {
            return Err(ConfigError::ZeroPort("API"));
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("poll interval"));
        }

        self.retry.validate()
    }

    /// The address policy with the given per controller port overrides.
    pub(crate) fn address_policy(
        &self,
        port_overrides: BTreeMap<u64, ServingPorts>,
    ) -> AddressPolicy {
        AddressPolicy {
            ports: self.ports,
            port_overrides,
            supports_spaces: self.supports_spaces,
            ha_space: self.ha_space.clone(),
        }
    }
}
