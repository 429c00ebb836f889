use std::collections::BTreeSet;
use std::sync::atomic::Ordering;

use peergroup_topology::{AddressPolicy, ControllerMember, HostPort};

use crate::statistics::PeerGroupStatistics;

/// The hub topic carrying the API addresses of the controllers.
pub static API_HOST_PORTS_TOPIC: &str = "apiserver.host-ports";

/// A publish/subscribe channel other components learn of address changes from.
///
/// Subscribers must tolerate the same list being delivered more than once.
pub trait Hub: Send + Sync + 'static {
    fn publish(&self, topic: &str, host_ports: Vec<HostPort>) -> anyhow::Result<()>;
}

/// Announces the API addresses of the controllers whenever the set changes.
pub struct AddressPublisher<H> {
    hub: H,
    last_published: Option<BTreeSet<HostPort>>,
    statistics: PeerGroupStatistics,
}

impl<H> AddressPublisher<H>
where
    H: Hub,
{
    pub fn new(hub: H, statistics: PeerGroupStatistics) -> Self {
        Self {
            hub,
            last_published: None,
            statistics,
        }
    }

    /// Publishes the API addresses of `controllers` if they differ from the
    /// last published set, returning if a publish happened.
    pub fn publish(
        &mut self,
        controllers: &[ControllerMember],
        policy: &AddressPolicy,
    ) -> bool {
        let host_ports = controllers
            .iter()
            .filter(|controller| controller.wants_vote)
            .filter_map(|controller| policy.api_host_port(controller))
            .collect::<BTreeSet<_>>();

        if host_ports.is_empty() {
            warn!(
                num_controllers = controllers.len(),
                "No controller has a usable API address, nothing to publish."
            );
            return false;
        }

        if self.last_published.as_ref() == Some(&host_ports) {
            return false;
        }

        let list = host_ports.iter().cloned().collect::<Vec<_>>();
        let shown = list.iter().map(HostPort::to_string).collect::<Vec<_>>();
        if let Err(e) = self.hub.publish(API_HOST_PORTS_TOPIC, list) {
            warn!(error = ?e, "Failed to publish API addresses, retrying next cycle.");
            return false;
        }

        info!(host_ports = ?shown, "Published API addresses.");
        self.statistics.num_publishes.fetch_add(1, Ordering::Relaxed);
        self.last_published = Some(host_ports);
        true
    }
}

#[cfg(test)]
mod tests {
    use peergroup_topology::{Address, MemberStatus, ServingPorts};

    use super::*;
    use crate::test_utils::RecordingHub;

    fn policy() -> AddressPolicy {
        AddressPolicy::new(ServingPorts {
            management: 37017,
            api: 17070,
        })
    }

    fn controller(id: u64, addresses: &[&str]) -> ControllerMember {
        let addresses = addresses.iter().map(|addr| Address::derive(*addr)).collect();
        ControllerMember::new(id, addresses, true, MemberStatus::Healthy)
    }

    #[test]
    fn test_publishes_only_changes() {
        let hub = RecordingHub::default();
        let mut publisher = AddressPublisher::new(hub.clone(), PeerGroupStatistics::default());

        let controllers = [
            controller(1, &["54.1.1.1", "10.0.0.1"]),
            controller(2, &["10.0.0.2"]),
        ];
        assert!(publisher.publish(&controllers, &policy()));
        assert!(!publisher.publish(&controllers, &policy()));

        // Observation order does not matter.
        let reordered = [controllers[1].clone(), controllers[0].clone()];
        assert!(!publisher.publish(&reordered, &policy()));

        let published = hub.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, API_HOST_PORTS_TOPIC);
        let hosts = published[0].1.iter().map(HostPort::to_string).collect::<Vec<_>>();
        assert_eq!(hosts, vec!["10.0.0.1:17070", "10.0.0.2:17070"]);

        let moved = [controller(1, &["10.0.0.9"]), controllers[1].clone()];
        assert!(publisher.publish(&moved, &policy()));
        assert_eq!(hub.published().len(), 2);
        assert_eq!(publisher.statistics.num_publishes(), 2);
    }

    #[test]
    fn test_empty_lists_are_not_published() {
        let hub = RecordingHub::default();
        let mut publisher = AddressPublisher::new(hub.clone(), PeerGroupStatistics::default());

        let mut leaving = controller(1, &["10.0.0.1"]);
        leaving.wants_vote = false;
        let hidden = controller(2, &["127.0.0.1"]);

        assert!(!publisher.publish(&[leaving, hidden], &policy()));
        assert!(hub.published().is_empty());
    }

    #[test]
    fn test_failed_publish_is_retried() {
        let hub = RecordingHub::default();
        let mut publisher = AddressPublisher::new(hub.clone(), PeerGroupStatistics::default());
        let controllers = [controller(1, &["10.0.0.1"])];

        hub.fail_next();
        assert!(!publisher.publish(&controllers, &policy()));
        assert!(publisher.publish(&controllers, &policy()));
        assert_eq!(hub.published().len(), 1);
    }
}
