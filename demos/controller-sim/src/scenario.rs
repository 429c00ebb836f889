use std::path::Path;

use anyhow::{Context, Result};
use peergroup::topology::{
    Address,
    ControllerId,
    ControllerMember,
    MemberStatus,
    ServingPorts,
};
use serde::Deserialize;

static BUILTIN_SCENARIO: &str = include_str!("../scenarios/grow-and-replace.json");

#[derive(Debug, Deserialize)]
/// A sequence of controller snapshots the worker is driven through.
pub struct Scenario {
    #[serde(default = "default_ports")]
    pub ports: ServingPorts,

    #[serde(default)]
    /// The space replica set traffic is restricted to.
    pub ha_space: Option<String>,

    pub phases: Vec<Phase>,
}

#[derive(Debug, Deserialize)]
pub struct Phase {
    pub name: String,
    pub controllers: Vec<ControllerSpec>,

    #[serde(default)]
    /// The number of store writes which fail with a transient error during the phase.
    pub transient_failures: usize,
}

#[derive(Debug, Deserialize)]
pub struct ControllerSpec {
    pub id: ControllerId,

    #[serde(default)]
    pub addresses: Vec<String>,

    #[serde(default)]
    /// Addresses which belong to the scenario's HA space.
    pub ha_addresses: Vec<String>,

    #[serde(default = "default_wants_vote")]
    pub wants_vote: bool,

    #[serde(default = "default_status")]
    pub status: MemberStatus,
}

impl ControllerSpec {
    pub fn to_member(&self, ha_space: Option<&str>) -> ControllerMember {
        let mut addresses = self
            .addresses
            .iter()
            .map(|addr| Address::derive(addr.as_str()))
            .collect::<Vec<_>>();

        for addr in &self.ha_addresses {
            let addr = Address::derive(addr.as_str());
            addresses.push(match ha_space {
                Some(space) => addr.in_space(space),
                None => addr,
            });
        }

        ControllerMember::new(self.id, addresses, self.wants_vote, self.status)
    }
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        Self::parse(&raw)
    }

    pub fn builtin() -> Result<Self> {
        Self::parse(BUILTIN_SCENARIO)
    }

    fn parse(raw: &str) -> Result<Self> {
        let scenario: Scenario =
            serde_json::from_str(raw).context("Failed to parse scenario")?;
        if scenario.phases.is_empty() {
            anyhow::bail!("Scenario must contain at least one phase.");
        }
        Ok(scenario)
    }
}

fn default_ports() -> ServingPorts {
    ServingPorts {
        management: 37017,
        api: 17070,
    }
}

fn default_wants_vote() -> bool {
    true
}

fn default_status() -> MemberStatus {
    MemberStatus::Healthy
}
