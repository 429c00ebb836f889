mod scenario;

#[macro_use]
extern crate tracing;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use peergroup::topology::HostPort;
use peergroup::worker::test_utils::{MemorySession, MemoryState};
use peergroup::worker::{
    Hub,
    PeerGroupStatistics,
    PeerGrouperBuilder,
    PeerGrouperHandle,
    RetryPolicy,
    SessionError,
};
use serde_json::json;

use crate::scenario::Scenario;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args: Args = Args::parse();

    let scenario = match &args.scenario {
        Some(path) => Scenario::load(path)?,
        None => Scenario::builtin()?,
    };

    let state = MemoryState::default();
    let session = MemorySession::new(args.replica_set.clone());

    let mut builder = PeerGrouperBuilder::new(state.clone(), session.clone(), LoggingHub)
        .with_ports(scenario.ports.management, scenario.ports.api)
        .with_poll_interval(Duration::from_millis(args.poll_interval_ms))
        .with_retry_policy(RetryPolicy {
            max_attempts: args.max_attempts,
            ..RetryPolicy::default()
        });
    if let Some(space) = &scenario.ha_space {
        builder = builder.with_ha_space(space.clone());
    }

    let handle = builder.start()?;
    let stats = handle.statistics();

    for phase in &scenario.phases {
        info!(
            phase = %phase.name,
            num_controllers = phase.controllers.len(),
            transient_failures = phase.transient_failures,
            "Starting phase."
        );

        for _ in 0..phase.transient_failures {
            session.fail_next(SessionError::Electing);
        }
        state.set_controllers(
            phase
                .controllers
                .iter()
                .map(|spec| spec.to_member(scenario.ha_space.as_deref())),
        );

        if !settle(&handle, &stats).await {
            handle.wait().await?;
            anyhow::bail!("Worker stopped before the scenario completed.");
        }

        let config = session.config();
        let topology = config.to_topology()?;
        let summary = json!({
            "phase": phase.name,
            "version": config.version,
            "topology": topology.to_string(),
            "voters": topology.voters(),
            "applied_steps": stats.num_applied_steps(),
            "transient_failures": stats.num_transient_failures(),
            "publishes": stats.num_publishes(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    handle.kill();
    handle.wait().await?;

    Ok(())
}

/// Waits for two full cycles so the latest snapshot has been acted on,
/// returning `false` if the worker exits first.
async fn settle(handle: &PeerGrouperHandle, stats: &PeerGroupStatistics) -> bool {
    let target = stats.num_cycles() + 2;
    while stats.num_cycles() < target {
        if handle.is_finished() {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    true
}

/// A hub which logs every message it is given.
struct LoggingHub;

impl Hub for LoggingHub {
    fn publish(&self, topic: &str, host_ports: Vec<HostPort>) -> Result<()> {
        let host_ports = host_ports.iter().map(HostPort::to_string).collect::<Vec<_>>();
        info!(topic = topic, host_ports = ?host_ports, "Hub message published.");
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[arg(long)]
    /// A JSON scenario file to run.
    ///
    /// The built-in scenario is used when not provided.
    scenario: Option<PathBuf>,

    #[arg(long, default_value = "juju")]
    /// The name of the simulated replica set.
    replica_set: String,

    #[arg(long, default_value_t = 250)]
    /// How often the worker re-observes controllers without a notification.
    poll_interval_ms: u64,

    #[arg(long, default_value_t = 5)]
    /// The number of store attempts made per cycle.
    max_attempts: u32,
}
