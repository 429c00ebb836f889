use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use peergroup_topology::{ControllerId, ControllerMember, ServingPorts};

use crate::error::StateError;

#[async_trait]
/// The source of controller snapshots.
pub trait ControllerState: Send + Sync + 'static {
    /// Takes a fresh snapshot of every controller machine.
    async fn controllers(&self) -> Result<Vec<ControllerMember>, StateError>;

    /// A stream which yields whenever the controllers may have changed.
    ///
    /// Notifications carry no data, the worker always takes a fresh snapshot.
    fn watch_controllers(&self) -> BoxStream<'static, ()>;

    /// The ports a specific controller serves on, if they differ from the
    /// worker's configured ports.
    fn serving_ports(&self, _id: ControllerId) -> Option<ServingPorts> {
        None
    }
}

/// Forwards change notifications into the worker's coalescing channel.
///
/// The channel holds a single pending notification, anything arriving while
/// one is pending is dropped as the worker will observe it anyway.
pub(crate) async fn forward_changes(
    mut changes: BoxStream<'static, ()>,
    tx: flume::Sender<()>,
) {
    while changes.next().await.is_some() {
        match tx.try_send(()) {
            Ok(()) | Err(flume::TrySendError::Full(())) => continue,
            Err(flume::TrySendError::Disconnected(())) => break,
        }
    }

    debug!("Controller change watcher has ended.");
}
