/// Runtime tasks — feed frames from a carrier into the protocol core.
///
/// Each task owns one inbox and stops when every sender is gone.
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::handler::BackendHandler;
use crate::orchestrator::Orchestrator;
use crate::registry::InboundFrame;

/// Pump response frames into the orchestrator.
pub fn spawn_coordinator(
    orchestrator: Orchestrator,
    mut inbox: mpsc::UnboundedReceiver<Bytes>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!("coordinator loop started");
        while let Some(frame) = inbox.recv().await {
            orchestrator.on_frame(&frame);
        }
        tracing::debug!("coordinator inbox closed, loop stopped");
    })
}

/// Pump request frames into a node's handler.
pub fn spawn_node(
    handler: BackendHandler,
    mut inbox: mpsc::UnboundedReceiver<InboundFrame>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!(node = handler.node_name(), "node loop started");
        while let Some(InboundFrame { frame, origin }) = inbox.recv().await {
            handler.handle_frame(&frame, origin).await;
        }
        tracing::debug!(node = handler.node_name(), "node inbox closed, loop stopped");
    })
}
