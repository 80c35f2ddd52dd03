//! Seams between the protocol core and whatever actually carries frames.
//!
//! In production these are implemented by the host's messaging layer.
//! In tests and the CLI: by [`LoopbackNetwork`](crate::loopback::LoopbackNetwork).

use std::sync::Arc;

use bytes::Bytes;

use crate::types::NodeName;

/// Coordinator-side view of the fleet.
///
/// Sends are fire-and-forget: `send` returns as soon as the frame is handed
/// off, never waiting for delivery.
pub trait NodeRegistry: Send + Sync {
    /// Names of every node currently listed, in a stable order.
    fn list_nodes(&self) -> Vec<NodeName>;

    /// Whether `node` is present and addressable right now.
    fn contains(&self, node: &str) -> bool;

    /// Hand a request frame to `node`. `false` if unknown or unreachable.
    fn send(&self, node: &str, frame: Bytes) -> bool;
}

/// A channel a node can use to get a response frame back to the coordinator.
pub trait ReturnPath: Send + Sync {
    /// Whether the path can still carry a frame.
    fn is_open(&self) -> bool;

    /// Send a response frame. `false` if the path closed in the meantime.
    fn send(&self, frame: Bytes) -> bool;

    /// Short label for logs.
    fn label(&self) -> String;
}

/// Node-side source of return paths.
///
/// Responses carry the session id, so the coordinator does not care which
/// path delivers them: any open one will do.
pub trait ReturnPaths: Send + Sync {
    fn any_return_path(&self) -> Option<Arc<dyn ReturnPath>>;
}

/// A request frame as it reaches a node, with the path it came in on.
#[derive(Clone)]
pub struct InboundFrame {
    pub frame: Bytes,
    /// The direct way back to the sender, if the carrier has one.
    pub origin: Option<Arc<dyn ReturnPath>>,
}

impl std::fmt::Debug for InboundFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundFrame")
            .field("len", &self.frame.len())
            .field("origin", &self.origin.as_ref().map(|p| p.label()))
            .finish()
    }
}
