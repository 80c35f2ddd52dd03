//! In-process fleet over tokio channels.
//!
//! One coordinator inbox for response frames, one inbox per node for request
//! frames. Used by the integration tests and the `fleet-backup` CLI to run
//! the full protocol without a real messaging layer.

use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::registry::{InboundFrame, NodeRegistry, ReturnPath, ReturnPaths};
use crate::types::NodeName;

struct NodeEntry {
    name: NodeName,
    /// `None` for a node that is listed but cannot be reached.
    inbox: Option<mpsc::UnboundedSender<InboundFrame>>,
    /// Whether the node's own link back to the coordinator is up.
    return_link: bool,
}

struct State {
    nodes: Vec<NodeEntry>,
    coordinator: mpsc::UnboundedSender<Bytes>,
}

/// Loopback registry and return-path provider. Cheap to clone.
#[derive(Clone)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<State>>,
}

impl LoopbackNetwork {
    /// Create the network and the coordinator's response inbox.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (coordinator, rx) = mpsc::unbounded_channel();
        let net = Self {
            state: Arc::new(Mutex::new(State {
                nodes: Vec::new(),
                coordinator,
            })),
        };
        (net, rx)
    }

    /// Add a reachable node and return its request inbox. Re-registering a
    /// name replaces the previous inbox.
    pub fn register(&self, name: impl Into<NodeName>) -> mpsc::UnboundedReceiver<InboundFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.upsert(name.into(), Some(tx));
        rx
    }

    /// List a node that cannot be reached: it shows up in `list_nodes` but
    /// every send to it fails.
    pub fn advertise(&self, name: impl Into<NodeName>) {
        self.upsert(name.into(), None);
    }

    /// Drop a node entirely. Returns whether it was known.
    pub fn remove(&self, name: &str) -> bool {
        let mut state = self.state();
        let before = state.nodes.len();
        state.nodes.retain(|n| n.name != name);
        state.nodes.len() != before
    }

    /// Make a node unreachable without unlisting it.
    pub fn disconnect(&self, name: &str) {
        if let Some(entry) = self.state().nodes.iter_mut().find(|n| n.name == name) {
            entry.inbox = None;
        }
    }

    /// Bring a node's return link up or down.
    pub fn set_return_link(&self, name: &str, up: bool) {
        if let Some(entry) = self.state().nodes.iter_mut().find(|n| n.name == name) {
            entry.return_link = up;
        }
    }

    /// The return path owned by `name`, if it is listed.
    pub fn return_path(&self, name: &str) -> Option<Arc<dyn ReturnPath>> {
        let known = self.state().nodes.iter().any(|n| n.name == name);
        known.then(|| self.path_for(name.to_string()))
    }

    fn upsert(&self, name: NodeName, inbox: Option<mpsc::UnboundedSender<InboundFrame>>) {
        let mut state = self.state();
        match state.nodes.iter_mut().find(|n| n.name == name) {
            Some(entry) => entry.inbox = inbox,
            None => state.nodes.push(NodeEntry {
                name,
                inbox,
                return_link: true,
            }),
        }
    }

    fn path_for(&self, node: NodeName) -> Arc<dyn ReturnPath> {
        Arc::new(LoopbackPath {
            net: self.clone(),
            node,
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl NodeRegistry for LoopbackNetwork {
    fn list_nodes(&self) -> Vec<NodeName> {
        self.state().nodes.iter().map(|n| n.name.clone()).collect()
    }

    fn contains(&self, node: &str) -> bool {
        self.state()
            .nodes
            .iter()
            .any(|n| n.name == node && n.inbox.as_ref().is_some_and(|tx| !tx.is_closed()))
    }

    fn send(&self, node: &str, frame: Bytes) -> bool {
        let inbox = self
            .state()
            .nodes
            .iter()
            .find(|n| n.name == node)
            .and_then(|n| n.inbox.clone());
        let Some(inbox) = inbox else {
            return false;
        };
        let origin = Some(self.path_for(node.to_string()));
        inbox.send(InboundFrame { frame, origin }).is_ok()
    }
}

impl ReturnPaths for LoopbackNetwork {
    fn any_return_path(&self) -> Option<Arc<dyn ReturnPath>> {
        let node = {
            let state = self.state();
            if state.coordinator.is_closed() {
                return None;
            }
            state
                .nodes
                .iter()
                .find(|n| n.return_link)
                .map(|n| n.name.clone())
        };
        node.map(|name| self.path_for(name))
    }
}

/// The link from one node back to the coordinator.
struct LoopbackPath {
    net: LoopbackNetwork,
    node: NodeName,
}

impl ReturnPath for LoopbackPath {
    fn is_open(&self) -> bool {
        let state = self.net.state();
        !state.coordinator.is_closed()
            && state
                .nodes
                .iter()
                .any(|n| n.name == self.node && n.return_link)
    }

    fn send(&self, frame: Bytes) -> bool {
        if !self.is_open() {
            return false;
        }
        let coordinator = self.net.state().coordinator.clone();
        coordinator.send(frame).is_ok()
    }

    fn label(&self) -> String {
        format!("loopback:{}", self.node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_in_registration_order() {
        let (net, _rx) = LoopbackNetwork::new();
        let _a = net.register("a");
        net.advertise("ghost");
        let _b = net.register("b");
        assert_eq!(net.list_nodes(), vec!["a", "ghost", "b"]);
        assert!(net.contains("a"));
        assert!(!net.contains("ghost"));
        assert!(!net.contains("nobody"));
    }

    #[test]
    fn send_delivers_with_origin_path() {
        let (net, mut coordinator) = LoopbackNetwork::new();
        let mut inbox = net.register("a");
        assert!(net.send("a", Bytes::from_static(b"req")));

        let inbound = inbox.try_recv().unwrap();
        assert_eq!(&inbound.frame[..], b"req");
        let origin = inbound.origin.unwrap();
        assert_eq!(origin.label(), "loopback:a");
        assert!(origin.send(Bytes::from_static(b"resp")));
        assert_eq!(&coordinator.try_recv().unwrap()[..], b"resp");
    }

    #[test]
    fn unreachable_nodes_refuse_sends() {
        let (net, _rx) = LoopbackNetwork::new();
        net.advertise("ghost");
        assert!(!net.send("ghost", Bytes::from_static(b"x")));
        assert!(!net.send("nobody", Bytes::from_static(b"x")));

        let inbox = net.register("a");
        drop(inbox);
        assert!(!net.contains("a"));
        assert!(!net.send("a", Bytes::from_static(b"x")));
    }

    #[test]
    fn disconnect_and_remove() {
        let (net, _rx) = LoopbackNetwork::new();
        let _a = net.register("a");
        net.disconnect("a");
        assert_eq!(net.list_nodes(), vec!["a"]);
        assert!(!net.contains("a"));
        assert!(net.remove("a"));
        assert!(!net.remove("a"));
        assert!(net.list_nodes().is_empty());
    }

    #[test]
    fn return_link_down_borrows_another() {
        let (net, _rx) = LoopbackNetwork::new();
        let _a = net.register("a");
        let _b = net.register("b");
        net.set_return_link("a", false);

        let own = net.return_path("a").unwrap();
        assert!(!own.is_open());
        assert!(!own.send(Bytes::from_static(b"x")));

        let any = net.any_return_path().unwrap();
        assert_eq!(any.label(), "loopback:b");

        net.set_return_link("b", false);
        assert!(net.any_return_path().is_none());
    }

    #[test]
    fn closed_coordinator_closes_every_path() {
        let (net, rx) = LoopbackNetwork::new();
        let _a = net.register("a");
        drop(rx);
        assert!(net.any_return_path().is_none());
        assert!(!net.return_path("a").unwrap().is_open());
    }
}
