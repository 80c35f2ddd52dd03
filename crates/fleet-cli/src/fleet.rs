/// Simulated fleet — in-process nodes behind a loopback network.
///
/// Each node runs the real request handler over a fake backup subsystem
/// whose duration and size are randomized around `--backup-ms`.
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fleet_protocol::{
    spawn_node, BackendHandler, BackupOutcome, BackupSubsystem, FleetProtocolError, InboundFrame,
    LocalStatus, LoopbackNetwork,
};
use rand::Rng;
use tokio::sync::mpsc;

/// How the simulated fleet is laid out.
#[derive(Debug, Clone, Default)]
pub struct FleetPlan {
    pub nodes: Vec<String>,
    pub fail: Vec<String>,
    pub silent: Vec<String>,
    pub missing: Vec<String>,
    pub unavailable: Vec<String>,
    pub backup_ms: u64,
}

pub struct SimulatedFleet {
    pub net: LoopbackNetwork,
    /// Response frames for the coordinator.
    pub coordinator_rx: mpsc::UnboundedReceiver<Bytes>,
    /// Inboxes of silent nodes, held so their sends still succeed.
    _silent: Vec<mpsc::UnboundedReceiver<InboundFrame>>,
}

impl SimulatedFleet {
    /// Register every planned node and start its handler. Must run inside a
    /// tokio runtime.
    pub fn start(plan: &FleetPlan) -> anyhow::Result<Self> {
        let mut seen = HashSet::new();
        for node in &plan.nodes {
            anyhow::ensure!(seen.insert(node.as_str()), "node '{node}' listed twice");
        }
        for flagged in plan
            .fail
            .iter()
            .chain(&plan.silent)
            .chain(&plan.missing)
            .chain(&plan.unavailable)
        {
            anyhow::ensure!(seen.contains(flagged.as_str()), "unknown node '{flagged}' (not in --nodes)");
        }

        let (net, coordinator_rx) = LoopbackNetwork::new();
        let mut silent = Vec::new();
        for name in &plan.nodes {
            if plan.missing.contains(name) {
                net.advertise(name.clone());
                continue;
            }
            let inbox = net.register(name.clone());
            if plan.silent.contains(name) {
                silent.push(inbox);
                continue;
            }
            let subsystem: Option<Arc<dyn BackupSubsystem>> = if plan.unavailable.contains(name) {
                None
            } else {
                Some(Arc::new(SimulatedBackup::new(
                    Duration::from_millis(plan.backup_ms),
                    plan.fail.contains(name),
                )))
            };
            let handler = BackendHandler::new(name.clone(), subsystem, Arc::new(net.clone()));
            spawn_node(handler, inbox);
        }

        tracing::info!(
            nodes = plan.nodes.len(),
            silent = plan.silent.len(),
            missing = plan.missing.len(),
            "simulated fleet started"
        );
        Ok(Self {
            net,
            coordinator_rx,
            _silent: silent,
        })
    }
}

/// Backup subsystem that sleeps instead of copying files.
pub struct SimulatedBackup {
    base: Duration,
    fail: bool,
    running: AtomicBool,
    completed: AtomicI32,
}

impl SimulatedBackup {
    pub fn new(base: Duration, fail: bool) -> Self {
        Self {
            base,
            fail,
            running: AtomicBool::new(false),
            completed: AtomicI32::new(0),
        }
    }
}

#[async_trait]
impl BackupSubsystem for SimulatedBackup {
    async fn execute_backup(&self, kind: &str) -> BackupOutcome {
        let (delay, size_mb) = {
            let mut rng = rand::rng();
            let jitter = rng.random_range(0.5..1.5);
            (self.base.mul_f64(jitter), rng.random_range(1..512i64))
        };

        self.running.store(true, Ordering::SeqCst);
        tokio::time::sleep(delay).await;
        self.running.store(false, Ordering::SeqCst);

        if self.fail {
            return BackupOutcome::Failed {
                reason: format!("simulated {kind} backup error"),
            };
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        BackupOutcome::Success {
            duration_ms: delay.as_millis() as i64,
            size_bytes: size_mb * 1024 * 1024,
        }
    }

    async fn status(&self) -> Result<LocalStatus, FleetProtocolError> {
        Ok(LocalStatus {
            backup_running: self.running.load(Ordering::SeqCst),
            backup_count: self.completed.load(Ordering::SeqCst),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_protocol::NodeRegistry;

    fn plan(nodes: &[&str]) -> FleetPlan {
        FleetPlan {
            nodes: nodes.iter().map(|s| s.to_string()).collect(),
            backup_ms: 10,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn missing_nodes_are_listed_but_unreachable() {
        let mut p = plan(&["a", "b"]);
        p.missing = vec!["b".into()];
        let fleet = SimulatedFleet::start(&p).unwrap();
        assert_eq!(fleet.net.list_nodes(), vec!["a", "b"]);
        assert!(fleet.net.contains("a"));
        assert!(!fleet.net.contains("b"));
    }

    #[tokio::test]
    async fn rejects_flags_for_unlisted_nodes() {
        let mut p = plan(&["a"]);
        p.silent = vec!["z".into()];
        assert!(SimulatedFleet::start(&p).is_err());

        let p = plan(&["a", "a"]);
        assert!(SimulatedFleet::start(&p).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_backup_reports_outcome() {
        let ok = SimulatedBackup::new(Duration::from_millis(100), false);
        match ok.execute_backup("world").await {
            BackupOutcome::Success { duration_ms, size_bytes } => {
                assert!((50..=150).contains(&duration_ms));
                assert!(size_bytes >= 1024 * 1024);
            }
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(ok.status().await.unwrap().backup_count, 1);

        let bad = SimulatedBackup::new(Duration::from_millis(100), true);
        assert_eq!(
            bad.execute_backup("full").await,
            BackupOutcome::Failed {
                reason: "simulated full backup error".into()
            }
        );
        assert_eq!(bad.status().await.unwrap().backup_count, 0);
    }
}
