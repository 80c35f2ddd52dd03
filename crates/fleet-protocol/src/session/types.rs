/// Session and per-node result types.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::time::Instant;

use crate::scheduler::TimerHandle;
use crate::sink::OutputSink;
use crate::types::{BackupMode, NodeName, SessionId, STARTED};
use crate::wire::BackupResponse;

// ── Messages recorded for targets that never answered ────────────────────

/// Dispatch-time failure: target absent from the registry.
pub const NOT_FOUND: &str = "Server not found";

/// Dispatch-time failure: registry refused the frame.
pub const UNREACHABLE: &str = "Server unreachable";

/// Target dispatched, nothing came back before the session closed.
pub const NO_RESPONSE: &str = "No response (timed out)";

/// Target acknowledged with STARTED but never sent a final result.
pub const NO_FINAL_RESPONSE: &str = "No final response after STARTED";

/// Sequential dispatch never reached this target.
pub const NOT_DISPATCHED: &str = "Not dispatched (session timed out)";

// ── NodeResult ───────────────────────────────────────────────────────────

/// Outcome of one node's backup attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeResult {
    pub success: bool,
    /// Status or error text. `STARTED` marks a non-terminal acknowledgment.
    pub message: String,
    /// Only meaningful for a terminal success.
    pub duration_ms: i64,
    /// Only meaningful for a terminal success.
    pub size_bytes: i64,
}

impl NodeResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            duration_ms: 0,
            size_bytes: 0,
        }
    }

    pub fn is_started(&self) -> bool {
        self.message == STARTED
    }

    /// Anything except the STARTED sentinel is final.
    pub fn is_terminal(&self) -> bool {
        !self.is_started()
    }
}

impl From<&BackupResponse> for NodeResult {
    fn from(resp: &BackupResponse) -> Self {
        Self {
            success: resp.success,
            message: resp.message.clone(),
            duration_ms: resp.duration_ms,
            size_bytes: resp.size_bytes,
        }
    }
}

// ── Lifecycle ────────────────────────────────────────────────────────────

/// `Open` until finalized; moves to `Completed` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Completed,
}

/// What closed a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeReason {
    /// Every target returned a terminal result.
    Complete,
    /// Sequential dispatch walked past the last target.
    StepsExhausted,
    /// The parallel completion window elapsed.
    WindowElapsed,
    /// The overall session timeout fired.
    Timeout,
}

// ── Session ──────────────────────────────────────────────────────────────

/// One orchestration run, from creation to finalize.
pub struct Session {
    pub id: SessionId,
    /// Fixed for the session's lifetime, in dispatch order.
    pub targets: Vec<NodeName>,
    pub mode: BackupMode,
    /// Passed through to nodes unchanged.
    pub backup_kind: String,
    /// At most one entry per node; later responses overwrite.
    pub results: HashMap<NodeName, NodeResult>,
    pub started_at: Instant,
    pub sink: Arc<dyn OutputSink>,
    pub state: SessionState,
    /// Index of the next target to dispatch.
    pub(crate) cursor: usize,
    /// Dispatch attempts so far, including ones that failed on the spot.
    pub(crate) dispatched: usize,
    /// Pending wait windows and timeouts, cancelled on finalize.
    pub(crate) timers: Vec<TimerHandle>,
}

impl Session {
    pub fn new(
        id: SessionId,
        targets: Vec<NodeName>,
        mode: BackupMode,
        backup_kind: String,
        sink: Arc<dyn OutputSink>,
    ) -> Self {
        Self {
            id,
            targets,
            mode,
            backup_kind,
            results: HashMap::new(),
            started_at: Instant::now(),
            sink,
            state: SessionState::Open,
            cursor: 0,
            dispatched: 0,
            timers: Vec::new(),
        }
    }

    pub fn is_target(&self, node: &str) -> bool {
        self.targets.iter().any(|t| t == node)
    }

    /// Store `result` for `node`, replacing any earlier one.
    pub fn record(&mut self, node: NodeName, result: NodeResult) -> Option<NodeResult> {
        self.results.insert(node, result)
    }

    pub fn has_terminal(&self, node: &str) -> bool {
        self.results.get(node).is_some_and(NodeResult::is_terminal)
    }

    /// Targets holding a terminal result. Non-target entries never count.
    pub fn answered(&self) -> usize {
        self.targets.iter().filter(|t| self.has_terminal(t)).count()
    }

    pub fn is_complete(&self) -> bool {
        self.answered() == self.targets.len()
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    /// Record a failure for every target still lacking a terminal result.
    pub fn fill_unanswered(&mut self) {
        for (idx, target) in self.targets.iter().enumerate() {
            let message = match self.results.get(target) {
                Some(r) if r.is_terminal() => continue,
                Some(_) => NO_FINAL_RESPONSE,
                None if idx >= self.cursor => NOT_DISPATCHED,
                None => NO_RESPONSE,
            };
            self.results
                .insert(target.clone(), NodeResult::failure(message));
        }
    }

    pub(crate) fn cancel_timers(&mut self) {
        for timer in self.timers.drain(..) {
            timer.cancel();
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("targets", &self.targets)
            .field("mode", &self.mode)
            .field("backup_kind", &self.backup_kind)
            .field("results", &self.results)
            .field("state", &self.state)
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::BufferSink;
    use crate::types::SUCCESS;

    fn session(targets: &[&str]) -> Session {
        Session::new(
            "s1".into(),
            targets.iter().map(|t| t.to_string()).collect(),
            BackupMode::Parallel,
            "world".into(),
            Arc::new(BufferSink::new()),
        )
    }

    fn ok() -> NodeResult {
        NodeResult {
            success: true,
            message: SUCCESS.into(),
            duration_ms: 500,
            size_bytes: 1024,
        }
    }

    fn started() -> NodeResult {
        NodeResult {
            success: true,
            message: STARTED.into(),
            duration_ms: 0,
            size_bytes: 0,
        }
    }

    #[test]
    fn started_is_not_terminal() {
        assert!(!started().is_terminal());
        assert!(ok().is_terminal());
        assert!(NodeResult::failure("boom").is_terminal());
    }

    #[test]
    fn completeness_ignores_started_and_strangers() {
        let mut s = session(&["a", "b"]);
        s.record("a".into(), started());
        s.record("zz".into(), ok());
        assert_eq!(s.answered(), 0);
        s.record("a".into(), ok());
        assert_eq!(s.answered(), 1);
        assert!(!s.is_complete());
        s.record("b".into(), NodeResult::failure("disk full"));
        assert!(s.is_complete());
    }

    #[test]
    fn duplicate_results_overwrite() {
        let mut s = session(&["a"]);
        s.record("a".into(), started());
        let previous = s.record("a".into(), ok());
        assert_eq!(previous, Some(started()));
        assert_eq!(s.results.len(), 1);
        assert_eq!(s.results["a"], ok());
    }

    #[test]
    fn fill_unanswered_picks_origin_message() {
        let mut s = session(&["a", "b", "c", "d"]);
        s.cursor = 3;
        s.record("a".into(), ok());
        s.record("b".into(), started());
        s.fill_unanswered();
        assert_eq!(s.results["a"], ok());
        assert_eq!(s.results["b"].message, NO_FINAL_RESPONSE);
        assert_eq!(s.results["c"].message, NO_RESPONSE);
        assert_eq!(s.results["d"].message, NOT_DISPATCHED);
        assert!(s.is_complete());
    }
}
