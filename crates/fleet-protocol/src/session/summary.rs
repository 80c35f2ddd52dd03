/// Aggregated report for a closed session.
use std::time::Duration;

use crate::session::types::{FinalizeReason, Session};
use crate::sink::{Line, Tone};
use crate::types::{NodeName, SessionId};

const RULE: &str = "═══════════════════════════════════════════";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub session_id: SessionId,
    pub reason: FinalizeReason,
    pub elapsed: Duration,
    pub total: usize,
    /// Targets with a terminal result before the session closed.
    pub responded: usize,
    pub succeeded: usize,
    /// Failed targets in dispatch order, with their messages.
    pub failures: Vec<(NodeName, String)>,
}

impl Summary {
    /// Build from a session whose unanswered targets were already filled in.
    /// `responded` is the answered count taken before filling.
    pub fn new(session: &Session, reason: FinalizeReason, responded: usize) -> Self {
        let mut succeeded = 0;
        let mut failures = Vec::new();
        for target in &session.targets {
            match session.results.get(target) {
                Some(r) if r.success && r.is_terminal() => succeeded += 1,
                Some(r) => failures.push((target.clone(), r.message.clone())),
                None => failures.push((target.clone(), String::new())),
            }
        }
        Self {
            session_id: session.id.clone(),
            reason,
            elapsed: session.started_at.elapsed(),
            total: session.targets.len(),
            responded,
            succeeded,
            failures,
        }
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Closed by the overall timeout with targets still unanswered.
    pub fn timed_out(&self) -> bool {
        self.reason == FinalizeReason::Timeout && self.responded < self.total
    }

    pub fn render(&self) -> Vec<Line> {
        let mut lines = Vec::new();
        if self.timed_out() {
            lines.push(Line::new(Tone::Warning, "⚠ Backup session timed out!"));
            lines.push(Line::new(
                Tone::Warning,
                format!("Responded: {}/{}", self.responded, self.total),
            ));
        }
        lines.push(Line::new(Tone::Info, ""));
        lines.push(Line::new(Tone::Banner, RULE));
        lines.push(Line::new(Tone::Banner, "Network Backup Summary"));
        lines.push(Line::new(Tone::Banner, RULE));
        lines.push(Line::new(Tone::Info, format!("Session: {}", self.session_id)));
        lines.push(Line::new(
            Tone::Info,
            format!("Total Time: {}s", self.elapsed.as_secs()),
        ));
        lines.push(Line::new(
            Tone::Info,
            format!("Success: {} / Failed: {}", self.succeeded, self.failed()),
        ));
        if !self.failures.is_empty() {
            lines.push(Line::new(Tone::Info, ""));
            lines.push(Line::new(Tone::Failure, "Failed servers:"));
            for (node, message) in &self.failures {
                lines.push(Line::new(Tone::Failure, format!("  - {node}: {message}")));
            }
        }
        lines.push(Line::new(Tone::Banner, RULE));
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::{NodeResult, NO_RESPONSE};
    use crate::sink::BufferSink;
    use crate::types::{BackupMode, SUCCESS};
    use std::sync::Arc;

    fn session() -> Session {
        let mut s = Session::new(
            "feed1234".into(),
            vec!["a".into(), "b".into()],
            BackupMode::Parallel,
            "world".into(),
            Arc::new(BufferSink::new()),
        );
        s.cursor = 2;
        s.record(
            "a".into(),
            NodeResult {
                success: true,
                message: SUCCESS.into(),
                duration_ms: 500,
                size_bytes: 1_048_576,
            },
        );
        s
    }

    fn texts(summary: &Summary) -> Vec<String> {
        summary.render().into_iter().map(|l| l.text).collect()
    }

    #[test]
    fn counts_and_failure_list() {
        let mut s = session();
        let responded = s.answered();
        s.fill_unanswered();
        let summary = Summary::new(&s, FinalizeReason::WindowElapsed, responded);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.failures, vec![("b".to_string(), NO_RESPONSE.to_string())]);
        let lines = texts(&summary);
        assert!(lines.contains(&"Success: 1 / Failed: 1".to_string()));
        assert!(lines.contains(&format!("  - b: {NO_RESPONSE}")));
        assert!(!summary.timed_out());
        assert!(!lines.iter().any(|l| l.contains("timed out!")));
    }

    #[test]
    fn timeout_states_responded_count() {
        let mut s = session();
        let responded = s.answered();
        s.fill_unanswered();
        let summary = Summary::new(&s, FinalizeReason::Timeout, responded);
        assert!(summary.timed_out());
        let lines = texts(&summary);
        assert_eq!(lines[0], "⚠ Backup session timed out!");
        assert_eq!(lines[1], "Responded: 1/2");
    }

    #[test]
    fn clean_run_has_no_failure_block() {
        let mut s = session();
        s.targets.truncate(1);
        let summary = Summary::new(&s, FinalizeReason::Complete, 1);
        let lines = texts(&summary);
        assert!(lines.contains(&"Success: 1 / Failed: 0".to_string()));
        assert!(!lines.contains(&"Failed servers:".to_string()));
        assert!(lines.contains(&"Session: feed1234".to_string()));
    }
}
