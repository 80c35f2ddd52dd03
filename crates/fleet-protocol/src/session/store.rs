/// SessionStore — in-memory table of open sessions.
///
/// Safe to share between response handling and timer callbacks: every
/// operation takes the table lock for the duration of one closure and never
/// calls out (sinks, registry) while holding it.
///
/// A session leaves the table exactly once, through [`SessionStore::complete`]
/// or [`SessionStore::remove`]. Whichever caller gets `Some` back owns the
/// closing; every other caller sees `None`.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::time::Instant;

use crate::session::types::{NodeResult, Session, SessionState};
use crate::sink::OutputSink;
use crate::types::{BackupMode, NodeName, SessionId};

/// Read-only copy of a session's state.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub targets: Vec<NodeName>,
    pub mode: BackupMode,
    pub backup_kind: String,
    pub results: HashMap<NodeName, NodeResult>,
    pub started_at: Instant,
    pub state: SessionState,
    pub answered: usize,
    pub dispatched: usize,
}

/// What `record_result` changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    /// The new result is not the STARTED sentinel.
    pub terminal: bool,
    /// Every target now holds a terminal result.
    pub complete: bool,
    /// Result that was overwritten, if any.
    pub previous: Option<NodeResult>,
}

#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session and return its id.
    pub fn create(
        &self,
        targets: Vec<NodeName>,
        mode: BackupMode,
        backup_kind: impl Into<String>,
        sink: Arc<dyn OutputSink>,
    ) -> SessionId {
        let mut sessions = self.sessions();
        let mut id = SessionId::generate();
        while sessions.contains_key(&id) {
            id = SessionId::generate();
        }
        let session = Session::new(id.clone(), targets, mode, backup_kind.into(), sink);
        sessions.insert(id.clone(), session);
        id
    }

    pub fn get(&self, id: &SessionId) -> Option<SessionSnapshot> {
        self.sessions().get(id).map(|s| SessionSnapshot {
            id: s.id.clone(),
            targets: s.targets.clone(),
            mode: s.mode,
            backup_kind: s.backup_kind.clone(),
            results: s.results.clone(),
            started_at: s.started_at,
            state: s.state,
            answered: s.answered(),
            dispatched: s.dispatched,
        })
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions().contains_key(id)
    }

    /// Record `result` for `node`. `None` when the session is gone: late and
    /// duplicate responses land here and are harmless.
    pub fn record_result(
        &self,
        id: &SessionId,
        node: NodeName,
        result: NodeResult,
    ) -> Option<RecordOutcome> {
        self.update(id, |session| {
            let terminal = result.is_terminal();
            let previous = session.record(node, result);
            RecordOutcome {
                terminal,
                complete: session.is_complete(),
                previous,
            }
        })
    }

    /// Run `f` against an open session.
    pub fn update<R>(&self, id: &SessionId, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut sessions = self.sessions();
        let session = sessions.get_mut(id)?;
        if session.state != SessionState::Open {
            return None;
        }
        Some(f(session))
    }

    /// The finalize-once transition: mark the session `Completed` and take it
    /// out of the table. At most one caller per session gets `Some`.
    pub fn complete(&self, id: &SessionId) -> Option<Session> {
        let mut session = self.sessions().remove(id)?;
        session.state = SessionState::Completed;
        session.cancel_timers();
        Some(session)
    }

    /// Drop a session without finalizing it.
    pub fn remove(&self, id: &SessionId) -> Option<Session> {
        let mut session = self.sessions().remove(id)?;
        session.cancel_timers();
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }

    /// Ids of every open session.
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions().keys().cloned().collect()
    }

    // ── Internal ───────────────────────────────────────────────────────

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, Session>> {
        // Nothing runs foreign code under this lock, so a poisoned table is
        // still consistent.
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}
