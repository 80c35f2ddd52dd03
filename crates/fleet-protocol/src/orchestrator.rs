/// Orchestrator — coordinator side of a fleet backup.
///
/// Creates sessions, fans requests out to nodes (one at a time or all at
/// once), fans their responses back in, and closes every session exactly
/// once with an aggregated summary.
///
/// Three things can close a session: every target answering, the mode's wait
/// window running out, or the overall timeout. They may race; the store's
/// `complete` transition lets exactly one of them through.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::OrchestratorConfig;
use crate::error::FleetProtocolError;
use crate::metrics::OrchestratorMetrics;
use crate::registry::NodeRegistry;
use crate::scheduler::{Scheduler, TimerHandle};
use crate::session::types::{NOT_FOUND, UNREACHABLE};
use crate::session::{FinalizeReason, NodeResult, Session, SessionSnapshot, SessionStore, Summary};
use crate::sink::{Line, OutputSink, Tone};
use crate::types::{BackupMode, NodeName, SessionId};
use crate::wire::{BackupRequest, BackupResponse, Channel, StatusRequest, StatusResponse, WireMessage};

/// Capacity of the finished-session broadcast.
const SUMMARY_BUFFER: usize = 64;

/// Coordinator handle. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<dyn NodeRegistry>,
    scheduler: Arc<dyn Scheduler>,
    store: SessionStore,
    probes: Mutex<HashMap<SessionId, Probe>>,
    config: OrchestratorConfig,
    metrics: OrchestratorMetrics,
    summaries: broadcast::Sender<Summary>,
}

/// An outstanding status request.
struct Probe {
    node: NodeName,
    sink: Arc<dyn OutputSink>,
    timer: Option<TimerHandle>,
}

/// Result of one sequential step, decided under the store lock.
enum Step {
    /// Someone else already advanced past the expected step.
    Stale,
    Exhausted,
    Send {
        target: NodeName,
        kind: String,
        sink: Arc<dyn OutputSink>,
        next: usize,
    },
}

/// What moved a sequential session to its next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepCause {
    Start,
    /// The previous step's window ran out.
    Window,
    /// The current target sent its final answer early.
    Answer,
}

/// What a recorded response asks of us once the lock is released.
struct ResponseEffect {
    terminal: bool,
    /// The node already had a final result before this one.
    repeat: bool,
    complete: bool,
    sink: Arc<dyn OutputSink>,
    /// Sequential: the answering node is the current step, advance from here.
    advance_from: Option<usize>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<dyn NodeRegistry>,
        scheduler: Arc<dyn Scheduler>,
        config: OrchestratorConfig,
    ) -> Self {
        let (summaries, _) = broadcast::channel(SUMMARY_BUFFER);
        Self {
            inner: Arc::new(Inner {
                registry,
                scheduler,
                store: SessionStore::new(),
                probes: Mutex::new(HashMap::new()),
                config,
                metrics: OrchestratorMetrics::default(),
                summaries,
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &OrchestratorMetrics {
        &self.inner.metrics
    }

    /// Number of sessions still open.
    pub fn active_sessions(&self) -> usize {
        self.inner.store.len()
    }

    pub fn session(&self, id: &SessionId) -> Option<SessionSnapshot> {
        self.inner.store.get(id)
    }

    /// Receive every summary produced from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Summary> {
        self.inner.summaries.subscribe()
    }

    // ── Starting sessions ────────────────────────────────────────────────

    /// Back up every node the registry lists.
    pub fn start_all(
        &self,
        sink: Arc<dyn OutputSink>,
        mode: BackupMode,
        backup_kind: &str,
    ) -> Result<SessionId, FleetProtocolError> {
        let targets = self.inner.registry.list_nodes();
        if targets.is_empty() {
            tracing::warn!("network backup requested with no registered nodes");
            sink.emit(Line::new(Tone::Failure, "No backend servers found!"));
            return Err(FleetProtocolError::NoNodes);
        }

        let count = targets.len();
        let id = self
            .inner
            .store
            .create(targets, mode, backup_kind, sink.clone());
        self.inner.metrics.sessions_started.inc();
        tracing::info!(session = %id, nodes = count, %mode, kind = backup_kind, "network backup initiated");

        sink.emit(Line::new(Tone::Banner, "╔════════════════════════════════════════╗"));
        sink.emit(Line::new(Tone::Banner, "║    NETWORK BACKUP INITIATED            ║"));
        sink.emit(Line::new(Tone::Banner, "╚════════════════════════════════════════╝"));
        sink.emit(Line::new(Tone::Info, format!("Session ID: {id}")));
        sink.emit(Line::new(Tone::Info, format!("Servers: {count}")));
        sink.emit(Line::new(Tone::Info, format!("Mode: {mode}")));
        sink.emit(Line::new(Tone::Info, ""));

        self.schedule_timeout(&id, self.inner.config.fleet_timeout);
        match mode {
            BackupMode::Sequential => self.dispatch_next(&id, 0, StepCause::Start),
            BackupMode::Parallel => {
                self.fan_out(&id);
                self.schedule_window(&id, self.inner.config.parallel_window);
            }
        }
        Ok(id)
    }

    /// Back up a single node.
    ///
    /// An unknown node is reported and summarized on the spot; nothing is
    /// sent and no session stays open.
    pub fn start_one(
        &self,
        sink: Arc<dyn OutputSink>,
        node: &str,
        backup_kind: &str,
    ) -> Result<SessionId, FleetProtocolError> {
        if !self.inner.registry.contains(node) {
            tracing::warn!(node, "single-node backup requested for unknown node");
            sink.emit(Line::new(Tone::Failure, format!("Server not found: {node}")));
            self.inner.metrics.dispatch_failures.inc();

            let mut session = Session::new(
                SessionId::generate(),
                vec![node.to_string()],
                BackupMode::Parallel,
                backup_kind.to_string(),
                sink.clone(),
            );
            session.cursor = 1;
            session.dispatched = 1;
            session.record(node.to_string(), NodeResult::failure(NOT_FOUND));
            self.emit_summary(session, FinalizeReason::Complete);

            return Err(FleetProtocolError::UnknownNode {
                node: node.to_string(),
            });
        }

        let id = self.inner.store.create(
            vec![node.to_string()],
            BackupMode::Parallel,
            backup_kind,
            sink.clone(),
        );
        self.inner.metrics.sessions_started.inc();
        tracing::info!(session = %id, node, kind = backup_kind, "single-node backup initiated");

        sink.emit(Line::new(Tone::Info, format!("Starting backup for server: {node}")));
        sink.emit(Line::new(Tone::Detail, format!("Session: {id}")));

        self.schedule_timeout(&id, self.inner.config.single_timeout);
        self.fan_out(&id);
        Ok(id)
    }

    // ── Fan-out ──────────────────────────────────────────────────────────

    /// Send to every target at once.
    fn fan_out(&self, id: &SessionId) {
        let Some((targets, kind, sink)) = self.inner.store.update(id, |s| {
            s.cursor = s.targets.len();
            s.dispatched = s.targets.len();
            (s.targets.clone(), s.backup_kind.clone(), s.sink.clone())
        }) else {
            return;
        };

        for target in &targets {
            self.dispatch(id, target, &kind, &sink);
        }

        // Every target may have failed on the spot.
        if self.inner.store.update(id, |s| s.is_complete()) == Some(true) {
            self.finalize(id, FinalizeReason::Complete);
        }
    }

    /// Dispatch the next sequential target if the session is still at step
    /// `expected`. Targets that fail on the spot are skipped without waiting.
    ///
    /// Walking past the last target closes the session only from a window
    /// timer. Otherwise earlier targets may still be running, so the last
    /// dispatched target's window decides.
    fn dispatch_next(&self, id: &SessionId, expected: usize, cause: StepCause) {
        let mut expected = expected;
        let mut skipped = false;
        loop {
            let step = self.inner.store.update(id, |s| {
                if s.cursor != expected {
                    return Step::Stale;
                }
                if s.cursor >= s.targets.len() {
                    return Step::Exhausted;
                }
                let target = s.targets[s.cursor].clone();
                s.cursor += 1;
                s.dispatched += 1;
                Step::Send {
                    target,
                    kind: s.backup_kind.clone(),
                    sink: s.sink.clone(),
                    next: s.cursor,
                }
            });

            match step {
                None | Some(Step::Stale) => return,
                Some(Step::Exhausted) => {
                    if self.inner.store.update(id, |s| s.is_complete()) == Some(true) {
                        self.finalize(id, FinalizeReason::Complete);
                    } else if cause == StepCause::Window {
                        self.finalize(id, FinalizeReason::StepsExhausted);
                    } else if skipped {
                        // The trailing targets failed on the spot and armed no window.
                        self.schedule_step(id, expected);
                    }
                    return;
                }
                Some(Step::Send {
                    target,
                    kind,
                    sink,
                    next,
                }) => {
                    if self.dispatch(id, &target, &kind, &sink) {
                        self.schedule_step(id, next);
                        return;
                    }
                    expected = next;
                    skipped = true;
                }
            }
        }
    }

    /// Send one request. A failure is recorded immediately; returns whether
    /// the frame left.
    fn dispatch(&self, id: &SessionId, target: &str, kind: &str, sink: &Arc<dyn OutputSink>) -> bool {
        if !self.inner.registry.contains(target) {
            self.fail_dispatch(id, target, NOT_FOUND, sink);
            return false;
        }

        let request = WireMessage::from(BackupRequest {
            session_id: id.clone(),
            backup_kind: kind.to_string(),
        });
        let frame = match request.encode() {
            Ok(frame) => frame,
            Err(e) => {
                self.fail_dispatch(id, target, &format!("Request encoding failed: {e}"), sink);
                return false;
            }
        };

        sink.emit(Line::new(Tone::Detail, format!("→ {target} - Starting...")));
        if !self.inner.registry.send(target, frame) {
            self.fail_dispatch(id, target, UNREACHABLE, sink);
            return false;
        }

        self.inner.metrics.requests_sent.inc();
        tracing::debug!(session = %id, node = target, "backup request sent");
        true
    }

    fn fail_dispatch(&self, id: &SessionId, target: &str, message: &str, sink: &Arc<dyn OutputSink>) {
        tracing::warn!(session = %id, node = target, "dispatch failed: {message}");
        self.inner.metrics.dispatch_failures.inc();
        sink.emit(Line::new(Tone::Failure, format!("✗ {target} - {message}")));
        self.inner
            .store
            .record_result(id, target.to_string(), NodeResult::failure(message));
    }

    // ── Fan-in ───────────────────────────────────────────────────────────

    /// Handle a raw frame from the response channel. Malformed frames are
    /// logged and dropped.
    pub fn on_frame(&self, data: &[u8]) {
        match WireMessage::decode_on(Channel::Response, data) {
            Ok(Some(WireMessage::BackupResponse(resp))) => self.on_response_received(resp),
            Ok(Some(WireMessage::StatusResponse(resp))) => self.on_status_received(resp),
            Ok(Some(other)) => {
                tracing::debug!(kind = other.kind(), "ignoring request on response channel");
            }
            Ok(None) => {}
            Err(e) => {
                self.inner.metrics.malformed_frames.inc();
                tracing::warn!("dropping malformed response frame: {e}");
            }
        }
    }

    /// Record a node's backup response against its session.
    pub fn on_response_received(&self, resp: BackupResponse) {
        let node = resp.node_name.clone();
        let result = NodeResult::from(&resp);

        let effect = self.inner.store.update(&resp.session_id, |s| {
            if !s.is_target(&node) {
                return None;
            }
            let terminal = result.is_terminal();
            let repeat = s.has_terminal(&node);
            // A STARTED overtaking its own final result must not reopen the node.
            if terminal || !repeat {
                s.record(node.clone(), result);
            }
            let current_step = s.mode == BackupMode::Sequential
                && s.cursor > 0
                && s.targets[s.cursor - 1] == node;
            Some(ResponseEffect {
                terminal,
                repeat,
                complete: s.is_complete(),
                sink: s.sink.clone(),
                advance_from: (current_step && terminal).then_some(s.cursor),
            })
        });

        let effect = match effect {
            Some(Some(effect)) => effect,
            Some(None) => {
                self.inner.metrics.responses_dropped.inc();
                tracing::debug!(session = %resp.session_id, node = %node, "response from non-target node dropped");
                return;
            }
            None => {
                self.inner.metrics.responses_dropped.inc();
                tracing::debug!(session = %resp.session_id, node = %node, "response for closed or unknown session dropped");
                return;
            }
        };
        self.inner.metrics.responses_recorded.inc();

        // The node's line was printed with its first final result.
        if effect.repeat && effect.terminal {
            tracing::debug!(session = %resp.session_id, node = %node, "repeated final response recorded");
            return;
        }
        if !effect.terminal {
            tracing::debug!(session = %resp.session_id, node = %node, "backup started");
            return;
        }

        if resp.success {
            let size_mb = resp.size_bytes / 1024 / 1024;
            effect.sink.emit(Line::new(
                Tone::Success,
                format!("✓ {node} - Completed ({}ms, {size_mb}MB)", resp.duration_ms),
            ));
        } else {
            effect
                .sink
                .emit(Line::new(Tone::Failure, format!("✗ {node} - {}", resp.message)));
        }

        if effect.complete {
            self.finalize(&resp.session_id, FinalizeReason::Complete);
        } else if let Some(step) = effect.advance_from {
            self.dispatch_next(&resp.session_id, step, StepCause::Answer);
        }
    }

    // ── Finalization ─────────────────────────────────────────────────────

    /// Close the session and render its summary. Runs at most once per
    /// session; later calls return `None`.
    pub fn finalize(&self, id: &SessionId, reason: FinalizeReason) -> Option<Summary> {
        let session = self.inner.store.complete(id)?;
        Some(self.emit_summary(session, reason))
    }

    fn emit_summary(&self, mut session: Session, reason: FinalizeReason) -> Summary {
        let responded = session.answered();
        let reason = if responded == session.targets.len() {
            FinalizeReason::Complete
        } else {
            reason
        };
        session.fill_unanswered();

        let summary = Summary::new(&session, reason, responded);
        self.inner.metrics.sessions_finalized.inc();
        if summary.timed_out() {
            self.inner.metrics.sessions_timed_out.inc();
        }
        tracing::info!(
            session = %session.id,
            ?reason,
            succeeded = summary.succeeded,
            failed = summary.failed(),
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "network backup finished"
        );

        for line in summary.render() {
            session.sink.emit(line);
        }
        let _ = self.inner.summaries.send(summary.clone());
        summary
    }

    // ── Timers ───────────────────────────────────────────────────────────

    fn schedule_step(&self, id: &SessionId, next: usize) {
        let window = self.inner.config.step_window;
        self.schedule(id, window, move |orchestrator, id| {
            orchestrator.dispatch_next(id, next, StepCause::Window);
        });
    }

    fn schedule_window(&self, id: &SessionId, window: Duration) {
        self.schedule(id, window, |orchestrator, id| {
            orchestrator.finalize(id, FinalizeReason::WindowElapsed);
        });
    }

    fn schedule_timeout(&self, id: &SessionId, timeout: Duration) {
        self.schedule(id, timeout, |orchestrator, id| {
            if orchestrator.finalize(id, FinalizeReason::Timeout).is_some() {
                tracing::warn!(session = %id, "network backup session timed out");
            }
        });
    }

    /// Schedule `f` for this session and attach the timer so finalize can
    /// cancel it.
    fn schedule<F>(&self, id: &SessionId, delay: Duration, f: F)
    where
        F: FnOnce(&Orchestrator, &SessionId) + Send + 'static,
    {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let task_id = id.clone();
        let timer = self.inner.scheduler.schedule(
            delay,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    f(&Orchestrator { inner }, &task_id);
                }
            }),
        );
        if self
            .inner
            .store
            .update(id, |s| s.timers.push(timer.clone()))
            .is_none()
        {
            timer.cancel();
        }
    }

    // ── Status probes ────────────────────────────────────────────────────

    /// Ask one node for its local backup state. The answer (or its absence)
    /// is reported to `sink`.
    pub fn probe_status(
        &self,
        sink: Arc<dyn OutputSink>,
        node: &str,
    ) -> Result<SessionId, FleetProtocolError> {
        if !self.inner.registry.contains(node) {
            sink.emit(Line::new(Tone::Failure, format!("Server not found: {node}")));
            return Err(FleetProtocolError::UnknownNode {
                node: node.to_string(),
            });
        }

        let id = SessionId::generate();
        let frame = WireMessage::from(StatusRequest {
            session_id: id.clone(),
        })
        .encode()?;

        self.probes().insert(
            id.clone(),
            Probe {
                node: node.to_string(),
                sink: sink.clone(),
                timer: None,
            },
        );

        if !self.inner.registry.send(node, frame) {
            self.probes().remove(&id);
            sink.emit(Line::new(Tone::Failure, format!("✗ {node} - {UNREACHABLE}")));
            return Err(FleetProtocolError::Unreachable {
                node: node.to_string(),
            });
        }
        self.inner.metrics.status_probes.inc();
        tracing::debug!(probe = %id, node, "status request sent");

        let weak = Arc::downgrade(&self.inner);
        let probe_id = id.clone();
        let timer = self.inner.scheduler.schedule(
            self.inner.config.status_timeout,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Orchestrator { inner }.expire_probe(&probe_id);
                }
            }),
        );
        match self.probes().get_mut(&id) {
            Some(probe) => probe.timer = Some(timer),
            None => timer.cancel(),
        }
        Ok(id)
    }

    /// Render a status answer for its probe. Unknown probe ids are dropped.
    pub fn on_status_received(&self, resp: StatusResponse) {
        let Some(probe) = self.probes().remove(&resp.session_id) else {
            self.inner.metrics.responses_dropped.inc();
            tracing::debug!(probe = %resp.session_id, "status response for unknown probe dropped");
            return;
        };
        if let Some(timer) = &probe.timer {
            timer.cancel();
        }
        if probe.node != resp.node_name {
            tracing::debug!(expected = %probe.node, got = %resp.node_name, "status answered by another node");
        }

        let api = if resp.api_available { "available" } else { "unavailable" };
        let running = if resp.backup_running { "running" } else { "idle" };
        probe.sink.emit(Line::new(
            Tone::Info,
            format!(
                "{}: backup api {api}, {running}, {} backups",
                resp.node_name, resp.backup_count
            ),
        ));
    }

    fn expire_probe(&self, id: &SessionId) {
        let probe = self.probes().remove(id);
        if let Some(probe) = probe {
            tracing::debug!(probe = %id, node = %probe.node, "status probe expired");
            probe.sink.emit(Line::new(
                Tone::Warning,
                format!("No status response from {}", probe.node),
            ));
        }
    }

    fn probes(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, Probe>> {
        self.inner.probes.lock().unwrap_or_else(|e| e.into_inner())
    }
}
