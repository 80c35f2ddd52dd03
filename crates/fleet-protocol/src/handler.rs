/// BackendHandler — node side of a fleet backup.
///
/// Turns inbound request frames into local operations and reports back:
/// a `STARTED` acknowledgment, then exactly one final `BackupResponse` per
/// backup request, or one `StatusResponse` per status request.
///
/// The backup itself runs on its own task. Handling a frame never waits for
/// it to finish.
use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::FleetProtocolError;
use crate::registry::{ReturnPath, ReturnPaths};
use crate::types::{NodeName, SessionId, SUCCESS};
use crate::wire::{BackupRequest, BackupResponse, Channel, StatusRequest, StatusResponse, WireMessage};

/// Result of one local backup run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    Success { duration_ms: i64, size_bytes: i64 },
    Failed { reason: String },
}

/// Snapshot of the local backup subsystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalStatus {
    pub backup_running: bool,
    pub backup_count: i32,
}

/// The node-local backup machinery.
///
/// `execute_backup` must report internal failures as
/// [`BackupOutcome::Failed`]; a panic is caught by the handler but still
/// counts as a bug.
#[async_trait]
pub trait BackupSubsystem: Send + Sync {
    async fn execute_backup(&self, kind: &str) -> BackupOutcome;

    async fn status(&self) -> Result<LocalStatus, FleetProtocolError>;
}

/// Per-node request handler. Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct BackendHandler {
    node_name: NodeName,
    subsystem: Option<Arc<dyn BackupSubsystem>>,
    paths: Arc<dyn ReturnPaths>,
}

impl BackendHandler {
    /// `subsystem: None` means backups are unavailable on this node; every
    /// backup request is refused on the spot.
    pub fn new(
        node_name: impl Into<NodeName>,
        subsystem: Option<Arc<dyn BackupSubsystem>>,
        paths: Arc<dyn ReturnPaths>,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            subsystem,
            paths,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Handle one frame from the request channel.
    ///
    /// Malformed frames and response kinds are logged and dropped.
    pub async fn handle_frame(&self, frame: &[u8], origin: Option<Arc<dyn ReturnPath>>) {
        match WireMessage::decode_on(Channel::Request, frame) {
            Ok(Some(WireMessage::BackupRequest(req))) => self.on_backup_request(req, origin),
            Ok(Some(WireMessage::StatusRequest(req))) => self.on_status_request(req, origin).await,
            Ok(Some(other)) => {
                tracing::debug!(node = %self.node_name, kind = other.kind(), "unexpected message on request channel");
            }
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(node = %self.node_name, "dropping malformed request: {e}");
            }
        }
    }

    fn on_backup_request(&self, req: BackupRequest, origin: Option<Arc<dyn ReturnPath>>) {
        let BackupRequest {
            session_id,
            backup_kind,
        } = req;

        let Some(subsystem) = self.subsystem.clone() else {
            tracing::warn!(node = %self.node_name, session = %session_id, "backup requested but subsystem unavailable");
            let refusal = BackupResponse::failed(
                session_id,
                self.node_name.clone(),
                FleetProtocolError::BackupUnavailable.to_string(),
            );
            self.respond(origin.as_ref(), refusal.into());
            return;
        };

        tracing::info!(node = %self.node_name, session = %session_id, kind = %backup_kind, "backup request accepted");
        self.respond(
            origin.as_ref(),
            BackupResponse::started(session_id.clone(), self.node_name.clone()).into(),
        );

        let handler = self.clone();
        tokio::spawn(async move {
            let run = tokio::spawn(async move { subsystem.execute_backup(&backup_kind).await });
            let response = match run.await {
                Ok(outcome) => handler.final_response(session_id, outcome),
                Err(e) => {
                    let reason = if e.is_panic() {
                        panic_message(e.into_panic())
                    } else {
                        "backup task cancelled".to_string()
                    };
                    tracing::warn!(node = %handler.node_name, session = %session_id, "backup task died: {reason}");
                    BackupResponse::failed(session_id, handler.node_name.clone(), format!("ERROR: {reason}"))
                }
            };
            handler.respond(origin.as_ref(), response.into());
        });
    }

    fn final_response(&self, session_id: SessionId, outcome: BackupOutcome) -> BackupResponse {
        match outcome {
            BackupOutcome::Success {
                duration_ms,
                size_bytes,
            } => {
                tracing::info!(node = %self.node_name, session = %session_id, duration_ms, size_bytes, "backup finished");
                BackupResponse {
                    session_id,
                    node_name: self.node_name.clone(),
                    success: true,
                    message: SUCCESS.to_string(),
                    duration_ms,
                    size_bytes,
                }
            }
            BackupOutcome::Failed { reason } => {
                tracing::warn!(node = %self.node_name, session = %session_id, "backup failed: {reason}");
                BackupResponse::failed(session_id, self.node_name.clone(), format!("FAILED: {reason}"))
            }
        }
    }

    async fn on_status_request(&self, req: StatusRequest, origin: Option<Arc<dyn ReturnPath>>) {
        let status = match &self.subsystem {
            Some(subsystem) => match subsystem.status().await {
                Ok(local) => Some(local),
                Err(e) => {
                    tracing::warn!(node = %self.node_name, "cannot read local backup status: {e}");
                    None
                }
            },
            None => None,
        };
        let local = status.unwrap_or_default();
        let response = StatusResponse {
            session_id: req.session_id,
            node_name: self.node_name.clone(),
            api_available: status.is_some(),
            backup_running: local.backup_running,
            backup_count: local.backup_count,
        };
        self.respond(origin.as_ref(), response.into());
    }

    /// Send on the path the request came in on, or borrow any open one.
    fn respond(&self, origin: Option<&Arc<dyn ReturnPath>>, message: WireMessage) {
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(node = %self.node_name, "cannot encode {}: {e}", message.kind());
                return;
            }
        };

        let path = origin
            .filter(|p| p.is_open())
            .cloned()
            .or_else(|| self.paths.any_return_path().filter(|p| p.is_open()));
        let Some(path) = path else {
            tracing::warn!(node = %self.node_name, kind = message.kind(), "no return path, dropping response");
            return;
        };

        if !path.send(frame) {
            tracing::warn!(node = %self.node_name, path = %path.label(), kind = message.kind(), "return path refused response");
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "backup task panicked".to_string()
    }
}
