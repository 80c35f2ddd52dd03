//! Fleet backup protocol.
//!
//! Coordinates a backup across independent backend nodes from one
//! coordinator. Nodes never talk to each other; every message carries a
//! short session id that the coordinator uses to correlate the responses.
//!
//! Coordinator side: [`Orchestrator`] over a [`NodeRegistry`] and a
//! [`Scheduler`]. Node side: [`BackendHandler`] over a [`BackupSubsystem`]
//! and [`ReturnPaths`].
//!
//! Wire format: discriminator string, then fields in declared order
//! (u16-prefixed UTF-8 strings, big-endian integers).

pub mod config;
pub mod error;
pub mod handler;
pub mod loopback;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod sink;
pub mod types;
pub mod wire;

pub use config::OrchestratorConfig;
pub use error::FleetProtocolError;
pub use handler::{BackendHandler, BackupOutcome, BackupSubsystem, LocalStatus};
pub use loopback::LoopbackNetwork;
pub use metrics::{Counter, OrchestratorMetrics};
pub use orchestrator::Orchestrator;
pub use registry::{InboundFrame, NodeRegistry, ReturnPath, ReturnPaths};
pub use runtime::{spawn_coordinator, spawn_node};
pub use scheduler::{Scheduler, Task, TimerHandle, TokioScheduler};
pub use session::{
    FinalizeReason, NodeResult, RecordOutcome, Session, SessionSnapshot, SessionState,
    SessionStore, Summary,
};
pub use sink::{BufferSink, Line, OutputSink, TeeSink, Tone, TracingSink};
pub use types::{BackupMode, NodeName, SessionId, STARTED, SUCCESS};
pub use wire::{BackupRequest, BackupResponse, Channel, StatusRequest, StatusResponse, WireMessage};
