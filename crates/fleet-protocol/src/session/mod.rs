/// Coordinator-side session tracking.
///
/// - **Types**: `Session`, `NodeResult`, lifecycle enums
/// - **Store**: concurrent table of open sessions, owns the finalize-once transition
/// - **Summary**: the aggregated report rendered when a session closes
pub mod store;
pub mod summary;
pub mod types;

pub use store::{RecordOutcome, SessionSnapshot, SessionStore};
pub use summary::Summary;
pub use types::{FinalizeReason, NodeResult, Session, SessionState};
