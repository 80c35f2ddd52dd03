use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of a backend node, as known to the node registry.
pub type NodeName = String;

/// Reserved message value: the node acknowledged the request but has not
/// finished yet. Never a terminal result.
pub const STARTED: &str = "STARTED";

/// Message value a node reports for a successful backup.
pub const SUCCESS: &str = "SUCCESS";

/// Short correlation token shared by every message of one run.
///
/// Eight hex characters taken from a UUID v4, so it stays readable in
/// operator output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        Self(uuid[..8].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a fleet-wide run walks its targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackupMode {
    /// One node at a time, in list order.
    Sequential,
    /// Every node at once.
    Parallel,
}

impl fmt::Display for BackupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupMode::Sequential => f.write_str("Sequential"),
            BackupMode::Parallel => f.write_str("Parallel"),
        }
    }
}
