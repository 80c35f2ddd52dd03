use std::time::Duration;

/// Timing configuration for an [`Orchestrator`](crate::Orchestrator).
///
/// All fields have sensible defaults. Use the builder pattern:
///
/// ```rust
/// use std::time::Duration;
/// use fleet_protocol::OrchestratorConfig;
///
/// let config = OrchestratorConfig::new()
///     .step_window(Duration::from_secs(10))
///     .fleet_timeout(Duration::from_secs(120));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Sequential mode: how long each target gets before the next one is sent.
    pub step_window: Duration,
    /// Parallel mode: when to close the session after fanning out.
    pub parallel_window: Duration,
    /// Hard limit on a fleet-wide session.
    pub fleet_timeout: Duration,
    /// Hard limit on a single-node session.
    pub single_timeout: Duration,
    /// How long a status probe waits for its answer.
    pub status_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self {
            step_window: Duration::from_secs(30),
            parallel_window: Duration::from_secs(60),
            fleet_timeout: Duration::from_secs(10 * 60),
            single_timeout: Duration::from_secs(5 * 60),
            status_timeout: Duration::from_secs(10),
        }
    }

    /// Set the per-node wait window for sequential runs (default: 30s).
    pub fn step_window(mut self, window: Duration) -> Self {
        self.step_window = window;
        self
    }

    /// Set the completion window for parallel runs (default: 60s).
    pub fn parallel_window(mut self, window: Duration) -> Self {
        self.parallel_window = window;
        self
    }

    /// Set the overall timeout for fleet-wide runs (default: 10 min).
    pub fn fleet_timeout(mut self, timeout: Duration) -> Self {
        self.fleet_timeout = timeout;
        self
    }

    /// Set the overall timeout for single-node runs (default: 5 min).
    pub fn single_timeout(mut self, timeout: Duration) -> Self {
        self.single_timeout = timeout;
        self
    }

    /// Set the status probe timeout (default: 10s).
    pub fn status_timeout(mut self, timeout: Duration) -> Self {
        self.status_timeout = timeout;
        self
    }
}
