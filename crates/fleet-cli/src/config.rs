use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use fleet_protocol::OrchestratorConfig;
use serde::Deserialize;

/// Environment variable naming a config file when `--config` is absent.
pub const CONFIG_ENV: &str = "FLEET_BACKUP_CONFIG";

/// Timing overrides read from a JSON file. Every field is optional; missing
/// ones keep the library defaults.
///
/// ```json
/// { "step_window_secs": 10, "fleet_timeout_secs": 120 }
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub step_window_secs: Option<u64>,
    pub parallel_window_secs: Option<u64>,
    pub fleet_timeout_secs: Option<u64>,
    pub single_timeout_secs: Option<u64>,
    pub status_timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// `--config` wins, then the environment, then nothing.
    pub fn resolve(flag: Option<&Path>) -> anyhow::Result<Self> {
        let path = flag
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        match path {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading config");
                Self::load(&path)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn apply(&self, base: OrchestratorConfig) -> OrchestratorConfig {
        let mut config = base;
        if let Some(s) = self.step_window_secs {
            config = config.step_window(Duration::from_secs(s));
        }
        if let Some(s) = self.parallel_window_secs {
            config = config.parallel_window(Duration::from_secs(s));
        }
        if let Some(s) = self.fleet_timeout_secs {
            config = config.fleet_timeout(Duration::from_secs(s));
        }
        if let Some(s) = self.single_timeout_secs {
            config = config.single_timeout(Duration::from_secs(s));
        }
        if let Some(s) = self.status_timeout_secs {
            config = config.status_timeout(Duration::from_secs(s));
        }
        config
    }
}
