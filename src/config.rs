use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Tracker settings, optionally loaded from a JSON file.
///
/// ```json
/// { "tickIntervalMs": 1000, "userId": "U1" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerConfig {
    /// Period of the elapsed-time ticker.
    pub tick_interval_ms: u64,

    /// Signed-in user, when not given on the command line.
    pub user_id: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            user_id: None,
        }
    }
}

impl TrackerConfig {
    pub fn from_json(payload: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(payload).context("invalid tracker config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let payload = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json(&payload).with_context(|| format!("loading config {}", path.display()))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            bail!("tickIntervalMs must be greater than zero");
        }
        Ok(())
    }
}
