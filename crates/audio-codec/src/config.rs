//! Engine tuning parameters.
//!
//! Defaults match the timing budgets the buffer cycle is designed around; a TOML file
//! may override any subset of them.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Buffer-cycle tuning shared by the session engine and the software decoder.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Max wait for a free input slot, per attempt (microseconds).
    pub input_timeout_us: u64,
    /// Max wait for a decoded output slot, per poll (microseconds).
    pub output_timeout_us: u64,
    /// Upper bound on input slots filled by one fill pass.
    pub max_input_fills: usize,
    /// Input pool size for the software decoder.
    pub input_buffer_count: usize,
    /// Output pool size for the software decoder.
    pub output_buffer_count: usize,
    /// Capacity in bytes of each software decoder input slot.
    pub input_buffer_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            input_timeout_us: 2_500,
            output_timeout_us: 35_000,
            max_input_fills: 16,
            input_buffer_count: 4,
            output_buffer_count: 2,
            input_buffer_capacity: 256 * 1024,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file; absent keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<EngineConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        cfg.validate()
            .with_context(|| format!("invalid config {:?}", path))?;
        Ok(cfg)
    }

    /// Reject settings under which the buffer cycle can never move data.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.max_input_fills > 0, "max_input_fills must be at least 1");
        anyhow::ensure!(
            self.input_buffer_count > 0,
            "input_buffer_count must be at least 1"
        );
        anyhow::ensure!(
            self.output_buffer_count > 0,
            "output_buffer_count must be at least 1"
        );
        anyhow::ensure!(
            self.input_buffer_capacity > 0,
            "input_buffer_capacity must be at least 1 byte"
        );
        Ok(())
    }

    pub fn input_timeout(&self) -> Duration {
        Duration::from_micros(self.input_timeout_us)
    }

    pub fn output_timeout(&self) -> Duration {
        Duration::from_micros(self.output_timeout_us)
    }
}
