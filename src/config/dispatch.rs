//! Dispatcher configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::AppResult;

/// Prefix for environment overrides, e.g. `GEN_DISPATCH_MAX_CONCURRENT`.
pub const ENV_PREFIX: &str = "GEN_DISPATCH_";

/// Timeouts, concurrency limits and buffer sizes for dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// How long a batch item waits for a backend, in seconds.
    pub backend_timeout_secs: u64,
    /// How long a sweep item waits for a backend, in seconds.
    pub sweep_backend_timeout_secs: u64,
    /// Default cap on concurrently running items per batch.
    pub max_concurrent: usize,
    /// Largest cross product a sweep may expand to.
    pub max_sweep_points: usize,
    /// Longest allocator wait without a registry notification, in milliseconds.
    pub poll_backstop_ms: u64,
    /// Longest sweep drain wait without an item completing, in milliseconds.
    pub drain_backstop_ms: u64,
    /// Progress sink send timeout, in seconds.
    pub send_timeout_secs: u64,
    /// Capacity of each event channel.
    pub event_buffer: usize,
    /// Artifacts expected from one batch item.
    pub outputs_per_item: usize,
    /// File extension for stored artifacts.
    pub output_format: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            backend_timeout_secs: 120,
            sweep_backend_timeout_secs: 600,
            max_concurrent: 32,
            max_sweep_points: 100_000,
            poll_backstop_ms: 2000,
            drain_backstop_ms: 2000,
            send_timeout_secs: 60,
            event_buffer: 256,
            outputs_per_item: 1,
            output_format: "png".to_string(),
        }
    }
}

fn env_override<T: std::str::FromStr>(name: &str, slot: &mut T) -> AppResult<()>
where
    T::Err: std::fmt::Display,
{
    let key = format!("{ENV_PREFIX}{name}");
    if let Ok(raw) = std::env::var(&key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key}={raw}: {e}"))?;
    }
    Ok(())
}

impl DispatchConfig {
    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.backend_timeout_secs == 0 {
            return Err("backend_timeout_secs must be greater than 0".into());
        }
        if self.sweep_backend_timeout_secs == 0 {
            return Err("sweep_backend_timeout_secs must be greater than 0".into());
        }
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be greater than 0".into());
        }
        if self.max_sweep_points == 0 || u32::try_from(self.max_sweep_points).is_err() {
            return Err("max_sweep_points must be between 1 and u32::MAX".into());
        }
        if self.poll_backstop_ms == 0 || self.drain_backstop_ms == 0 {
            return Err("backstop intervals must be greater than 0".into());
        }
        if self.send_timeout_secs == 0 {
            return Err("send_timeout_secs must be greater than 0".into());
        }
        if self.event_buffer == 0 {
            return Err("event_buffer must be greater than 0".into());
        }
        if self.outputs_per_item == 0 {
            return Err("outputs_per_item must be greater than 0".into());
        }
        if self.output_format.is_empty() || self.output_format.contains(['.', '/', '\\']) {
            return Err("output_format must be a bare file extension".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `GEN_DISPATCH_*` variables, after loading `.env`.
    ///
    /// # Errors
    ///
    /// Fails if a variable does not parse or the result is invalid.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        env_override("BACKEND_TIMEOUT_SECS", &mut cfg.backend_timeout_secs)?;
        env_override("SWEEP_BACKEND_TIMEOUT_SECS", &mut cfg.sweep_backend_timeout_secs)?;
        env_override("MAX_CONCURRENT", &mut cfg.max_concurrent)?;
        env_override("MAX_SWEEP_POINTS", &mut cfg.max_sweep_points)?;
        env_override("POLL_BACKSTOP_MS", &mut cfg.poll_backstop_ms)?;
        env_override("DRAIN_BACKSTOP_MS", &mut cfg.drain_backstop_ms)?;
        env_override("SEND_TIMEOUT_SECS", &mut cfg.send_timeout_secs)?;
        env_override("EVENT_BUFFER", &mut cfg.event_buffer)?;
        env_override("OUTPUTS_PER_ITEM", &mut cfg.outputs_per_item)?;
        env_override("OUTPUT_FORMAT", &mut cfg.output_format)?;
        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }

    /// Batch backend wait.
    #[must_use]
    pub const fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    /// Sweep backend wait.
    #[must_use]
    pub const fn sweep_backend_timeout(&self) -> Duration {
        Duration::from_secs(self.sweep_backend_timeout_secs)
    }

    /// Allocator poll backstop.
    #[must_use]
    pub const fn poll_backstop(&self) -> Duration {
        Duration::from_millis(self.poll_backstop_ms)
    }

    /// Sweep drain backstop.
    #[must_use]
    pub const fn drain_backstop(&self) -> Duration {
        Duration::from_millis(self.drain_backstop_ms)
    }

    /// Progress sink send timeout.
    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}
