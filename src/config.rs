//! Optional YAML configuration. Every key has a default.
//!
//! ```yaml
//! port: /dev/ttyACM0
//! baud: 115200
//! transport:
//!   read_timeout_ms: 100
//!   idle_wait_ms: 5
//!   close_timeout_ms: 1000
//! pacing:
//!   prompt_ms: 50
//!   value_ms: 10
//!   accept_ms: 20
//!   commit_ms: 50
//! response_timeout_ms: 2000
//! ```
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::constants::DEFAULT_BAUDRATE;
use crate::sequencer::Pacing;
use crate::transport::TransportOptions;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub port: Option<String>,
    pub baud: u32,
    pub transport: TransportConfig,
    pub pacing: PacingConfig,
    /// How long to wait for a dump, identification or measurement reply.
    pub response_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: None,
            baud: DEFAULT_BAUDRATE,
            transport: TransportConfig::default(),
            pacing: PacingConfig::default(),
            response_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    pub read_timeout_ms: u64,
    pub idle_wait_ms: u64,
    pub close_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        let d = TransportOptions::default();
        TransportConfig {
            read_timeout_ms: d.read_timeout.as_millis() as u64,
            idle_wait_ms: d.idle_wait.as_millis() as u64,
            close_timeout_ms: d.close_timeout.as_millis() as u64,
        }
    }
}

/// Loader pauses. These encode how fast the bridge polls its UART, not a
/// protocol rule, so slower bridges may need larger values.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PacingConfig {
    pub prompt_ms: u64,
    pub value_ms: u64,
    pub accept_ms: u64,
    pub commit_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        let d = Pacing::default();
        PacingConfig {
            prompt_ms: d.prompt.as_millis() as u64,
            value_ms: d.value.as_millis() as u64,
            accept_ms: d.accept.as_millis() as u64,
            commit_ms: d.commit.as_millis() as u64,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let raw = std::fs::read_to_string(p)
            .with_context(|| format!("reading config {}", p.display()))?;
        let config =
            Self::from_yaml(&raw).with_context(|| format!("parsing config {}", p.display()))?;
        log::debug!("Loaded config from {}", p.display());
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Config::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            read_timeout: Duration::from_millis(self.transport.read_timeout_ms),
            idle_wait: Duration::from_millis(self.transport.idle_wait_ms),
            close_timeout: Duration::from_millis(self.transport.close_timeout_ms),
        }
    }

    pub fn pacing(&self) -> Pacing {
        Pacing {
            prompt: Duration::from_millis(self.pacing.prompt_ms),
            value: Duration::from_millis(self.pacing.value_ms),
            accept: Duration::from_millis(self.pacing.accept_ms),
            commit: Duration::from_millis(self.pacing.commit_ms),
        }
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::from_yaml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.baud, 115200);
        assert_eq!(config.pacing(), Pacing::default());
        assert_eq!(config.transport_options(), TransportOptions::default());
        assert_eq!(config.response_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn partial_override() {
        let raw = "
port: COM7
pacing:
  accept_ms: 40
";
        let config = Config::from_yaml(raw).unwrap();
        assert_eq!(config.port.as_deref(), Some("COM7"));
        assert_eq!(config.baud, 115200);
        let pacing = config.pacing();
        assert_eq!(pacing.accept, Duration::from_millis(40));
        assert_eq!(pacing.value, Duration::from_millis(10));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::from_yaml("baudrate: 9600").is_err());
        assert!(Config::from_yaml("pacing:\n  prompt: 1").is_err());
    }
}
