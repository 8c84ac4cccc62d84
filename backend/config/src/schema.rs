//! ocrforge runtime configuration schema.
//!
//! Every section has concrete defaults, so an empty or missing file is a
//! complete configuration. Keys are camelCase in YAML.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::defaults::*;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OcrConfig {
    pub server: ServerConfig,
    pub workers: WorkersConfig,
    pub limits: LimitsConfig,
    pub supervisor: SupervisorConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Interface to bind, e.g. "0.0.0.0" or "::1"
    pub address: String,
    pub port: u16,
    /// Largest accepted frame in bytes
    pub max_message_size: usize,
    /// How long open sessions get to close after a shutdown signal
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .address
            .parse()
            .with_context(|| format!("Invalid listen address '{}'", self.address))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkersConfig {
    /// Worker threads, and recognizer slots
    pub threads: usize,
    /// Period of the recognizer slot recycler
    pub recycle_interval_secs: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            recycle_interval_secs: DEFAULT_RECYCLE_INTERVAL_SECS,
        }
    }
}

impl WorkersConfig {
    pub fn recycle_interval(&self) -> Duration {
        Duration::from_secs(self.recycle_interval_secs)
    }
}

// ---------------------------------------------------------------------------
// Admission limits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LimitsConfig {
    /// Process-wide cap on payload bytes held by admitted jobs
    pub max_in_flight_bytes: u64,
    /// Process-wide cap on admitted jobs
    pub max_in_flight_jobs: usize,
    /// Per-session outstanding jobs before backpressure; defaults to `workers.threads`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_max_in_flight: Option<usize>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_in_flight_bytes: DEFAULT_MAX_IN_FLIGHT_BYTES,
            max_in_flight_jobs: DEFAULT_MAX_IN_FLIGHT_JOBS,
            session_max_in_flight: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupervisorConfig {
    pub max_restarts: u32,
    pub backoff_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_restarts: DEFAULT_MAX_RESTARTS,
            backoff_secs: DEFAULT_BACKOFF_SECS,
        }
    }
}

impl SupervisorConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// `tesseract` executable name or path
    pub command: String,
    pub language: String,
    pub page_seg_mode: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_ENGINE_COMMAND.to_string(),
            language: DEFAULT_ENGINE_LANGUAGE.to_string(),
            page_seg_mode: DEFAULT_PAGE_SEG_MODE,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    /// Level or `EnvFilter` directive; `RUST_LOG` wins when set
    pub level: String,
    /// Emit console logs as JSON lines
    pub json: bool,
    /// Directory for daily-rotated NDJSON log files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            json: false,
            dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_is_all_defaults() {
        let cfg: OcrConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg, OcrConfig::default());
        assert_eq!(cfg.server.port, 50051);
        assert_eq!(cfg.server.max_message_size, 100 * 1024 * 1024);
        assert_eq!(cfg.workers.threads, 4);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let yaml = "server:\n  port: 6000\nlimits:\n  sessionMaxInFlight: 2\n";
        let cfg: OcrConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.server.port, 6000);
        assert_eq!(cfg.server.address, "0.0.0.0");
        assert_eq!(cfg.limits.session_max_in_flight, Some(2));
        assert_eq!(cfg.limits.max_in_flight_jobs, 256);
    }

    #[test]
    fn socket_addr_accepts_ipv6() {
        let server = ServerConfig {
            address: "::1".to_string(),
            port: 7000,
            ..Default::default()
        };
        assert_eq!(server.socket_addr().unwrap().to_string(), "[::1]:7000");
    }

    #[test]
    fn socket_addr_rejects_hostnames() {
        let server = ServerConfig {
            address: "localhost".to_string(),
            ..Default::default()
        };
        assert!(server.socket_addr().is_err());
    }
}
