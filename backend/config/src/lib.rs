//! Runtime configuration for the ocrforge server.
//!
//! Provides:
//! - Typed config schema with defaults for every section
//! - YAML loading with `${ENV_VAR}` substitution
//! - `OCRFORGE_*` environment overrides and command-line overrides
//! - Derived defaults and validation

pub mod defaults;
pub mod env;
pub mod io;
pub mod schema;
pub mod validation;

pub use defaults::apply_all_defaults;
pub use env::{apply_env_overrides, process_env, resolve_env_vars_with, MissingEnvVarError};
pub use io::{config_dir, config_file_path, load_config, parse_config};
pub use schema::{
    EngineConfig, LimitsConfig, LoggingConfig, OcrConfig, ServerConfig, SupervisorConfig,
    WorkersConfig,
};
pub use validation::{validate, ConfigValidationError, ValidationReport};

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Result};

/// Settings given on the command line. They win over file and environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub address: Option<String>,
    pub port: Option<u16>,
    pub threads: Option<usize>,
    pub max_message_size: Option<usize>,
}

impl ConfigOverrides {
    pub fn apply(&self, mut config: OcrConfig) -> OcrConfig {
        if let Some(address) = &self.address {
            config.server.address = address.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(threads) = self.threads {
            config.workers.threads = threads;
        }
        if let Some(size) = self.max_message_size {
            config.server.max_message_size = size;
        }
        config
    }
}

/// Load, override, default, and validate a config file.
///
/// This is the main entry point for loading a config at runtime.
pub async fn load_and_prepare(path: &Path, overrides: &ConfigOverrides) -> Result<OcrConfig> {
    prepare_with(path, overrides, &process_env()).await
}

/// [`load_and_prepare`] against an explicit environment.
pub async fn prepare_with(
    path: &Path,
    overrides: &ConfigOverrides,
    env: &HashMap<String, String>,
) -> Result<OcrConfig> {
    let config = load_config(path, env).await?;
    let config = apply_env_overrides(config, env)?;
    let config = overrides.apply(config);
    let config = apply_all_defaults(config);

    let report = validate(&config);
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    if !report.is_valid() {
        for error in &report.errors {
            tracing::error!(path = %error.path, message = %error.message, "Config error");
        }
        let summary: Vec<String> = report.errors.iter().map(ToString::to_string).collect();
        bail!("Invalid configuration:\n  {}", summary.join("\n  "));
    }

    Ok(config)
}
