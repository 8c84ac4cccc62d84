//! Config file location and loading.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_yaml::Value;
use tokio::fs;
use tracing::{debug, info};

use crate::env::resolve_env_vars_with;
use crate::schema::OcrConfig;

/// Default config file name within the config directory.
const CONFIG_FILE_NAME: &str = "config.yaml";

pub const ENV_CONFIG_DIR: &str = "OCRFORGE_CONFIG_DIR";

/// Resolve the ocrforge config directory.
/// Priority: `OCRFORGE_CONFIG_DIR` env > `~/.ocrforge/` > `./.ocrforge/`
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    match dirs::home_dir() {
        Some(home) => home.join(".ocrforge"),
        None => PathBuf::from(".ocrforge"),
    }
}

/// Resolve the full path to the main config file.
pub fn config_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CONFIG_FILE_NAME)
}

/// Load and parse the config from disk, substituting `${VAR}` references.
///
/// Returns `Ok(Default::default())` if the file doesn't exist (first run).
pub async fn load_config(
    path: &Path,
    env: &HashMap<String, String>,
) -> Result<OcrConfig> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        debug!(path = %path.display(), "Config file does not exist; using defaults");
        return Ok(OcrConfig::default());
    }

    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&raw, env)
        .with_context(|| format!("Failed to parse config YAML at: {}", path.display()))?;

    info!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Parse YAML text into a config. Blank documents yield defaults.
pub fn parse_config(
    raw: &str,
    env: &HashMap<String, String>,
) -> Result<OcrConfig> {
    let value: Value = serde_yaml::from_str(raw).context("Invalid YAML")?;
    if value.is_null() {
        return Ok(OcrConfig::default());
    }
    let value = resolve_env_vars_with(&value, env)?;
    serde_yaml::from_value(value).context("Config does not match the expected schema")
}
