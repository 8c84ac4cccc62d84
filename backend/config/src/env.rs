//! Environment handling for config values.
//!
//! Two mechanisms, applied in this order during loading:
//! - `${VAR_NAME}` references inside YAML string values are substituted at
//!   parse time. `$${VAR}` escapes to a literal `${VAR}`.
//! - `OCRFORGE_*` variables override individual settings after parsing.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_yaml::Value;
use tracing::debug;

use crate::schema::OcrConfig;

pub const ENV_ADDRESS: &str = "OCRFORGE_ADDRESS";
pub const ENV_PORT: &str = "OCRFORGE_PORT";
pub const ENV_THREADS: &str = "OCRFORGE_THREADS";
pub const ENV_MAX_MESSAGE_SIZE: &str = "OCRFORGE_MAX_MESSAGE_SIZE";
pub const ENV_LOG_LEVEL: &str = "OCRFORGE_LOG_LEVEL";
pub const ENV_TESSERACT: &str = "OCRFORGE_TESSERACT";
pub const ENV_LOG_DIR: &str = "OCRFORGE_LOG_DIR";

/// `${NAME}`, optionally preceded by an escaping `$`.
static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\$?)\$\{([A-Z_][A-Z0-9_]*)\}").unwrap());

/// Error returned for missing env vars.
#[derive(Debug, thiserror::Error)]
#[error("Missing env var \"{var_name}\" referenced at config path: {config_path}")]
pub struct MissingEnvVarError {
    pub var_name: String,
    pub config_path: String,
}

/// Snapshot of the process environment.
pub fn process_env() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Substitute `${VAR}` references in every string of a YAML value tree.
///
/// A reference to an unset or empty variable is an error.
pub fn resolve_env_vars_with(
    value: &Value,
    env: &HashMap<String, String>,
) -> Result<Value, MissingEnvVarError> {
    substitute_value(value, env, "")
}

fn substitute_value(
    value: &Value,
    env: &HashMap<String, String>,
    path: &str,
) -> Result<Value, MissingEnvVarError> {
    match value {
        Value::String(s) => substitute_string(s, env, path).map(Value::String),
        Value::Sequence(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| substitute_value(v, env, &format!("{path}[{i}]")))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Sequence),
        Value::Mapping(map) => {
            let mut out = serde_yaml::Mapping::new();
            for (k, v) in map {
                let key = k.as_str().map(str::to_owned).unwrap_or_else(|| format!("{k:?}"));
                let child_path = if path.is_empty() {
                    key
                } else {
                    format!("{path}.{key}")
                };
                out.insert(k.clone(), substitute_value(v, env, &child_path)?);
            }
            Ok(Value::Mapping(out))
        }
        other => Ok(other.clone()),
    }
}

fn substitute_string(
    s: &str,
    env: &HashMap<String, String>,
    path: &str,
) -> Result<String, MissingEnvVarError> {
    if !s.contains('$') {
        return Ok(s.to_string());
    }

    let mut missing: Option<MissingEnvVarError> = None;
    let substituted = ENV_VAR_PATTERN.replace_all(s, |caps: &Captures| {
        let name = &caps[2];
        if !caps[1].is_empty() {
            return format!("${{{name}}}");
        }
        match env.get(name) {
            Some(val) if !val.is_empty() => val.clone(),
            _ => {
                missing.get_or_insert_with(|| MissingEnvVarError {
                    var_name: name.to_string(),
                    config_path: path.to_string(),
                });
                String::new()
            }
        }
    });

    match missing {
        Some(err) => Err(err),
        None => Ok(substituted.into_owned()),
    }
}

/// Apply `OCRFORGE_*` overrides. Unparseable numbers are errors.
pub fn apply_env_overrides(mut config: OcrConfig, env: &HashMap<String, String>) -> Result<OcrConfig> {
    if let Some(address) = lookup(env, ENV_ADDRESS) {
        config.server.address = address.to_string();
    }
    if let Some(port) = parse_var(env, ENV_PORT)? {
        config.server.port = port;
    }
    if let Some(threads) = parse_var(env, ENV_THREADS)? {
        config.workers.threads = threads;
    }
    if let Some(size) = parse_var(env, ENV_MAX_MESSAGE_SIZE)? {
        config.server.max_message_size = size;
    }
    if let Some(level) = lookup(env, ENV_LOG_LEVEL) {
        config.logging.level = level.to_string();
    }
    if let Some(command) = lookup(env, ENV_TESSERACT) {
        config.engine.command = command.to_string();
    }
    if let Some(dir) = lookup(env, ENV_LOG_DIR) {
        config.logging.dir = Some(PathBuf::from(dir));
    }
    Ok(config)
}

fn lookup<'a>(env: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    let value = env.get(name).map(|v| v.trim()).filter(|v| !v.is_empty())?;
    debug!(var = name, "Config overridden from environment");
    Some(value)
}

fn parse_var<T>(env: &HashMap<String, String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(env, name)
        .map(|raw| {
            raw.parse::<T>()
                .with_context(|| format!("Invalid value '{raw}' for {name}"))
        })
        .transpose()
}
