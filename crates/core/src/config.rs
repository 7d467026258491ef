use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GatescopeError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub history_url: String,
    pub stream_url: String,
    pub reconnect_delay: Duration,
    pub request_timeout: Duration,
    pub initial_paused: bool,
    pub fetch_history: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            history_url: "http://127.0.0.1:8080/api/traces".to_string(),
            stream_url: "ws://127.0.0.1:8080/api/traces/ws".to_string(),
            reconnect_delay: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
            initial_paused: false,
            fetch_history: true,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        let config_path = config_file_path();
        if let Some(file_overrides) = load_file_overrides(&config_path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        let env_overrides = load_env_overrides();
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        let env_overrides = load_env_overrides();
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    history_url: Option<String>,
    stream_url: Option<String>,
    reconnect_delay: Option<String>,
    request_timeout: Option<String>,
    initial_paused: Option<String>,
    fetch_history: Option<String>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("GATESCOPE_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("gatescope/config.toml")
}

fn load_file_overrides(path: &PathBuf) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| GatescopeError::Config(format!("failed reading {}: {e}", path.display())))?;
    let parsed: ConfigOverrides = toml::from_str(&raw)
        .map_err(|e| GatescopeError::Config(format!("failed parsing {}: {e}", path.display())))?;
    Ok(Some(parsed))
}

fn load_env_overrides() -> ConfigOverrides {
    ConfigOverrides {
        history_url: env::var("GATESCOPE_HISTORY_URL").ok(),
        stream_url: env::var("GATESCOPE_STREAM_URL").ok(),
        reconnect_delay: env::var("GATESCOPE_RECONNECT_DELAY").ok(),
        request_timeout: env::var("GATESCOPE_REQUEST_TIMEOUT").ok(),
        initial_paused: env::var("GATESCOPE_INITIAL_PAUSED").ok(),
        fetch_history: env::var("GATESCOPE_FETCH_HISTORY").ok(),
    }
}

fn apply_overrides(cfg: &mut Config, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.history_url {
        cfg.history_url = v;
    }
    if let Some(v) = overrides.stream_url {
        cfg.stream_url = v;
    }
    if let Some(v) = overrides.reconnect_delay {
        cfg.reconnect_delay = humantime::parse_duration(&v).map_err(|e| {
            GatescopeError::Config(format!("bad reconnect_delay in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.request_timeout {
        cfg.request_timeout = humantime::parse_duration(&v).map_err(|e| {
            GatescopeError::Config(format!("bad request_timeout in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.initial_paused {
        cfg.initial_paused = parse_bool(&v).map_err(|e| {
            GatescopeError::Config(format!("bad initial_paused in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.fetch_history {
        cfg.fetch_history = parse_bool(&v).map_err(|e| {
            GatescopeError::Config(format!("bad fetch_history in {source}: {e} (value={v})"))
        })?;
    }
    Ok(())
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(GatescopeError::Parse(format!(
            "expected a boolean, got {other}"
        ))),
    }
}
