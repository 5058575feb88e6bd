//! Configuration document and the per-run session context.
//!
//! The configuration is a JSON object; keys use camelCase to match the
//! `config.json` files the tool has always read.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::EngineError;
use crate::events::{Event, EventSink};
use crate::sync::ExclusionPolicy;

/// File names tried, in order, when no explicit configuration path is given.
pub const CONFIG_CANDIDATES: &[&str] = &["config.json", ".ftp/config.json", "ftp_config.json"];

pub const DEFAULT_PORT: u16 = 21;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_TRANSFERS: usize = 128;
pub const DEFAULT_MAX_DEPTH: usize = 64;

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

fn default_local_path() -> String {
    ".".to_string()
}

fn default_max_transfers() -> usize {
    DEFAULT_MAX_TRANSFERS
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_exclude() -> Vec<String> {
    [".git", ".vscode", "node_modules", "vendor", "ftp.log"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Settings read from the configuration document.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub remote_path: String,
    #[serde(default = "default_local_path")]
    pub local_path: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Connect and receive timeout, in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_true")]
    pub passive: bool,
    /// Ceiling on file transfers per run
    #[serde(default = "default_max_transfers")]
    pub max_transfers: usize,
    /// Deepest directory level a walk enters below its root
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Bare names skipped by every walk, together with their subtrees
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
    /// Skip names starting with '.'
    #[serde(default = "default_true")]
    pub exclude_hidden: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"****")
            .field("remote_path", &self.remote_path)
            .field("local_path", &self.local_path)
            .field("port", &self.port)
            .field("timeout", &self.timeout)
            .field("passive", &self.passive)
            .field("max_transfers", &self.max_transfers)
            .field("max_depth", &self.max_depth)
            .field("exclude", &self.exclude)
            .field("exclude_hidden", &self.exclude_hidden)
            .finish()
    }
}

impl Config {
    /// Parse and validate a configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let config: Config = serde_json::from_str(json)
            .map_err(|e| EngineError::Config(format!("invalid JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Try each of `CONFIG_CANDIDATES` under `dir`; the first existing file wins.
    ///
    /// A candidate that exists but fails to parse or validate is an error;
    /// later candidates are not consulted.
    pub fn discover(dir: &Path) -> Result<(Self, PathBuf), EngineError> {
        for candidate in CONFIG_CANDIDATES {
            let path = dir.join(candidate);
            if path.is_file() {
                let config = Self::load(&path)?;
                return Ok((config, path));
            }
        }
        Err(EngineError::Config(format!(
            "no configuration found in {} (tried {})",
            dir.display(),
            CONFIG_CANDIDATES.join(", ")
        )))
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let required = [
            ("host", &self.host),
            ("username", &self.username),
            ("password", &self.password),
            ("remotePath", &self.remote_path),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(key, _)| *key)
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::Config(format!(
                "missing required keys: {}",
                missing.join(", ")
            )));
        }
        if !self.passive {
            return Err(EngineError::Config(
                "active mode is not supported; set \"passive\": true".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(EngineError::Config("port must be non-zero".to_string()));
        }
        if self.timeout == 0 {
            return Err(EngineError::Config("timeout must be at least 1 second".to_string()));
        }
        Ok(())
    }
}

/// Connection and walk parameters derived from `Config`.
#[derive(Clone)]
pub struct SessionSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub remote_root: String,
    pub local_root: PathBuf,
    pub timeout: Duration,
    pub max_transfers: usize,
    pub max_depth: usize,
}

impl fmt::Debug for SessionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("remote_root", &self.remote_root)
            .field("local_root", &self.local_root)
            .field("timeout", &self.timeout)
            .field("max_transfers", &self.max_transfers)
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        let remote_root = match config.remote_path.trim_end_matches('/') {
            "" => "/".to_string(),
            trimmed => trimmed.to_string(),
        };
        SessionSettings {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
            remote_root,
            local_root: PathBuf::from(&config.local_path),
            timeout: Duration::from_secs(config.timeout),
            max_transfers: config.max_transfers,
            max_depth: config.max_depth,
        }
    }
}

/// Everything one run needs, passed explicitly to each component.
#[derive(Clone)]
pub struct SessionContext {
    pub settings: SessionSettings,
    pub exclusion: ExclusionPolicy,
    pub sink: Arc<dyn EventSink>,
}

impl SessionContext {
    pub fn new(config: &Config, sink: Arc<dyn EventSink>) -> Self {
        let names: BTreeSet<String> = config.exclude.iter().cloned().collect();
        SessionContext {
            settings: SessionSettings::from(config),
            exclusion: ExclusionPolicy::new(names, config.exclude_hidden),
            sink,
        }
    }

    pub fn emit(&self, event: Event) {
        self.sink.emit(&event);
    }
}
