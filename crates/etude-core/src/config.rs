// src/config.rs
//! Runtime configuration: defaults, then an optional TOML file, then the
//! environment (and `.env` when present).
//!
//! | Variable | Default |
//! |---|---|
//! | `ETUDE_HOST` | `0.0.0.0` |
//! | `ETUDE_PORT` | `9006` |
//! | `ETUDE_DOC_ROOT` | `./root` |
//! | `ETUDE_TIMESLOT` | `5` (seconds) |
//! | `ETUDE_LOG` | `info` |
//! | `ETUDE_LOG_FORMAT` | `text` (`json` for structured output) |
//!
//! The file uses the field names of [`Config`]; missing keys keep their defaults:
//!
//! ```toml
//! port = 8080
//! doc_root = "/srv/www"
//! timeslot_secs = 10
//! ```

use crate::error::{EtudeError, EtudeResult};
use serde::Deserialize;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 9006;
pub const DEFAULT_TIMESLOT_SECS: u32 = 5;

/// Maximum simultaneously open client connections.
pub const MAX_CONNECTIONS: usize = 4096;
/// Readiness events taken per wait.
pub const MAX_EVENTS: usize = 1024;
pub const LISTEN_BACKLOG: i32 = 5;
/// Idle connections are evicted after this many timeslots without traffic.
pub const IDLE_TIMESLOTS: u32 = 3;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub doc_root: PathBuf,
    pub timeslot_secs: u32,
    pub log_level: String,
    pub log_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            doc_root: PathBuf::from("./root"),
            timeslot_secs: DEFAULT_TIMESLOT_SECS,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        // A missing .env file is fine.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read `path` when given, then apply the environment on top.
    pub fn load(path: Option<&Path>) -> EtudeResult<Self> {
        let Some(path) = path else {
            return Ok(Self::from_env());
        };
        let _ = dotenvy::dotenv();
        Ok(Self::from_file(path)?.overlay(|key| std::env::var(key).ok()))
    }

    pub fn from_file(path: &Path) -> EtudeResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            EtudeError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> EtudeResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| EtudeError::Config(e.to_string()))?;
        if config.timeslot_secs == 0 {
            return Err(EtudeError::Config("timeslot_secs must be at least 1".into()));
        }
        Ok(config)
    }

    /// Build from an arbitrary key lookup over the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self::default().overlay(lookup)
    }

    /// Replace fields whose variable is set. Unparsable numbers keep the current value.
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(host) = lookup("ETUDE_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("ETUDE_PORT").and_then(|v| v.parse().ok()) {
            self.port = port;
        }
        if let Some(root) = lookup("ETUDE_DOC_ROOT") {
            self.doc_root = PathBuf::from(root);
        }
        if let Some(secs) = lookup("ETUDE_TIMESLOT")
            .and_then(|v| v.parse().ok())
            .filter(|secs| *secs > 0)
        {
            self.timeslot_secs = secs;
        }
        if let Some(level) = lookup("ETUDE_LOG") {
            self.log_level = level;
        }
        if let Some(format) = lookup("ETUDE_LOG_FORMAT") {
            self.log_format = format;
        }
        self
    }

    pub fn server_addr(&self) -> EtudeResult<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| EtudeError::InvalidAddress(self.host.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn timeslot(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeslot_secs))
    }

    pub fn is_json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}
