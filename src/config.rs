use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;

use crate::engine::EngineSettings;

/// Server settings, read once at startup from `CHAIRSLOT_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub engine: EngineSettings,
}

#[derive(Debug)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    Missing(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "{var}: invalid value {value:?}"),
            ConfigError::Missing(var) => write!(f, "{var} must be set"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let parsed = |var: &'static str| -> Result<Option<i64>, ConfigError> {
            match get(var) {
                None => Ok(None),
                Some(value) => value
                    .trim()
                    .parse::<i64>()
                    .map(Some)
                    .map_err(|_| ConfigError::Invalid { var, value }),
            }
        };
        let in_range = |var: &'static str, v: i64, lo: i64, hi: i64| {
            if (lo..=hi).contains(&v) {
                Ok(v)
            } else {
                Err(ConfigError::Invalid {
                    var,
                    value: v.to_string(),
                })
            }
        };

        let port = match parsed("CHAIRSLOT_PORT")? {
            Some(p) => in_range("CHAIRSLOT_PORT", p, 1, u16::MAX as i64)? as u16,
            None => 5433,
        };
        let metrics_port = match parsed("CHAIRSLOT_METRICS_PORT")? {
            Some(p) => Some(in_range("CHAIRSLOT_METRICS_PORT", p, 1, u16::MAX as i64)? as u16),
            None => None,
        };
        let max_connections = match parsed("CHAIRSLOT_MAX_CONNECTIONS")? {
            Some(n) => in_range("CHAIRSLOT_MAX_CONNECTIONS", n, 1, 65_536)? as usize,
            None => 256,
        };
        let compact_threshold = match parsed("CHAIRSLOT_COMPACT_THRESHOLD")? {
            Some(n) => in_range("CHAIRSLOT_COMPACT_THRESHOLD", n, 1, i64::MAX)? as u64,
            None => 1000,
        };
        let read_timeout_ms = match parsed("CHAIRSLOT_READ_TIMEOUT_MS")? {
            Some(n) => in_range("CHAIRSLOT_READ_TIMEOUT_MS", n, 1, 600_000)? as u64,
            None => 2000,
        };
        let offset_minutes = parsed("CHAIRSLOT_UTC_OFFSET_MINUTES")?.unwrap_or(0);
        let tz = i32::try_from(offset_minutes * 60)
            .ok()
            .and_then(FixedOffset::east_opt)
            .ok_or(ConfigError::Invalid {
                var: "CHAIRSLOT_UTC_OFFSET_MINUTES",
                value: offset_minutes.to_string(),
            })?;

        let password = match get("CHAIRSLOT_PASSWORD") {
            Some(p) if p.is_empty() => return Err(ConfigError::Missing("CHAIRSLOT_PASSWORD")),
            Some(p) => p,
            None => "chairslot".into(),
        };

        Ok(Self {
            bind: get("CHAIRSLOT_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            data_dir: PathBuf::from(get("CHAIRSLOT_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password,
            max_connections,
            compact_threshold,
            metrics_port,
            tls_cert: get("CHAIRSLOT_TLS_CERT"),
            tls_key: get("CHAIRSLOT_TLS_KEY"),
            engine: EngineSettings {
                tz,
                read_timeout: Duration::from_millis(read_timeout_ms),
            },
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
