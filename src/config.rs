//! src/config.rs
//! Configuration file model: JSON-backed, defaults-on-missing, reject-on-malformed-reload.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ProxyError, Result};
use crate::selector::SelectionPolicy;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct UpstreamProxy {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub users: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
    #[serde(default)]
    pub upstream_proxies: Vec<UpstreamProxy>,
    #[serde(default = "default_probe_interval")]
    pub probe_interval: u64,
    #[serde(default = "default_tcp_timeout")]
    pub tcp_timeout: f64,
    #[serde(default)]
    pub selection_mode: SelectionPolicy,
    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_bind_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_bind_port() -> u16 {
    3123
}

fn default_probe_interval() -> u64 {
    10
}

fn default_tcp_timeout() -> f64 {
    5.0
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_ip: default_bind_ip(),
            bind_port: default_bind_port(),
            upstream_proxies: Vec::new(),
            probe_interval: default_probe_interval(),
            tcp_timeout: default_tcp_timeout(),
            selection_mode: SelectionPolicy::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl Config {
    /// Validates the invariants from the spec's data model: probe interval
    /// >= 1s, timeout > 0. `selection_mode` is validated by serde itself
    /// (an unknown variant fails to deserialize).
    pub fn validate(&self) -> Result<()> {
        if self.probe_interval < 1 {
            return Err(ProxyError::Config(
                "probe_interval must be >= 1 second".into(),
            ));
        }
        if self.tcp_timeout <= 0.0 {
            return Err(ProxyError::Config("tcp_timeout must be > 0".into()));
        }
        if self.bind_port == 0 {
            return Err(ProxyError::Config("bind_port must be nonzero".into()));
        }
        Ok(())
    }

    /// Loads the config from `path`. A missing file writes and returns the
    /// defaults; a malformed file logs a warning and falls back to defaults,
    /// matching the original's bare `except: save_config(DEFAULT_CONFIG)`.
    pub fn load_or_init(path: &Path) -> Config {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Config>(&contents) {
                Ok(cfg) => match cfg.validate() {
                    Ok(()) => cfg,
                    Err(e) => {
                        warn!(error = %e, "config failed validation, using defaults");
                        Config::default()
                    }
                },
                Err(e) => {
                    warn!(error = %e, "malformed config JSON, using defaults");
                    Config::default()
                }
            },
            Err(_) => {
                let defaults = Config::default();
                if let Err(e) = defaults.save(path) {
                    warn!(error = %e, "failed to write default config");
                }
                defaults
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ProxyError::Config(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Parses and validates a replacement config for `reload_config`. On
    /// failure the caller keeps the previously active config.
    pub fn parse_reload(contents: &str) -> Result<Config> {
        let cfg: Config =
            serde_json::from_str(contents).map_err(|e| ProxyError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip() {
        let defaults = Config::default();
        let json = serde_json::to_string(&defaults).unwrap();
        let reparsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(reparsed.bind_ip, defaults.bind_ip);
        assert_eq!(reparsed.bind_port, defaults.bind_port);
        assert_eq!(reparsed.probe_interval, defaults.probe_interval);
        assert_eq!(reparsed.tcp_timeout, defaults.tcp_timeout);
    }

    #[test]
    fn missing_file_writes_defaults() {
        let dir = std::env::temp_dir().join(format!("runway-proxy-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("proxy_config.json");
        let _ = std::fs::remove_file(&path);

        let cfg = Config::load_or_init(&path);
        assert_eq!(cfg.bind_port, 3123);
        assert!(path.exists());

        let reread = Config::load_or_init(&path);
        assert_eq!(reread.bind_port, cfg.bind_port);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn malformed_json_falls_back_to_defaults() {
        let cfg = Config::parse_reload("{not valid json");
        assert!(cfg.is_err());
    }

    #[test]
    fn reload_rejects_bad_probe_interval() {
        let bad = r#"{"probe_interval": 0}"#;
        assert!(Config::parse_reload(bad).is_err());
    }
}
