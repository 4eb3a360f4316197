use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_POOL_MAX_IDLE: usize = 1024;

/// Run mode. Controls how chatty the router is about its own setup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Debug,
    Release,
    Test,
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" | "development" | "dev" => Ok(Mode::Debug),
            "release" | "production" | "prod" => Ok(Mode::Release),
            "test" => Ok(Mode::Test),
            _ => Err(ConfigError::InvalidSetting {
                key: "ETUDE_MODE",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Debug => "debug",
            Mode::Release => "release",
            Mode::Test => "test",
        })
    }
}

/// Router configuration. Built once and handed to
/// [`Router::with_config`](crate::Router::with_config).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Debug mode logs every route registration.
    pub mode: Mode,

    /// Upper bound on idle contexts kept by the pool (default: 1024).
    pub pool_max_idle: usize,

    /// When `false`, a path registered under other methods is reported as
    /// not found instead of method-not-allowed (default: true).
    pub handle_method_not_allowed: bool,

    /// Default tracing filter used when `RUST_LOG` is unset (default: info).
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Debug,
            pool_max_idle: DEFAULT_POOL_MAX_IDLE,
            handle_method_not_allowed: true,
            log_level: "info".to_string(),
        }
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidSetting {
            key,
            value: value.to_string(),
        }),
    }
}

impl Config {
    /// Load configuration from environment variables (with .env support).
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is fine.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(mode) = lookup("ETUDE_MODE") {
            config.mode = mode.parse()?;
        }
        if let Some(raw) = lookup("ETUDE_POOL_MAX_IDLE") {
            config.pool_max_idle =
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidSetting {
                        key: "ETUDE_POOL_MAX_IDLE",
                        value: raw.clone(),
                    })?;
        }
        if let Some(raw) = lookup("ETUDE_HANDLE_METHOD_NOT_ALLOWED") {
            config.handle_method_not_allowed =
                parse_bool("ETUDE_HANDLE_METHOD_NOT_ALLOWED", raw.trim())?;
        }
        if let Some(level) = lookup("RUST_LOG") {
            config.log_level = level;
        }
        Ok(config)
    }

    pub fn is_debug(&self) -> bool {
        self.mode == Mode::Debug
    }

    pub fn is_release(&self) -> bool {
        self.mode == Mode::Release
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.mode, Mode::Debug);
        assert_eq!(config.pool_max_idle, DEFAULT_POOL_MAX_IDLE);
        assert!(config.handle_method_not_allowed);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("ETUDE_MODE", "production"),
            ("ETUDE_POOL_MAX_IDLE", "16"),
            ("ETUDE_HANDLE_METHOD_NOT_ALLOWED", "no"),
            ("RUST_LOG", "etude_core=debug"),
        ]))
        .unwrap();
        assert!(config.is_release());
        assert_eq!(config.pool_max_idle, 16);
        assert!(!config.handle_method_not_allowed);
        assert_eq!(config.log_level, "etude_core=debug");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = Config::from_lookup(lookup(&[("ETUDE_POOL_MAX_IDLE", "lots")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidSetting {
                key: "ETUDE_POOL_MAX_IDLE",
                value: "lots".into()
            }
        );
        assert!(Config::from_lookup(lookup(&[("ETUDE_MODE", "turbo")])).is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: Config = serde_json::from_str(r#"{"mode":"test","pool_max_idle":8}"#).unwrap();
        assert_eq!(config.mode, Mode::Test);
        assert_eq!(config.pool_max_idle, 8);
        assert!(config.handle_method_not_allowed);
    }
}
