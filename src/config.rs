//! Configuration management for Turnstile.

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{default_policies, ClockKind, PolicyConfig};

/// Prefix for environment overrides, e.g. `TURNSTILE__SERVER__GRPC_ADDR`.
const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Time source for every limiter
    #[serde(default)]
    pub clock: ClockKind,

    /// Admission policies by name
    #[serde(default = "default_policies")]
    pub policies: HashMap<String, PolicyConfig>,
}

impl Default for TurnstileConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            clock: ClockKind::default(),
            policies: default_policies(),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// gRPC server address
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: SocketAddr,

    /// Seconds between expired-state sweeps; 0 disables sweeping
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_grpc_addr(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_grpc_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8081))
}

fn default_sweep_interval() -> u64 {
    60
}

impl TurnstileConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from an optional YAML file layered with
    /// `TURNSTILE__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TurnstileConfig::default();
        assert_eq!(config.server.grpc_addr, "127.0.0.1:8081".parse().unwrap());
        assert_eq!(config.server.sweep_interval_secs, 60);
        assert_eq!(config.clock, ClockKind::Monotonic);
        assert_eq!(config.policies.len(), 2);
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = TurnstileConfig::from_yaml("{}").unwrap();
        assert_eq!(config.server.sweep_interval_secs, 60);
        assert!(config.policies.contains_key("sliding_window"));
        assert!(config.policies.contains_key("throttle"));
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
server:
  grpc_addr: 0.0.0.0:9000
  sweep_interval_secs: 0
clock: wall
policies:
  login:
    type: sliding_window
    window_secs: 60
    max_requests: 5
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.server.grpc_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.server.sweep_interval_secs, 0);
        assert_eq!(config.clock, ClockKind::Wall);
        assert_eq!(config.policies.len(), 1);
        assert_eq!(
            config.policies["login"],
            PolicyConfig::SlidingWindow {
                window_secs: 60.0,
                max_requests: 5
            }
        );
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let result = TurnstileConfig::from_yaml("server: [not, a, map]");
        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }

    #[test]
    fn test_load_file_with_env_override() {
        let path = std::env::temp_dir().join(format!(
            "turnstile-config-{}.yaml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            r#"
server:
  sweep_interval_secs: 30
policies:
  uploads:
    type: interval_throttle
    min_interval_secs: 5
"#,
        )
        .unwrap();

        std::env::set_var("TURNSTILE__SERVER__GRPC_ADDR", "127.0.0.1:9191");
        let config = TurnstileConfig::load(Some(&path));
        std::env::remove_var("TURNSTILE__SERVER__GRPC_ADDR");
        std::fs::remove_file(&path).unwrap();

        let config = config.unwrap();
        assert_eq!(config.server.grpc_addr, "127.0.0.1:9191".parse().unwrap());
        assert_eq!(config.server.sweep_interval_secs, 30);
        assert_eq!(
            config.policies["uploads"],
            PolicyConfig::IntervalThrottle {
                min_interval_secs: 5.0
            }
        );
    }

    #[test]
    fn test_load_missing_file_fails() {
        let path = Path::new("/nonexistent/turnstile.yaml");
        assert!(matches!(
            TurnstileConfig::load(Some(path)),
            Err(TurnstileError::Config(_))
        ));
    }
}
