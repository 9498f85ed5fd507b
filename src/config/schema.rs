//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the key service link.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct LinkConfig {
    /// Identity the remote service scopes keys to.
    pub service: ServiceConfig,

    /// Connection timing and backoff.
    pub connection: ConnectionConfig,

    /// Device parameter lookup.
    pub parameters: ParametersConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Remote service identity.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Application identity passed with every key call.
    pub uid: i32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { uid: 10_001 }
    }
}

/// Connection timing and backoff configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// How long `ensure_connected` waits for a bind, in milliseconds.
    pub connect_timeout_ms: u64,

    /// Delay in seconds above which retry counters reset to baseline.
    pub backoff_ceiling_secs: u64,

    /// Starting value of the no-response counter (F(3) = 2s first check).
    pub no_response_baseline: u32,

    /// Starting value of the disconnect counter.
    pub disconnect_baseline: u32,
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3_000,
            backoff_ceiling_secs: 30,
            no_response_baseline: 3,
            disconnect_baseline: 0,
        }
    }
}

/// When to fall back to the in-memory parameter store.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Only when no platform provider exists.
    #[default]
    NotFoundOnly,
    /// On every provider lookup failure.
    AnyFailure,
}

/// Device parameter configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ParametersConfig {
    pub fallback_policy: FallbackPolicy,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format ("pretty" or "json").
    pub log_format: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9464".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: LinkConfig = toml::from_str("").unwrap();
        assert_eq!(config, LinkConfig::default());
        assert_eq!(config.connection.connect_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_partial_sections() {
        let config: LinkConfig = toml::from_str(
            r#"
            [service]
            uid = 42

            [connection]
            backoff_ceiling_secs = 60

            [parameters]
            fallback_policy = "any_failure"
            "#,
        )
        .unwrap();

        assert_eq!(config.service.uid, 42);
        assert_eq!(config.connection.backoff_ceiling_secs, 60);
        assert_eq!(config.connection.no_response_baseline, 3);
        assert_eq!(config.parameters.fallback_policy, FallbackPolicy::AnyFailure);
    }
}
