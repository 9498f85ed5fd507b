//! Configuration validation.
//!
//! Serde handles syntax; this checks value ranges and cross-field
//! consistency. Every problem is reported, not just the first.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::LinkConfig;
use crate::resilience::FibonacciBackoff;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("connection.connect_timeout_ms must be greater than zero")]
    ZeroConnectTimeout,

    #[error("connection.backoff_ceiling_secs must be greater than zero")]
    ZeroCeiling,

    #[error("connection.{counter} baseline delay {delay_secs}s exceeds the {ceiling_secs}s ceiling")]
    BaselineAboveCeiling {
        counter: &'static str,
        delay_secs: u64,
        ceiling_secs: u64,
    },

    #[error("observability.log_format must be \"pretty\" or \"json\", got {0:?}")]
    UnknownLogFormat(String),

    #[error("observability.metrics_address {0:?} is not a socket address")]
    InvalidMetricsAddress(String),
}

/// Validate `config`, returning every error found.
pub fn validate_config(config: &LinkConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let conn = &config.connection;

    if conn.connect_timeout_ms == 0 {
        errors.push(ValidationError::ZeroConnectTimeout);
    }

    if conn.backoff_ceiling_secs == 0 {
        errors.push(ValidationError::ZeroCeiling);
    } else {
        for (counter, baseline) in [
            ("no_response_baseline", conn.no_response_baseline),
            ("disconnect_baseline", conn.disconnect_baseline),
        ] {
            let policy = FibonacciBackoff::new(baseline, conn.backoff_ceiling_secs);
            if policy.exceeds_ceiling(baseline) {
                errors.push(ValidationError::BaselineAboveCeiling {
                    counter,
                    delay_secs: policy.delay_secs(baseline),
                    ceiling_secs: conn.backoff_ceiling_secs,
                });
            }
        }
    }

    let obs = &config.observability;
    if obs.log_format != "pretty" && obs.log_format != "json" {
        errors.push(ValidationError::UnknownLogFormat(obs.log_format.clone()));
    }
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidMetricsAddress(
            obs.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(validate_config(&LinkConfig::default()).is_ok());
    }

    #[test]
    fn test_reports_all_errors() {
        let mut config = LinkConfig::default();
        config.connection.connect_timeout_ms = 0;
        config.observability.log_format = "xml".into();
        config.observability.metrics_enabled = true;
        config.observability.metrics_address = "nowhere".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ValidationError::ZeroConnectTimeout));
        assert!(errors.contains(&ValidationError::UnknownLogFormat("xml".into())));
    }

    #[test]
    fn test_baseline_above_ceiling() {
        let mut config = LinkConfig::default();
        config.connection.backoff_ceiling_secs = 1;

        // F(3) = 2s > 1s; F(0) = 0s is fine.
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::BaselineAboveCeiling {
                counter: "no_response_baseline",
                delay_secs: 2,
                ceiling_secs: 1,
            }]
        );
    }

    #[test]
    fn test_metrics_address_ignored_when_disabled() {
        let mut config = LinkConfig::default();
        config.observability.metrics_address = "nowhere".into();
        assert!(validate_config(&config).is_ok());
    }
}
