//! Metrics collection and exposition.
//!
//! # Metrics
//! - `hwkey_link_bind_attempts_total` (counter): binds started, by cause
//! - `hwkey_link_events_total` (counter): connection events, by event
//! - `hwkey_link_connected` (gauge): 1=connected, 0=not
//! - `hwkey_link_no_response_count` (gauge): current health-check counter
//! - `hwkey_key_operations_total` (counter): key calls, by operation and outcome
//! - `hwkey_key_operation_duration_seconds` (histogram): key call latency
//!
//! Recording without an installed recorder is a no-op, so library users that
//! never call `init_metrics` pay nothing.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::link::ConnectionEvent;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics recorder"),
    }
}

/// Why a bind was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindCause {
    /// A caller needed the link.
    Demand,
    /// Scheduled rebind after a loss.
    Rebind,
    /// The no-response health check fired.
    HealthCheck,
    /// Explicit reconnect trigger.
    Trigger,
}

impl BindCause {
    fn as_str(&self) -> &'static str {
        match self {
            BindCause::Demand => "demand",
            BindCause::Rebind => "rebind",
            BindCause::HealthCheck => "health_check",
            BindCause::Trigger => "trigger",
        }
    }
}

pub fn record_bind_attempt(cause: BindCause) {
    counter!("hwkey_link_bind_attempts_total", "cause" => cause.as_str()).increment(1);
}

pub fn record_connection_event(event: ConnectionEvent) {
    counter!("hwkey_link_events_total", "event" => event.as_str()).increment(1);
    match event {
        ConnectionEvent::Connected => gauge!("hwkey_link_connected").set(1.0),
        ConnectionEvent::Disconnected | ConnectionEvent::BinderDied => {
            gauge!("hwkey_link_connected").set(0.0)
        }
        _ => {}
    }
}

pub fn record_no_response_count(count: u32) {
    gauge!("hwkey_link_no_response_count").set(f64::from(count));
}

pub fn record_key_operation(operation: &'static str, outcome: &'static str, start: Instant) {
    counter!(
        "hwkey_key_operations_total",
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
    histogram!("hwkey_key_operation_duration_seconds", "operation" => operation)
        .record(start.elapsed().as_secs_f64());
}
