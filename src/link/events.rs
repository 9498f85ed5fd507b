//! Connection life-cycle notifications.
//!
//! Purely observational: nothing in the controller or the key facade depends
//! on a listener being present.

use serde::Serialize;

/// Event emitted by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionEvent {
    StartedConnecting,
    Connected,
    Disconnected,
    BinderDied,
    /// A key operation found no usable service.
    ServiceUnavailable,
}

impl ConnectionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionEvent::StartedConnecting => "started_connecting",
            ConnectionEvent::Connected => "connected",
            ConnectionEvent::Disconnected => "disconnected",
            ConnectionEvent::BinderDied => "binder_died",
            ConnectionEvent::ServiceUnavailable => "service_unavailable",
        }
    }
}

impl std::fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observer of connection events. At most one is registered per controller.
///
/// Called outside the controller's lock, possibly from a transport thread.
pub trait ConnectionListener: Send + Sync {
    fn on_event(&self, event: ConnectionEvent);
}

impl<F> ConnectionListener for F
where
    F: Fn(ConnectionEvent) + Send + Sync,
{
    fn on_event(&self, event: ConnectionEvent) {
        self(event)
    }
}
