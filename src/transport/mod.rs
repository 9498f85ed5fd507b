//! Transport subsystem: how the controller reaches the remote service.
//!
//! # Data Flow
//! ```text
//! Controller
//!     → ServiceBinder::bind(BindingSink)        (platform starts connecting)
//!     ← BindingSink::connected(remote)           (any thread, later)
//!     ← BindingSink::disconnected()/binding_died()
//!     → RemoteService::link_to_death(DeathRecipient)
//!     ← DeathRecipient::binder_died()            (remote process crashed)
//! ```
//!
//! # Design Decisions
//! - Sinks and recipients hold a weak reference to the controller; a dropped
//!   controller silently ignores late callbacks
//! - Every callback is tagged with its bind attempt or handle identity
//! - `loopback` provides an in-process service for tests and demos

pub mod loopback;
pub mod remote;

use std::sync::{Arc, Weak};

use crate::link::handle::{BindAttempt, HandleId};

pub use remote::{
    ExportResult, ParamValue, RemoteService, SessionResult, SignResult, TransportError,
    PARAM_BIOMETRIC_TYPE, PARAM_SENSOR_POSITION, STATUS_OK,
};

/// Receiver of transport notifications, implemented by the controller.
pub(crate) trait ConnectionCallbacks: Send + Sync {
    fn service_connected(&self, attempt: BindAttempt, remote: Arc<dyn RemoteService>);
    fn service_disconnected(&self, attempt: BindAttempt);
    fn binding_died(&self, attempt: BindAttempt);
    fn binder_died(&self, handle: HandleId);
}

/// Platform facility that establishes bindings to the remote service.
pub trait ServiceBinder: Send + Sync {
    /// Start connecting. Completion is reported later through `sink`, possibly
    /// on another thread. An `Err` means the platform refused to even start.
    fn bind(&self, sink: BindingSink) -> Result<(), TransportError>;

    /// Drop the binding started with the given attempt.
    fn unbind(&self, attempt: BindAttempt);
}

/// Per-bind callback handle given to a [`ServiceBinder`].
#[derive(Clone)]
pub struct BindingSink {
    attempt: BindAttempt,
    callbacks: Weak<dyn ConnectionCallbacks>,
}

impl BindingSink {
    pub(crate) fn new(attempt: BindAttempt, callbacks: Weak<dyn ConnectionCallbacks>) -> Self {
        Self { attempt, callbacks }
    }

    pub fn attempt(&self) -> BindAttempt {
        self.attempt
    }

    /// The remote endpoint accepted the binding.
    pub fn connected(&self, remote: Arc<dyn RemoteService>) {
        if let Some(callbacks) = self.callbacks.upgrade() {
            callbacks.service_connected(self.attempt, remote);
        }
    }

    /// Orderly disconnect of an established binding.
    pub fn disconnected(&self) {
        if let Some(callbacks) = self.callbacks.upgrade() {
            callbacks.service_disconnected(self.attempt);
        }
    }

    /// The binding can no longer deliver a connection.
    pub fn binding_died(&self) {
        if let Some(callbacks) = self.callbacks.upgrade() {
            callbacks.binding_died(self.attempt);
        }
    }
}

impl std::fmt::Debug for BindingSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingSink")
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// Death watch registered on one remote handle.
#[derive(Clone)]
pub struct DeathRecipient {
    handle: HandleId,
    callbacks: Weak<dyn ConnectionCallbacks>,
}

impl DeathRecipient {
    pub(crate) fn new(handle: HandleId, callbacks: Weak<dyn ConnectionCallbacks>) -> Self {
        Self { handle, callbacks }
    }

    pub fn handle(&self) -> HandleId {
        self.handle
    }

    /// The remote process terminated abnormally.
    pub fn binder_died(&self) {
        if let Some(callbacks) = self.callbacks.upgrade() {
            callbacks.binder_died(self.handle);
        }
    }
}

impl std::fmt::Debug for DeathRecipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeathRecipient")
            .field("handle", &self.handle)
            .finish()
    }
}
