//! Client-side link to an out-of-process hardware key service.
//!
//! A [`LifecycleController`] owns the connection: it binds on demand, watches
//! the remote process for death, and rebinds on a Fibonacci backoff. The
//! [`KeyClient`] facade runs key-management operations through it and
//! reports every outcome as a stable [`ResultCode`].

pub mod config;
pub mod keys;
pub mod lifecycle;
pub mod link;
pub mod observability;
pub mod params;
pub mod resilience;
pub mod transport;

pub use config::LinkConfig;
pub use keys::{KeyClient, KeyError, ResultCode};
pub use lifecycle::Shutdown;
pub use link::{ConnectionEvent, ConnectionState, LifecycleController};
