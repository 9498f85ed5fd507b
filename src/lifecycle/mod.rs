//! Lifecycle management for processes that host the key service link.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     LinkConfig → LifecycleController → KeyClient → DeviceParameters
//!
//! Shutdown (shutdown.rs):
//!     trigger → background loops stop → controller released
//!
//! Signals (signals.rs):
//!     Ctrl-C / SIGTERM → Shutdown::trigger
//! ```
//!
//! # Design Decisions
//! - The controller is created inside the runtime that will run its timers
//! - Release happens once, after every subscriber has been told to stop

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{start_link, LinkStack};
