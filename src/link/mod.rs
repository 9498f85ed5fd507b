//! Link subsystem: the connection to the remote key service.
//!
//! # Data Flow
//! ```text
//! Caller (keys::KeyClient)
//!     → controller.rs ensure_connected()
//!         → bridge.rs arm()                 (join or arm the latch)
//!         → ServiceBinder::bind()           (if nothing usable/in flight)
//!         → bridge.rs wait(deadline)
//!     ← state.rs is_connected()             (authoritative answer)
//!
//! Transport callbacks (any thread)
//!     → controller.rs                        (compare-and-discard on identity)
//!     → state.rs transition
//!     → resilience::backoff (rebind / health-check delay)
//!     → events.rs listener
//! ```
//!
//! # Design Decisions
//! - One controller instance owns all mutable link state; no statics
//! - Handles and bind attempts carry identities; stale callbacks are no-ops
//! - `release` is the only cancellation path and it is cooperative

pub mod bridge;
pub mod controller;
pub mod events;
pub mod handle;
pub mod state;

pub use bridge::{BridgeOutcome, BridgeWaiter, SyncBridge};
pub use controller::{CallError, LifecycleController, LinkError};
pub use events::{ConnectionEvent, ConnectionListener};
pub use handle::{BindAttempt, HandleId};
pub use state::{ConnectionState, LossKind, RetryCounters};
