//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Link loss or silent bind:
//!     → backoff.rs (counter → delay, reset past ceiling)
//!     → link::controller schedules the rebind / health check
//! ```
//!
//! # Design Decisions
//! - Fibonacci ramp: smoother than exponential, faster than linear
//! - Pure functions, no clock access, so schedules are testable in isolation
//! - A reset ceiling instead of a max delay: long outages keep re-probing

pub mod backoff;

pub use backoff::{fib_delay, FibonacciBackoff};
