//! Key subsystem: the caller-facing key-management operations.
//!
//! # Design Decisions
//! - Every operation shares one shape: precondition, ensure connected,
//!   controller-mediated call, status/payload mapping
//! - The remote handle never reaches this layer; calls go through
//!   [`LifecycleController::call`](crate::link::LifecycleController::call)
//! - Callers see [`ResultCode`] values, never transport faults

pub mod client;
pub mod codec;
pub mod error;
pub mod platform;

pub use client::{KeyClient, SignSession};
pub use codec::{CodecError, ExportedKeyCodec, KeyCodec, KeyDescriptor};
pub use error::{KeyError, KeyResult, Operation, ResultCode};
pub use platform::{PlatformGate, PreconditionError, StaticPlatform};
