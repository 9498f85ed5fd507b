//! Device parameters about the biometric hardware.
//!
//! # Data Flow
//! ```text
//! platform provider lookup ──ok──────────────→ DeviceParameters(provider)
//!                          └─err + policy ───→ DeviceParameters(ParameterStore)
//!                                                  ↑
//! keys::KeyClient::refresh_device_parameters ──────┘ (remote service values)
//! ```
//!
//! # Design Decisions
//! - Whether a failed lookup falls back to the in-memory store is a
//!   configured [`FallbackPolicy`](crate::config::FallbackPolicy)
//! - Values are typed ([`ParamValue`](crate::transport::ParamValue)); a value
//!   of the wrong shape reads as unset

pub mod device;
pub mod store;

pub use device::{DeviceParameters, BIOMETRIC_TYPE_UNDEFINED};
pub use store::{ParameterProvider, ParameterStore, ProviderLookupError};
