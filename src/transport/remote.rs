//! Remote key service interface.
//!
//! The service lives in another process. Every method is a blocking IPC call
//! that either returns the service's answer or fails with a [`TransportError`]
//! when the process cannot be reached.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::DeathRecipient;

/// Status code the remote service returns on success.
pub const STATUS_OK: i32 = 0;

/// Parameter key for the biometric sensor type.
pub const PARAM_BIOMETRIC_TYPE: &str = "fingerprint_type";

/// Parameter key for the biometric sensor hardware position.
pub const PARAM_SENSOR_POSITION: &str = "fingerprint_hardware_position";

/// Transport-level failure of a remote call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The remote process is gone.
    #[error("remote endpoint is dead")]
    DeadObject,

    /// The call could not be delivered or its reply was lost.
    #[error("remote call failed: {0}")]
    Failed(String),

    /// The platform refused to start a binding.
    #[error("bind refused: {0}")]
    BindRefused(String),
}

/// Exported key material.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportResult {
    pub status: i32,
    pub payload: Vec<u8>,
}

/// Result of opening a signing session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResult {
    pub session: i64,
    pub status: i32,
}

/// Result of finishing a signing session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignResult {
    pub status: i32,
    pub payload: Vec<u8>,
}

/// Value of a device parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i32),
    IntList(Vec<i32>),
}

/// Handle to the remote key service.
///
/// Implementations are shared across threads; the controller hands out clones
/// of the handle only for the duration of a single call.
pub trait RemoteService: Send + Sync {
    /// Whether the remote process still exists.
    fn is_alive(&self) -> bool;

    /// Round-trip liveness probe.
    fn ping(&self) -> bool;

    /// Register `recipient` to be told when the remote process dies.
    fn link_to_death(&self, recipient: DeathRecipient) -> Result<(), TransportError>;

    /// Remove a registration made by [`RemoteService::link_to_death`].
    fn unlink_to_death(&self, recipient: &DeathRecipient);

    fn generate_master_key(&self, uid: i32) -> Result<i32, TransportError>;

    /// Removes the master key and every per-purpose key under it.
    fn remove_all_keys(&self, uid: i32) -> Result<i32, TransportError>;

    fn has_master_key(&self, uid: i32) -> Result<bool, TransportError>;

    fn export_master_key(&self, uid: i32) -> Result<ExportResult, TransportError>;

    fn generate_auth_key(&self, uid: i32, name: &str) -> Result<i32, TransportError>;

    fn remove_auth_key(&self, uid: i32, name: &str) -> Result<i32, TransportError>;

    fn has_auth_key(&self, uid: i32, name: &str) -> Result<bool, TransportError>;

    fn export_auth_key(&self, uid: i32, name: &str) -> Result<ExportResult, TransportError>;

    fn init_sign(
        &self,
        uid: i32,
        name: &str,
        challenge: &str,
    ) -> Result<SessionResult, TransportError>;

    fn finish_sign(&self, session: i64) -> Result<SignResult, TransportError>;

    fn version(&self) -> Result<i32, TransportError>;

    fn extra_param(&self, key: &str) -> Result<Option<ParamValue>, TransportError>;
}
