//! Request facade over the remote key service.
//!
//! # Responsibilities
//! - Reject operations the platform cannot run before any remote traffic
//! - Make sure the link is up, then call through the controller
//! - Fold transport faults and remote statuses into [`KeyError`]
//! - Decode exported key material
//!
//! # Data Flow
//! ```text
//! KeyClient::op()
//!     → PlatformGate::check()               (precondition)
//!     → LifecycleController::ensure_connected()
//!     → LifecycleController::call(remote op) (blocking pool)
//!     → status check / KeyCodec::decode
//!     ← KeyResult<T>
//! ```

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::keys::codec::{ExportedKeyCodec, KeyCodec, KeyDescriptor};
use crate::keys::error::{KeyError, KeyResult, Operation};
use crate::keys::platform::PlatformGate;
use crate::link::{CallError, LifecycleController};
use crate::observability::metrics;
use crate::params::ParameterStore;
use crate::transport::{
    ExportResult, ParamValue, RemoteService, TransportError, PARAM_BIOMETRIC_TYPE,
    PARAM_SENSOR_POSITION, STATUS_OK,
};

/// Handle to an open signing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignSession {
    pub id: i64,
}

/// Key-management operations for one application identity.
#[derive(Clone)]
pub struct KeyClient {
    controller: LifecycleController,
    platform: Arc<dyn PlatformGate>,
    codec: Arc<dyn KeyCodec>,
    params: Arc<ParameterStore>,
    uid: i32,
}

impl KeyClient {
    pub fn new(controller: LifecycleController, platform: Arc<dyn PlatformGate>, uid: i32) -> Self {
        Self {
            controller,
            platform,
            codec: Arc::new(ExportedKeyCodec),
            params: Arc::new(ParameterStore::new()),
            uid,
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn KeyCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Store that `refresh_device_parameters` writes into.
    pub fn with_parameter_store(mut self, params: Arc<ParameterStore>) -> Self {
        self.params = params;
        self
    }

    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }

    pub fn parameter_store(&self) -> Arc<ParameterStore> {
        Arc::clone(&self.params)
    }

    pub fn uid(&self) -> i32 {
        self.uid
    }

    pub async fn generate_master_key(&self) -> KeyResult<()> {
        let op = Operation::GenerateMasterKey;
        let uid = self.uid;
        let status = self.invoke(op, move |s| s.generate_master_key(uid)).await?;
        check_status(op, status)
    }

    /// Remove the master key and, with it, every per-purpose key.
    pub async fn remove_master_key(&self) -> KeyResult<()> {
        let op = Operation::RemoveMasterKey;
        let uid = self.uid;
        let status = self.invoke(op, move |s| s.remove_all_keys(uid)).await?;
        check_status(op, status)
    }

    pub async fn has_master_key(&self) -> KeyResult<bool> {
        let uid = self.uid;
        self.invoke(Operation::QueryMasterKey, move |s| s.has_master_key(uid))
            .await
    }

    /// Exported master key, or `None` when the service returned no material.
    pub async fn master_key(&self) -> KeyResult<Option<KeyDescriptor>> {
        let op = Operation::QueryMasterKey;
        let uid = self.uid;
        let exported = self.invoke(op, move |s| s.export_master_key(uid)).await?;
        self.decode_export(op, exported)
    }

    /// True when the master key exists and its export decodes.
    pub async fn is_master_key_valid(&self) -> KeyResult<bool> {
        if !self.has_master_key().await? {
            return Ok(false);
        }
        decodable(self.master_key().await)
    }

    pub async fn generate_auth_key(&self, name: &str) -> KeyResult<()> {
        let op = Operation::GenerateAuthKey;
        let (uid, name) = (self.uid, name.to_string());
        let status = self
            .invoke(op, move |s| s.generate_auth_key(uid, &name))
            .await?;
        check_status(op, status)
    }

    /// Remove a per-purpose key, then optionally the master key as well.
    ///
    /// A failed cascade reports the master-key removal failure, so callers
    /// can tell which half failed.
    pub async fn remove_auth_key(&self, name: &str, cascade_master: bool) -> KeyResult<()> {
        let op = Operation::RemoveAuthKey;
        let (uid, key) = (self.uid, name.to_string());
        let status = self
            .invoke(op, move |s| s.remove_auth_key(uid, &key))
            .await?;
        check_status(op, status)?;

        if cascade_master {
            tracing::debug!(name, "Cascading removal to master key");
            self.remove_master_key().await?;
        }
        Ok(())
    }

    pub async fn has_auth_key(&self, name: &str) -> KeyResult<bool> {
        let (uid, name) = (self.uid, name.to_string());
        self.invoke(Operation::QueryAuthKey, move |s| s.has_auth_key(uid, &name))
            .await
    }

    pub async fn auth_key(&self, name: &str) -> KeyResult<Option<KeyDescriptor>> {
        let op = Operation::QueryAuthKey;
        let (uid, name) = (self.uid, name.to_string());
        let exported = self
            .invoke(op, move |s| s.export_auth_key(uid, &name))
            .await?;
        self.decode_export(op, exported)
    }

    /// True when the key exists and its export decodes. An existing key that
    /// does not decode is removed when `remove_if_invalid` is set.
    pub async fn is_auth_key_valid(&self, name: &str, remove_if_invalid: bool) -> KeyResult<bool> {
        if !self.has_auth_key(name).await? {
            return Ok(false);
        }
        let valid = decodable(self.auth_key(name).await)?;
        if !valid && remove_if_invalid {
            tracing::info!(name, "Removing per-purpose key that failed to decode");
            if let Err(e) = self.remove_auth_key(name, false).await {
                tracing::warn!(name, error = %e, "Failed to remove invalid per-purpose key");
            }
        }
        Ok(valid)
    }

    /// Open a signing session over `challenge` with the named key.
    pub async fn init_sign(&self, name: &str, challenge: &str) -> KeyResult<SignSession> {
        let op = Operation::InitSign;
        let (uid, name, challenge) = (self.uid, name.to_string(), challenge.to_string());
        let result = self
            .invoke(op, move |s| s.init_sign(uid, &name, &challenge))
            .await?;
        check_status(op, result.status)?;
        Ok(SignSession { id: result.session })
    }

    /// Complete a signing session and return the signature payload.
    pub async fn finish_sign(&self, session: SignSession) -> KeyResult<Vec<u8>> {
        let op = Operation::FinishSign;
        let result = self
            .invoke(op, move |s| s.finish_sign(session.id))
            .await?;
        check_status(op, result.status)?;
        Ok(result.payload)
    }

    pub async fn service_version(&self) -> KeyResult<i32> {
        self.invoke(Operation::QueryVersion, |s| s.version()).await
    }

    /// Copy the biometric parameters from the service into the parameter
    /// store in the background. Does nothing unless the link is up.
    pub fn refresh_device_parameters(&self) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            if !client.controller.is_connected() {
                tracing::warn!("Key service not connected, skipping parameter refresh");
                return;
            }
            let fetched = client
                .controller
                .call(|s| {
                    Ok((
                        s.extra_param(PARAM_BIOMETRIC_TYPE)?,
                        s.extra_param(PARAM_SENSOR_POSITION)?,
                    ))
                })
                .await;

            match fetched {
                Ok((biometric_type, position)) => {
                    if let Some(value @ ParamValue::Int(_)) = biometric_type {
                        client.params.set(PARAM_BIOMETRIC_TYPE, value);
                    }
                    if let Some(value @ ParamValue::IntList(_)) = position {
                        client.params.set(PARAM_SENSOR_POSITION, value);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Device parameter refresh failed"),
            }
        })
    }

    async fn invoke<T, F>(&self, op: Operation, f: F) -> KeyResult<T>
    where
        F: FnOnce(&dyn RemoteService) -> Result<T, TransportError> + Send + 'static,
        T: Send + 'static,
    {
        let start = Instant::now();
        let result = self.dispatch(op, f).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::record_key_operation(op.as_str(), outcome, start);
        result
    }

    async fn dispatch<T, F>(&self, op: Operation, f: F) -> KeyResult<T>
    where
        F: FnOnce(&dyn RemoteService) -> Result<T, TransportError> + Send + 'static,
        T: Send + 'static,
    {
        if let Err(source) = self.platform.check() {
            tracing::warn!(op = %op, error = %source, "Key operation rejected");
            return Err(KeyError::Precondition { op, source });
        }

        if !self.controller.ensure_connected().await {
            tracing::warn!(op = %op, "Key service not found");
            self.controller.report_service_unavailable();
            return Err(KeyError::ServiceUnreachable { op });
        }

        match self.controller.call(f).await {
            Ok(value) => Ok(value),
            Err(CallError::Unavailable) => {
                tracing::warn!(op = %op, "Key service lost before call");
                self.controller.report_service_unavailable();
                Err(KeyError::ServiceUnreachable { op })
            }
            Err(CallError::Transport(source)) => {
                tracing::warn!(op = %op, error = %source, "Key operation failed in transport");
                Err(KeyError::Transport { op, source })
            }
        }
    }

    fn decode_export(
        &self,
        op: Operation,
        exported: ExportResult,
    ) -> KeyResult<Option<KeyDescriptor>> {
        check_status(op, exported.status)?;
        if exported.payload.is_empty() {
            tracing::warn!(op = %op, "Key material could not be retrieved");
            return Ok(None);
        }
        self.codec
            .decode(&exported.payload)
            .map(Some)
            .map_err(|source| KeyError::Decode { op, source })
    }
}

impl std::fmt::Debug for KeyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyClient")
            .field("uid", &self.uid)
            .field("controller", &self.controller)
            .finish()
    }
}

fn check_status(op: Operation, status: i32) -> KeyResult<()> {
    if status == STATUS_OK {
        Ok(())
    } else {
        Err(KeyError::Remote { op, status })
    }
}

/// Whether an export yielded usable material; decode failures count as no.
fn decodable(exported: KeyResult<Option<KeyDescriptor>>) -> KeyResult<bool> {
    match exported {
        Ok(descriptor) => Ok(descriptor.is_some()),
        Err(KeyError::Decode { op, source }) => {
            tracing::warn!(op = %op, error = %source, "Stored key does not decode");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
