//! Wiring of the link, the key facade and device parameters.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::LinkConfig;
use crate::keys::{KeyClient, PlatformGate};
use crate::link::{LifecycleController, LinkError};
use crate::params::{DeviceParameters, ParameterProvider, ProviderLookupError};
use crate::transport::ServiceBinder;

/// Everything a host process needs to use hardware keys.
#[derive(Debug, Clone)]
pub struct LinkStack {
    pub controller: LifecycleController,
    pub client: KeyClient,
    pub params: DeviceParameters,
}

/// Build the link stack from configuration.
///
/// Must run inside a Tokio runtime. When device parameters fall back to the
/// in-memory store, a background task fills it from the service once the
/// link first comes up.
pub fn start_link(
    config: &LinkConfig,
    binder: Arc<dyn ServiceBinder>,
    platform: Arc<dyn PlatformGate>,
    provider: Result<Arc<dyn ParameterProvider>, ProviderLookupError>,
) -> Result<LinkStack, LinkError> {
    let controller = LifecycleController::new(binder, config.connection.clone())?;
    let client = KeyClient::new(controller.clone(), platform, config.service.uid);
    let params = DeviceParameters::resolve(
        provider,
        config.parameters.fallback_policy,
        client.parameter_store(),
    );

    if params.uses_fallback() {
        let client = client.clone();
        tokio::spawn(async move {
            if client.controller().ensure_connected().await {
                finish_refresh(client.refresh_device_parameters()).await;
            } else {
                tracing::warn!("Key service unavailable, device parameters left unset");
            }
        });
    }

    tracing::info!(
        uid = config.service.uid,
        fallback_params = params.uses_fallback(),
        "Key service link initialized"
    );
    Ok(LinkStack {
        controller,
        client,
        params,
    })
}

/// Wait for a parameter refresh task. Returns false when it did not run to
/// completion.
pub(crate) async fn finish_refresh(task: JoinHandle<()>) -> bool {
    match task.await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Device parameter refresh aborted");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_finish_refresh_reports_panicked_task() {
        let task = tokio::spawn(async { panic!("refresh failed") });
        assert!(!finish_refresh(task).await);
    }

    #[tokio::test]
    async fn test_finish_refresh_completed_task() {
        let task = tokio::spawn(async {});
        assert!(finish_refresh(task).await);
    }
}
