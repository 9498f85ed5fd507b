//! Typed access to biometric hardware parameters.

use std::sync::Arc;

use crate::config::FallbackPolicy;
use crate::params::store::{ParameterProvider, ParameterStore, ProviderLookupError};
use crate::transport::{ParamValue, PARAM_BIOMETRIC_TYPE, PARAM_SENSOR_POSITION};

/// Biometric type reported when nothing is known.
pub const BIOMETRIC_TYPE_UNDEFINED: i32 = -1;

/// Device parameters backed by whichever provider resolution produced.
#[derive(Clone)]
pub struct DeviceParameters {
    provider: Option<Arc<dyn ParameterProvider>>,
    fallback: bool,
}

impl DeviceParameters {
    /// Pick the provider for this process.
    ///
    /// A successful platform lookup wins. Otherwise `policy` decides whether
    /// the in-memory `store` stands in; when it does not, every read returns
    /// its default.
    pub fn resolve(
        lookup: Result<Arc<dyn ParameterProvider>, ProviderLookupError>,
        policy: FallbackPolicy,
        store: Arc<ParameterStore>,
    ) -> Self {
        match lookup {
            Ok(provider) => Self {
                provider: Some(provider),
                fallback: false,
            },
            Err(e) => {
                let falls_back = match (&e, policy) {
                    (_, FallbackPolicy::AnyFailure) => true,
                    (ProviderLookupError::NotFound(_), FallbackPolicy::NotFoundOnly) => true,
                    (ProviderLookupError::Failed(_), FallbackPolicy::NotFoundOnly) => false,
                };
                if falls_back {
                    tracing::info!(error = %e, "Using in-memory device parameters");
                    Self {
                        provider: Some(store),
                        fallback: true,
                    }
                } else {
                    tracing::warn!(error = %e, "No device parameter provider");
                    Self {
                        provider: None,
                        fallback: false,
                    }
                }
            }
        }
    }

    /// Whether reads go to the in-memory store, which needs refreshing from
    /// the remote service.
    pub fn uses_fallback(&self) -> bool {
        self.fallback
    }

    pub fn get(&self, key: &str, default: Option<ParamValue>) -> Option<ParamValue> {
        match &self.provider {
            Some(provider) => provider.get(key, default),
            None => None,
        }
    }

    /// Sensor type, or [`BIOMETRIC_TYPE_UNDEFINED`].
    pub fn biometric_type(&self) -> i32 {
        match self.get(
            PARAM_BIOMETRIC_TYPE,
            Some(ParamValue::Int(BIOMETRIC_TYPE_UNDEFINED)),
        ) {
            Some(ParamValue::Int(value)) => value,
            _ => BIOMETRIC_TYPE_UNDEFINED,
        }
    }

    /// Sensor position on the device, if known.
    pub fn sensor_position(&self) -> Option<Vec<i32>> {
        match self.get(PARAM_SENSOR_POSITION, None) {
            Some(ParamValue::IntList(position)) => Some(position),
            _ => None,
        }
    }
}

impl std::fmt::Debug for DeviceParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceParameters")
            .field("has_provider", &self.provider.is_some())
            .field("fallback", &self.fallback)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl ParameterProvider for Fixed {
        fn get(&self, key: &str, default: Option<ParamValue>) -> Option<ParamValue> {
            match key {
                PARAM_BIOMETRIC_TYPE => Some(ParamValue::Int(2)),
                _ => default,
            }
        }
    }

    fn store_with_type(value: i32) -> Arc<ParameterStore> {
        let store = Arc::new(ParameterStore::new());
        store.set(PARAM_BIOMETRIC_TYPE, ParamValue::Int(value));
        store
    }

    #[test]
    fn test_platform_provider_wins() {
        let params = DeviceParameters::resolve(
            Ok(Arc::new(Fixed)),
            FallbackPolicy::NotFoundOnly,
            store_with_type(9),
        );
        assert!(!params.uses_fallback());
        assert_eq!(params.biometric_type(), 2);
        assert_eq!(params.sensor_position(), None);
    }

    #[test]
    fn test_not_found_falls_back() {
        let params = DeviceParameters::resolve(
            Err(ProviderLookupError::NotFound("vendor".into())),
            FallbackPolicy::NotFoundOnly,
            store_with_type(9),
        );
        assert!(params.uses_fallback());
        assert_eq!(params.biometric_type(), 9);
    }

    #[test]
    fn test_other_failure_respects_policy() {
        let failed = || Err(ProviderLookupError::Failed("init".into()));

        let strict = DeviceParameters::resolve(
            failed(),
            FallbackPolicy::NotFoundOnly,
            store_with_type(9),
        );
        assert!(!strict.uses_fallback());
        assert_eq!(strict.biometric_type(), BIOMETRIC_TYPE_UNDEFINED);

        let lenient = DeviceParameters::resolve(
            failed(),
            FallbackPolicy::AnyFailure,
            store_with_type(9),
        );
        assert!(lenient.uses_fallback());
        assert_eq!(lenient.biometric_type(), 9);
    }

    #[test]
    fn test_wrong_shape_reads_as_unset() {
        let store = Arc::new(ParameterStore::new());
        store.set(PARAM_BIOMETRIC_TYPE, ParamValue::IntList(vec![1]));
        store.set(PARAM_SENSOR_POSITION, ParamValue::Int(3));

        let params = DeviceParameters::resolve(
            Err(ProviderLookupError::NotFound("vendor".into())),
            FallbackPolicy::NotFoundOnly,
            store,
        );
        assert_eq!(params.biometric_type(), BIOMETRIC_TYPE_UNDEFINED);
        assert_eq!(params.sensor_position(), None);
    }
}
