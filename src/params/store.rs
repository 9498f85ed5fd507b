//! Parameter providers and the in-memory fallback store.

use dashmap::DashMap;
use thiserror::Error;

use crate::transport::ParamValue;

/// Source of device parameters.
pub trait ParameterProvider: Send + Sync {
    /// Value stored under `key`, or `default` when unset.
    fn get(&self, key: &str, default: Option<ParamValue>) -> Option<ParamValue>;
}

/// Failure to locate the platform's parameter provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderLookupError {
    #[error("no parameter provider installed: {0}")]
    NotFound(String),

    #[error("parameter provider failed to initialize: {0}")]
    Failed(String),
}

/// Concurrent in-memory provider, filled from the remote service.
#[derive(Debug, Default)]
pub struct ParameterStore {
    values: DashMap<String, ParamValue>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, value: ParamValue) {
        tracing::debug!(key, value = ?value, "Device parameter updated");
        self.values.insert(key.to_string(), value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl ParameterProvider for ParameterStore {
    fn get(&self, key: &str, default: Option<ParamValue>) -> Option<ParamValue> {
        self.values.get(key).map(|v| v.value().clone()).or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_returns_default() {
        let store = ParameterStore::new();
        assert_eq!(store.get("missing", None), None);
        assert_eq!(
            store.get("missing", Some(ParamValue::Int(-1))),
            Some(ParamValue::Int(-1))
        );
    }

    #[test]
    fn test_set_overrides_default() {
        let store = ParameterStore::new();
        store.set("k", ParamValue::IntList(vec![1, 2]));
        assert_eq!(
            store.get("k", Some(ParamValue::Int(0))),
            Some(ParamValue::IntList(vec![1, 2]))
        );
        assert_eq!(store.len(), 1);
    }
}
