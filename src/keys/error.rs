//! Caller-visible outcomes of key operations.
//!
//! Nothing transport-specific crosses this boundary: every failure below the
//! facade is folded into a [`KeyError`], and every [`KeyError`] maps to one
//! stable [`ResultCode`].

use serde::Serialize;
use thiserror::Error;

use crate::keys::codec::CodecError;
use crate::keys::platform::PreconditionError;
use crate::transport::TransportError;

/// Closed set of outcomes reported to callers. Values are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum ResultCode {
    Ok = 0,
    MasterKeyGenFailed = 1,
    MasterKeyRemoveFailed = 2,
    MasterKeyQueryFailed = 3,
    AuthKeyGenFailed = 4,
    AuthKeyRemoveFailed = 5,
    AuthKeyQueryFailed = 6,
    SignInitFailed = 7,
    SignFinishFailed = 8,
    VersionQueryFailed = 9,
    ServiceUnreachable = 10,
}

impl ResultCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_ok(self) -> bool {
        self == ResultCode::Ok
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, self.as_i32())
    }
}

/// Remote operation a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GenerateMasterKey,
    RemoveMasterKey,
    QueryMasterKey,
    GenerateAuthKey,
    RemoveAuthKey,
    QueryAuthKey,
    InitSign,
    FinishSign,
    QueryVersion,
}

impl Operation {
    /// Generic failure code for this operation.
    pub fn failure_code(self) -> ResultCode {
        match self {
            Operation::GenerateMasterKey => ResultCode::MasterKeyGenFailed,
            Operation::RemoveMasterKey => ResultCode::MasterKeyRemoveFailed,
            Operation::QueryMasterKey => ResultCode::MasterKeyQueryFailed,
            Operation::GenerateAuthKey => ResultCode::AuthKeyGenFailed,
            Operation::RemoveAuthKey => ResultCode::AuthKeyRemoveFailed,
            Operation::QueryAuthKey => ResultCode::AuthKeyQueryFailed,
            Operation::InitSign => ResultCode::SignInitFailed,
            Operation::FinishSign => ResultCode::SignFinishFailed,
            Operation::QueryVersion => ResultCode::VersionQueryFailed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::GenerateMasterKey => "generate_master_key",
            Operation::RemoveMasterKey => "remove_master_key",
            Operation::QueryMasterKey => "query_master_key",
            Operation::GenerateAuthKey => "generate_auth_key",
            Operation::RemoveAuthKey => "remove_auth_key",
            Operation::QueryAuthKey => "query_auth_key",
            Operation::InitSign => "init_sign",
            Operation::FinishSign => "finish_sign",
            Operation::QueryVersion => "query_version",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a key operation.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("{op}: precondition failed: {source}")]
    Precondition {
        op: Operation,
        #[source]
        source: PreconditionError,
    },

    #[error("{op}: key service unreachable")]
    ServiceUnreachable { op: Operation },

    #[error("{op}: transport failure: {source}")]
    Transport {
        op: Operation,
        #[source]
        source: TransportError,
    },

    #[error("{op}: remote returned status {status}")]
    Remote { op: Operation, status: i32 },

    #[error("{op}: undecodable key payload: {source}")]
    Decode {
        op: Operation,
        #[source]
        source: CodecError,
    },
}

impl KeyError {
    /// The outcome callers see.
    pub fn code(&self) -> ResultCode {
        match self {
            KeyError::ServiceUnreachable { .. } => ResultCode::ServiceUnreachable,
            KeyError::Precondition { op, .. }
            | KeyError::Transport { op, .. }
            | KeyError::Remote { op, .. }
            | KeyError::Decode { op, .. } => op.failure_code(),
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            KeyError::Precondition { op, .. }
            | KeyError::ServiceUnreachable { op }
            | KeyError::Transport { op, .. }
            | KeyError::Remote { op, .. }
            | KeyError::Decode { op, .. } => *op,
        }
    }

    /// Short label for metrics.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            KeyError::Precondition { .. } => "precondition",
            KeyError::ServiceUnreachable { .. } => "unreachable",
            KeyError::Transport { .. } => "transport",
            KeyError::Remote { .. } => "remote",
            KeyError::Decode { .. } => "decode",
        }
    }
}

pub type KeyResult<T> = Result<T, KeyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_code_values_are_stable() {
        assert_eq!(ResultCode::Ok.as_i32(), 0);
        assert_eq!(ResultCode::AuthKeyRemoveFailed.as_i32(), 5);
        assert_eq!(ResultCode::ServiceUnreachable.as_i32(), 10);
        assert!(ResultCode::Ok.is_ok());
        assert!(!ResultCode::SignInitFailed.is_ok());
    }

    #[test]
    fn test_unreachable_has_its_own_code() {
        let err = KeyError::ServiceUnreachable {
            op: Operation::GenerateAuthKey,
        };
        assert_eq!(err.code(), ResultCode::ServiceUnreachable);
        assert_eq!(err.operation(), Operation::GenerateAuthKey);
    }

    #[test]
    fn test_transport_and_remote_map_to_operation_code() {
        let transport = KeyError::Transport {
            op: Operation::RemoveMasterKey,
            source: TransportError::DeadObject,
        };
        assert_eq!(transport.code(), ResultCode::MasterKeyRemoveFailed);

        let remote = KeyError::Remote {
            op: Operation::InitSign,
            status: 12,
        };
        assert_eq!(remote.code(), ResultCode::SignInitFailed);
        assert_eq!(remote.to_string(), "init_sign: remote returned status 12");
    }

    #[test]
    fn test_precondition_maps_to_operation_code() {
        let err = KeyError::Precondition {
            op: Operation::GenerateMasterKey,
            source: PreconditionError::Unsupported,
        };
        assert_eq!(err.code(), ResultCode::MasterKeyGenFailed);
        assert_eq!(err.kind(), "precondition");
    }

    #[test]
    fn test_result_code_serializes_snake_case() {
        let json = serde_json::to_string(&ResultCode::AuthKeyGenFailed).unwrap();
        assert_eq!(json, "\"auth_key_gen_failed\"");
    }
}
