//! Decoding of exported key material.
//!
//! # Wire format
//! ```text
//! ┌──────────────┬────────────────────┬──────────────────────┐
//! │ json_len u32 │ JSON descriptor    │ signature (rest)     │
//! │ little-endian│ json_len bytes     │                      │
//! └──────────────┴────────────────────┴──────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Public description of a hardware-backed key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDescriptor {
    #[serde(rename = "pub_key")]
    pub public_key: String,

    #[serde(default)]
    pub counter: u64,

    #[serde(default)]
    pub cpu_id: String,

    #[serde(default)]
    pub uid: i32,

    /// The JSON exactly as exported, which `signature` covers.
    #[serde(skip)]
    pub raw_json: String,

    #[serde(skip)]
    pub signature: Vec<u8>,
}

/// Errors decoding an exported key payload.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("payload too short: {0} bytes")]
    TooShort(usize),

    #[error("declared descriptor length {declared} exceeds {available} available bytes")]
    LengthOutOfRange { declared: usize, available: usize },

    #[error("descriptor is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("descriptor JSON invalid: {0}")]
    Json(#[from] serde_json::Error),
}

/// Turns a remote result payload into a [`KeyDescriptor`].
pub trait KeyCodec: Send + Sync {
    fn decode(&self, payload: &[u8]) -> Result<KeyDescriptor, CodecError>;
}

/// Codec for the length-prefixed JSON + signature export format.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExportedKeyCodec;

const LEN_PREFIX: usize = 4;

impl ExportedKeyCodec {
    /// Build an export payload from a descriptor and signature.
    pub fn encode(descriptor: &KeyDescriptor, signature: &[u8]) -> Result<Vec<u8>, CodecError> {
        let json = serde_json::to_vec(descriptor)?;
        let mut out = Vec::with_capacity(LEN_PREFIX + json.len() + signature.len());
        out.extend_from_slice(&(json.len() as u32).to_le_bytes());
        out.extend_from_slice(&json);
        out.extend_from_slice(signature);
        Ok(out)
    }
}

impl KeyCodec for ExportedKeyCodec {
    fn decode(&self, payload: &[u8]) -> Result<KeyDescriptor, CodecError> {
        let Some((prefix, rest)) = payload.split_first_chunk::<LEN_PREFIX>() else {
            return Err(CodecError::TooShort(payload.len()));
        };
        let declared = u32::from_le_bytes(*prefix) as usize;
        if declared > rest.len() {
            return Err(CodecError::LengthOutOfRange {
                declared,
                available: rest.len(),
            });
        }

        let (json, signature) = rest.split_at(declared);
        let raw_json = String::from_utf8(json.to_vec())?;
        let mut descriptor: KeyDescriptor = serde_json::from_str(&raw_json)?;
        descriptor.raw_json = raw_json;
        descriptor.signature = signature.to_vec();
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> KeyDescriptor {
        KeyDescriptor {
            public_key: "-----BEGIN PUBLIC KEY-----".into(),
            counter: 7,
            cpu_id: "cpu-1".into(),
            uid: 10001,
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_encoded_payload() {
        let payload = ExportedKeyCodec::encode(&sample(), b"sig").unwrap();
        let decoded = ExportedKeyCodec.decode(&payload).unwrap();

        assert_eq!(decoded.public_key, sample().public_key);
        assert_eq!(decoded.counter, 7);
        assert_eq!(decoded.signature, b"sig");
        assert!(decoded.raw_json.contains("\"pub_key\""));
    }

    #[test]
    fn test_decode_foreign_json() {
        let json = br#"{"pub_key":"k","cpu_id":"c","extra":true}"#;
        let mut payload = (json.len() as u32).to_le_bytes().to_vec();
        payload.extend_from_slice(json);

        let decoded = ExportedKeyCodec.decode(&payload).unwrap();
        assert_eq!(decoded.public_key, "k");
        assert_eq!(decoded.counter, 0);
        assert!(decoded.signature.is_empty());
    }

    #[test]
    fn test_decode_too_short() {
        assert!(matches!(
            ExportedKeyCodec.decode(&[1, 0]),
            Err(CodecError::TooShort(2))
        ));
    }

    #[test]
    fn test_decode_length_out_of_range() {
        let mut payload = 100u32.to_le_bytes().to_vec();
        payload.extend_from_slice(b"{}");
        assert!(matches!(
            ExportedKeyCodec.decode(&payload),
            Err(CodecError::LengthOutOfRange {
                declared: 100,
                available: 2
            })
        ));
    }

    #[test]
    fn test_decode_missing_public_key() {
        let json = br#"{"counter":1}"#;
        let mut payload = (json.len() as u32).to_le_bytes().to_vec();
        payload.extend_from_slice(json);
        assert!(matches!(
            ExportedKeyCodec.decode(&payload),
            Err(CodecError::Json(_))
        ));
    }
}
