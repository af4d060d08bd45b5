use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FrameError, Result};

/// Schema version written into every envelope.
pub const ENVELOPE_VERSION: u8 = 1;

/// Success.
pub const CODE_OK: i32 = 200;
/// The request could not be understood.
pub const CODE_BAD_REQUEST: i32 = 400;
/// The requested resource does not exist.
pub const CODE_NOT_FOUND: i32 = 404;
/// The handler failed without a more specific code.
pub const CODE_INTERNAL_ERROR: i32 = 500;

/// Reply wrapper: the only object ever written as a reply frame.
///
/// JSON form: `{"v":1,"code":200,"value":...}` or
/// `{"v":1,"code":404,"message":"not found"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "v")]
    pub version: u8,
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// A non-200 reply, as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("remote error {code}: {message}")]
pub struct RemoteError {
    pub code: i32,
    pub message: String,
}

impl Envelope {
    /// Successful reply carrying `value`.
    pub fn ok(value: Option<Value>) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            code: CODE_OK,
            message: None,
            value,
        }
    }

    /// Failed reply.
    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            code,
            message: Some(message.into()),
            value: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }

    /// Serialize for the wire.
    pub fn encode(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(FrameError::Envelope)
    }

    /// Parse a reply frame, rejecting unknown schema versions.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(bytes).map_err(FrameError::Envelope)?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(FrameError::UnsupportedVersion(envelope.version));
        }
        Ok(envelope)
    }

    /// Split into the reply value or the remote failure.
    pub fn into_result(self) -> std::result::Result<Option<Value>, RemoteError> {
        if self.is_ok() {
            return Ok(self.value);
        }
        let code = self.code;
        Err(RemoteError {
            code,
            message: self
                .message
                .unwrap_or_else(|| format!("request failed with code {code}")),
        })
    }
}

/// Serialize an application payload for a request frame.
pub fn encode_payload<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(FrameError::Payload)
}

/// Deserialize an application payload from a request frame.
pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(FrameError::Payload)
}
