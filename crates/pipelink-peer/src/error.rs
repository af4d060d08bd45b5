use std::time::Duration;

use pipelink_frame::{FrameError, RemoteError};
use pipelink_transport::TransportError;

/// Errors that can occur in peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error (binding, invalid names).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame-level error that did not invalidate the connection.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Handshake failed: name mismatch, malformed identity or a fault while
    /// exchanging identities.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The channel is dead or could not be opened. The pool discards it.
    #[error("channel to {endpoint} unavailable: {reason}")]
    ChannelUnavailable { endpoint: String, reason: String },

    /// The operation deadline elapsed. The channel has been torn down.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The remote handler answered with a non-200 code.
    #[error("remote error {code}: {message}")]
    Application { code: i32, message: String },

    /// The reply was absent or malformed.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Writing a reply failed. The inbound channel is closed.
    #[error("failed to write reply: {0}")]
    ReplyFailed(#[source] FrameError),

    /// A reply was already written for this request.
    #[error("request already replied to")]
    AlreadyReplied,

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The service has been shut down.
    #[error("service shut down")]
    Shutdown,
}

impl PeerError {
    /// Whether the underlying stream was lost.
    pub fn is_connection_fatal(&self) -> bool {
        match self {
            PeerError::ChannelUnavailable { .. } | PeerError::ReplyFailed(_) => true,
            PeerError::Frame(err) => err.is_connection_fatal(),
            _ => false,
        }
    }

    /// Whether the operation ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PeerError::Timeout(_))
    }

    /// The remote error code for application errors.
    pub fn application_code(&self) -> Option<i32> {
        match self {
            PeerError::Application { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<RemoteError> for PeerError {
    fn from(err: RemoteError) -> Self {
        PeerError::Application {
            code: err.code,
            message: err.message,
        }
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;
