use std::time::Duration;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured maximum size; nothing was written.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An incoming frame announced a length above the configured maximum.
    #[error("incoming frame too large ({size} bytes, max {max})")]
    OversizedFrame { size: usize, max: usize },

    /// Empty payloads cannot be framed: length 0 is the close sentinel.
    #[error("empty payload cannot be framed")]
    EmptyPayload,

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream (EOF or a zero-length frame).
    #[error("connection closed")]
    ConnectionClosed,

    /// The stream ended inside the 4-byte length prefix.
    #[error("connection closed inside frame header ({received} of 4 bytes)")]
    TruncatedHeader { received: usize },

    /// The stream ended before the announced payload was complete.
    #[error("connection closed mid-frame ({received} of {expected} payload bytes)")]
    Truncated { expected: usize, received: usize },

    /// The operation deadline elapsed.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// A reply envelope could not be decoded.
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    /// A reply envelope carries an unknown schema version.
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),

    /// An application payload could not be (de)serialized.
    #[error("payload serialization failed: {0}")]
    Payload(#[source] serde_json::Error),
}

impl FrameError {
    /// Whether the stream can no longer be trusted after this error.
    ///
    /// Timeouts are reported separately by [`FrameError::is_timeout`] but
    /// also leave the stream unusable.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            FrameError::Io(_)
                | FrameError::ConnectionClosed
                | FrameError::TruncatedHeader { .. }
                | FrameError::Truncated { .. }
                | FrameError::OversizedFrame { .. }
        )
    }

    /// Whether the operation ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, FrameError::TimedOut(_))
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
