use std::io::ErrorKind;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::{decode_frame, peek_length, FrameConfig, HEADER_SIZE};
use crate::deadline::Deadline;
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Reads complete frames from any `AsyncRead` stream.
///
/// Partial reads are buffered internally; callers only ever see complete
/// payloads.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    chunk: Box<[u8]>,
    config: FrameConfig,
}

impl<T: AsyncRead + Unpin> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            chunk: vec![0u8; config.effective_chunk_size()].into_boxed_slice(),
            config,
        }
    }

    /// Read the next complete frame payload.
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` on EOF or the zero-length
    /// sentinel, `Err(FrameError::TimedOut)` once `deadline` has passed.
    pub async fn read_frame(&mut self, deadline: Deadline) -> Result<Bytes> {
        deadline.run(self.fill_frame(deadline)).await?
    }

    async fn fill_frame(&mut self, deadline: Deadline) -> Result<Bytes> {
        loop {
            if let Some(payload) = decode_frame(&mut self.buf, self.config.max_payload_size)? {
                return Ok(payload);
            }

            let read = match self.inner.read(&mut self.chunk).await {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(self.eof_error(deadline));
            }

            self.buf.extend_from_slice(&self.chunk[..read]);
        }
    }

    fn eof_error(&self, deadline: Deadline) -> FrameError {
        if self.buf.is_empty() {
            return match deadline.budget() {
                Some(budget) if deadline.is_expired() => FrameError::TimedOut(budget),
                _ => FrameError::ConnectionClosed,
            };
        }
        let err = match peek_length(&self.buf) {
            None => FrameError::TruncatedHeader {
                received: self.buf.len(),
            },
            Some(expected) => FrameError::Truncated {
                expected,
                received: self.buf.len() - HEADER_SIZE,
            },
        };
        tracing::debug!(buffered = self.buf.len(), error = %err, "stream ended mid-frame");
        err
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum payload size for subsequent frame decoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
