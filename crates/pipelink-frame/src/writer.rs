use std::io::ErrorKind;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::codec::{FrameConfig, HEADER_SIZE};
use crate::deadline::Deadline;
use crate::error::{FrameError, Result};

/// Writes complete frames to any `AsyncWrite` stream.
///
/// The encoded frame goes out in chunks of at most
/// [`FrameConfig::effective_chunk_size`] bytes, each followed by a flush.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: AsyncWrite + Unpin> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(HEADER_SIZE + config.effective_chunk_size()),
            config,
        }
    }

    /// Write one frame carrying `payload`.
    ///
    /// Nothing is written when the payload is empty or exceeds the configured
    /// maximum. A timed-out write may leave a partial frame on the stream, so
    /// callers must treat the connection as unusable afterwards.
    pub async fn write_frame(&mut self, payload: &[u8], deadline: Deadline) -> Result<()> {
        if payload.is_empty() {
            return Err(FrameError::EmptyPayload);
        }
        if payload.len() > self.config.max_payload_size || payload.len() > u32::MAX as usize {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size.min(u32::MAX as usize),
            });
        }

        deadline.run(self.write_chunks(payload)).await?
    }

    async fn write_chunks(&mut self, payload: &[u8]) -> Result<()> {
        let chunk_size = self.config.effective_chunk_size();

        // The header rides with the first chunk.
        let first = payload.len().min(chunk_size.saturating_sub(HEADER_SIZE).max(1));
        self.buf.clear();
        self.buf.put_u32_le(payload.len() as u32);
        self.buf.put_slice(&payload[..first]);

        let Self { inner, buf, .. } = self;
        for chunk in buf.chunks(chunk_size).chain(payload[first..].chunks(chunk_size)) {
            inner.write_all(chunk).await.map_err(map_write_err)?;
            flush_stream(inner).await?;
        }
        Ok(())
    }

    /// Write the zero-length close sentinel.
    ///
    /// The peer reads it as a clean disconnect. No frame may follow.
    pub async fn write_close(&mut self, deadline: Deadline) -> Result<()> {
        let inner = &mut self.inner;
        deadline
            .run(async move {
                inner
                    .write_all(&[0u8; HEADER_SIZE])
                    .await
                    .map_err(map_write_err)?;
                flush_stream(inner).await
            })
            .await?
    }

    /// Flush the underlying stream.
    pub async fn flush(&mut self) -> Result<()> {
        flush_stream(&mut self.inner).await
    }

    /// Shut down the write half of the underlying stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await.map_err(map_write_err)
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum payload size for subsequent frame encoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

async fn flush_stream<T: AsyncWrite + Unpin>(inner: &mut T) -> Result<()> {
    loop {
        match inner.flush().await {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(map_write_err(err)),
        }
    }
}

fn map_write_err(err: std::io::Error) -> FrameError {
    match err.kind() {
        ErrorKind::WriteZero | ErrorKind::BrokenPipe => FrameError::ConnectionClosed,
        _ => FrameError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use super::*;
    use crate::codec::{decode_frame, MAX_CHUNK_SIZE};

    #[derive(Default)]
    struct ChunkRecorder {
        bytes: Vec<u8>,
        writes: Vec<usize>,
        flushes: usize,
    }

    impl AsyncWrite for ChunkRecorder {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.bytes.extend_from_slice(buf);
            self.writes.push(buf.len());
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            self.flushes += 1;
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    struct ClosedPipe;

    impl AsyncWrite for ClosedPipe {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Ok(0))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn small_frame_is_one_chunk_one_flush() {
        let mut writer = FrameWriter::new(ChunkRecorder::default());
        writer.write_frame(b"hi", Deadline::never()).await.unwrap();

        let sink = writer.into_inner();
        assert_eq!(sink.bytes, [2, 0, 0, 0, b'h', b'i']);
        assert_eq!(sink.writes, vec![6]);
        assert_eq!(sink.flushes, 1);
    }

    #[tokio::test]
    async fn large_frame_is_chunked_and_flushed_per_chunk() {
        let payload = vec![0xA5; 2 * MAX_CHUNK_SIZE + 100];
        let mut writer = FrameWriter::new(ChunkRecorder::default());
        writer.write_frame(&payload, Deadline::never()).await.unwrap();

        let sink = writer.into_inner();
        assert!(sink.writes.iter().all(|n| *n <= MAX_CHUNK_SIZE));
        assert_eq!(sink.writes.iter().sum::<usize>(), HEADER_SIZE + payload.len());
        assert_eq!(sink.flushes, sink.writes.len());

        let mut wire = BytesMut::from(&sink.bytes[..]);
        let frame = decode_frame(&mut wire, usize::MAX).unwrap().unwrap();
        assert_eq!(frame.len(), payload.len());
    }

    #[tokio::test]
    async fn custom_chunk_size_is_respected() {
        let cfg = FrameConfig {
            chunk_size: 8,
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(ChunkRecorder::default(), cfg);
        writer
            .write_frame(b"0123456789abcdef", Deadline::never())
            .await
            .unwrap();

        let sink = writer.into_inner();
        assert_eq!(sink.writes, vec![8, 8, 4]);
        assert_eq!(sink.flushes, 3);
    }

    #[tokio::test]
    async fn empty_payload_writes_nothing() {
        let mut writer = FrameWriter::new(ChunkRecorder::default());
        let err = writer.write_frame(b"", Deadline::never()).await.unwrap_err();
        assert!(matches!(err, FrameError::EmptyPayload));
        assert!(writer.get_ref().bytes.is_empty());
    }

    #[tokio::test]
    async fn oversized_payload_writes_nothing() {
        let cfg = FrameConfig {
            max_payload_size: 4,
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(ChunkRecorder::default(), cfg);
        let err = writer
            .write_frame(b"too large", Deadline::never())
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 9, max: 4 }));
        assert!(writer.get_ref().bytes.is_empty());
    }

    #[tokio::test]
    async fn write_zero_means_peer_closed() {
        let mut writer = FrameWriter::new(ClosedPipe);
        let err = writer.write_frame(b"data", Deadline::never()).await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn stalled_reader_times_out_writer() {
        let (client, _server) = tokio::io::duplex(16);
        let mut writer = FrameWriter::new(client);
        let err = writer
            .write_frame(&[1u8; 1024], Deadline::after(Duration::from_millis(30)))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn close_sentinel_reads_as_closed() {
        let (client, server) = tokio::io::duplex(64);
        let mut writer = FrameWriter::new(client);
        writer.write_frame(b"last", Deadline::never()).await.unwrap();
        writer.write_close(Deadline::never()).await.unwrap();

        let mut reader = crate::reader::FrameReader::new(server);
        let frame = reader.read_frame(Deadline::never()).await.unwrap();
        assert_eq!(frame.as_ref(), b"last");
        let err = reader.read_frame(Deadline::never()).await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn set_max_payload_size_applies_to_next_write() {
        let mut writer = FrameWriter::new(ChunkRecorder::default());
        writer.set_max_payload_size(2);
        assert_eq!(writer.config().max_payload_size, 2);
        assert!(writer.write_frame(b"abc", Deadline::never()).await.is_err());
        writer.get_mut().bytes.clear();
        writer.write_frame(b"ab", Deadline::never()).await.unwrap();
        writer.shutdown().await.unwrap();
    }
}
