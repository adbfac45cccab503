//! Framed reads and writes over a byte stream.
//!
//! The transport is generic over `AsyncRead`/`AsyncWrite` so connection code
//! runs identically over TCP halves and over in-memory streams in tests.
//! One [`FrameReader`] and one [`FrameWriter`] together own a connection's
//! stream; they are independent so reads and writes proceed concurrently.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::{FrameHeader, HEADER_SIZE, TransportError};
use crate::pool::{BufferPool, PooledBuffer};

/// One inbound message as read off the wire.
///
/// The payload buffer is exclusively owned by the receiver until handed to
/// the codec for decode, then released back to the pool; its content must
/// not be read after release.
#[derive(Debug)]
pub struct RawMessage {
    /// Type id from the frame header.
    pub type_id: u16,
    /// Pooled payload bytes, sized exactly to the frame's length field.
    pub payload: PooledBuffer,
}

/// Reads one framed message at a time from a stream.
pub struct FrameReader<R> {
    inner: R,
    pool: BufferPool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a stream's read half, drawing payload buffers from `pool`.
    pub fn new(inner: R, pool: BufferPool) -> Self {
        Self { inner, pool }
    }

    /// Read exactly one message.
    ///
    /// Reads are partial-read-safe: the underlying reads loop until the
    /// header and payload are complete or the connection dies. The magic is
    /// validated before anything else in the frame is interpreted.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Protocol`] on a magic mismatch or length overflow
    /// - [`TransportError::Io`] on stream failure or mid-frame EOF
    /// - [`TransportError::Cancelled`] when `cancel` fires first
    pub async fn read_message(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<RawMessage, TransportError> {
        let mut header = [0u8; HEADER_SIZE];
        self.read_full(&mut header, cancel).await?;

        let frame = FrameHeader::deserialize(&header)?;
        let length = frame.length as usize;

        let mut payload = self.pool.get(length);
        self.read_full(payload.as_mut_slice(), cancel).await?;

        Ok(RawMessage {
            type_id: frame.type_id,
            payload,
        })
    }

    async fn read_full(
        &mut self,
        buf: &mut [u8],
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            read = self.inner.read_exact(buf) => {
                read?;
                Ok(())
            }
        }
    }
}

/// Writes one framed message at a time to a stream.
pub struct FrameWriter<W> {
    inner: W,
    write_timeout: Duration,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a stream's write half with a per-write timeout.
    pub fn new(inner: W, write_timeout: Duration) -> Self {
        Self {
            inner,
            write_timeout,
        }
    }

    /// Write one message: magic, length, type id, payload, flush, in that
    /// order, as one logical write.
    ///
    /// The write is bounded by the per-write timeout combined with `cancel`;
    /// whichever fires first aborts it. A write that fails partway leaves
    /// the peer's framing desynchronized — the connection must be torn down,
    /// never reused.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Protocol`] when the payload is too large to frame
    /// - [`TransportError::Io`] on stream failure or timeout
    /// - [`TransportError::Cancelled`] when `cancel` fires first
    pub async fn write_message(
        &mut self,
        payload: &[u8],
        type_id: u16,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let length = match u32::try_from(payload.len()) {
            Ok(len) if i32::try_from(len).is_ok() => len,
            _ => {
                return Err(super::ProtocolError::LengthOverflow {
                    length: u32::try_from(payload.len()).unwrap_or(u32::MAX),
                }
                .into());
            }
        };

        let header = FrameHeader { length, type_id };
        let mut head = [0u8; HEADER_SIZE];
        header.serialize_into(&mut head);

        tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            written = tokio::time::timeout(self.write_timeout, async {
                self.inner.write_all(&head).await?;
                self.inner.write_all(payload).await?;
                self.inner.flush().await
            }) => {
                match written {
                    Ok(result) => {
                        result?;
                        Ok(())
                    }
                    Err(_) => Err(TransportError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "write timed out",
                    ))),
                }
            }
        }
    }

    /// Shut the write half down, signalling EOF to the peer. Best-effort.
    pub async fn shutdown(&mut self) {
        let _ = self.inner.shutdown().await;
    }
}
