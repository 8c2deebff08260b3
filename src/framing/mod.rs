//! Length-prefixed message framing
//!
//! Turns a connection's raw byte stream into discrete payloads and back,
//! independent of message semantics.
//!
//! # Frame format
//!
//! Each frame is prefixed with a 4-byte length field (big-endian u32):
//!
//! ```text
//! [4 bytes: payload length][N bytes: payload]
//! ```
//!
//! On send, the prefix and payload are written as a single buffer so frames
//! from concurrent senders on one connection are never interleaved. On
//! receive, [`FrameDecoder`] accumulates bytes and extracts every complete
//! frame in arrival order; [`FrameReader`] drives it from an async stream and
//! reports connection closure as a disconnect, not a parse error.

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frame length prefix size in bytes
pub const LEN_PREFIX_SIZE: usize = 4;

/// Sanity cap on a single payload; all protocol messages are tiny
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Incremental frame extraction state machine.
///
/// Alternates between "awaiting 4-byte length" and "awaiting N payload
/// bytes". Feeding may be split at arbitrary boundaries; every frame that
/// becomes complete is delivered exactly once, in arrival order.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    /// Payload length parsed from the current prefix, if any
    expected: Option<usize>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes from the stream
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Extract the next complete frame, if enough bytes have accumulated.
    ///
    /// Call in a loop after every [`feed`](Self::feed) to drain all frames a
    /// single read event completed.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.expected.is_none() {
            if self.buf.len() < LEN_PREFIX_SIZE {
                return Ok(None);
            }
            let len =
                u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
            if len > MAX_FRAME_LEN {
                anyhow::bail!("frame too large: {} bytes (max {})", len, MAX_FRAME_LEN);
            }
            self.buf.drain(..LEN_PREFIX_SIZE);
            self.expected = Some(len);
        }

        let len = self.expected.unwrap_or(0);
        if self.buf.len() < len {
            return Ok(None);
        }

        let payload: Vec<u8> = self.buf.drain(..len).collect();
        self.expected = None;
        Ok(Some(payload))
    }

    /// Whether a partially received frame is pending.
    ///
    /// Used to distinguish a clean close from a mid-frame close for logging.
    pub fn has_partial(&self) -> bool {
        self.expected.is_some() || !self.buf.is_empty()
    }
}

/// Write one framed payload as a single buffer write
pub async fn write_frame<W>(stream: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        anyhow::bail!(
            "refusing to send oversized frame: {} bytes (max {})",
            payload.len(),
            MAX_FRAME_LEN
        );
    }

    let mut frame = Vec::with_capacity(LEN_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);

    stream
        .write_all(&frame)
        .await
        .context("Failed to write frame")?;
    stream.flush().await.context("Failed to flush stream")?;

    Ok(())
}

/// Reads complete frames from an async byte stream.
///
/// All frames buffered by previous reads are drained before the stream is
/// read again, so no read event can reorder or drop a frame.
pub struct FrameReader<R> {
    stream: R,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(stream: R) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 8192],
        }
    }

    /// Read the next complete payload.
    ///
    /// Returns `Ok(None)` when the peer closed the connection; closure before
    /// a frame completes is still a disconnect, not a parse error (check
    /// [`closed_mid_frame`](Self::closed_mid_frame) for logging).
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(payload) = self.decoder.next_frame()? {
                return Ok(Some(payload));
            }

            let n = self
                .stream
                .read(&mut self.read_buf)
                .await
                .context("Failed to read from stream")?;
            if n == 0 {
                return Ok(None);
            }
            self.decoder.feed(&self.read_buf[..n]);
        }
    }

    /// Whether the stream ended while a frame was partially received
    pub fn closed_mid_frame(&self) -> bool {
        self.decoder.has_partial()
    }
}
