//! Wire protocol: typed messages and fixed-layout codec
//!
//! Every payload starts with a validating envelope followed by a message body
//! whose layout depends on the message type. All fields are fixed-width and
//! big-endian, independent of the host's native encoding.
//!
//! # Payload layout
//!
//! ```text
//! [u32 magic][u16 version][u8 type][body]
//!
//! type 1 Hello:  [u32 cores]
//! type 2 Task:   [f64 a][f64 b][f64 h][u8 method][u32 worker_index][u32 worker_count]
//! type 3 Result: [f64 value]
//! type 4 Error:  [u32 text_len][text_len bytes of UTF-8]
//! ```
//!
//! The codec has no knowledge of the transport; it operates purely on
//! already-delimited byte buffers (see [`crate::framing`] for delimiting).
//! Decoding is all-or-nothing: a short or otherwise malformed buffer is
//! rejected and never partially accepted.

use crate::integrator::Method;
use thiserror::Error;

/// Protocol magic sentinel ('NPRJ'), identical on both ends
pub const PROTOCOL_MAGIC: u32 = 0x4E50_524A;

/// Protocol version
///
/// Increment on breaking wire changes. Coordinator and workers must match
/// exactly; a mismatch is a connection-fatal rejection.
pub const PROTOCOL_VERSION: u16 = 1;

const TYPE_HELLO: u8 = 1;
const TYPE_TASK: u8 = 2;
const TYPE_RESULT: u8 = 3;
const TYPE_ERROR: u8 = 4;

/// Codec failure taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Envelope magic does not match the protocol sentinel (connection-fatal)
    #[error("bad protocol magic: expected {PROTOCOL_MAGIC:#010x}, got {0:#010x}")]
    BadMagic(u32),

    /// Envelope version does not match ours (connection-fatal)
    #[error("protocol version mismatch: expected {PROTOCOL_VERSION}, got {0}")]
    VersionMismatch(u16),

    /// Envelope carries a message type we do not recognize
    #[error("unknown message type {0}")]
    UnknownType(u8),

    /// Buffer is short, has trailing garbage, or a field fails validation
    #[error("malformed message: {0}")]
    Malformed(&'static str),
}

impl CodecError {
    /// Whether this failure is a hard protocol rejection.
    ///
    /// Magic/version mismatches mean the peer is not speaking our protocol at
    /// all; the connection cannot recover. A malformed or unknown message can
    /// be dropped while the connection continues.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CodecError::BadMagic(_) | CodecError::VersionMismatch(_))
    }
}

/// Worker greeting carrying its advertised parallelism
///
/// The coordinator treats `cores == 0` as 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloMsg {
    pub cores: u32,
}

/// Integration task sent from coordinator to worker
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskMsg {
    /// Sub-interval lower bound (may exceed `b`)
    pub a: f64,
    /// Sub-interval upper bound
    pub b: f64,
    /// Integration step, strictly positive
    pub h: f64,
    /// Quadrature rule
    pub method: Method,
    /// This worker's index in connection order (informational)
    pub worker_index: u32,
    /// Total number of workers in the run (informational)
    pub worker_count: u32,
}

/// Worker's partial sum over its assigned sub-interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultMsg {
    pub value: f64,
}

/// Human-readable failure report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMsg {
    pub text: String,
}

/// A typed protocol message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Hello(HelloMsg),
    Task(TaskMsg),
    Result(ResultMsg),
    Error(ErrorMsg),
}

impl Message {
    fn type_code(&self) -> u8 {
        match self {
            Message::Hello(_) => TYPE_HELLO,
            Message::Task(_) => TYPE_TASK,
            Message::Result(_) => TYPE_RESULT,
            Message::Error(_) => TYPE_ERROR,
        }
    }

    /// Message name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Message::Hello(_) => "HELLO",
            Message::Task(_) => "TASK",
            Message::Result(_) => "RESULT",
            Message::Error(_) => "ERROR",
        }
    }
}

/// Encode a message as `envelope || body`
pub fn encode_message(msg: &Message) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(&PROTOCOL_MAGIC.to_be_bytes());
    buf.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    buf.push(msg.type_code());

    match msg {
        Message::Hello(m) => {
            buf.extend_from_slice(&m.cores.to_be_bytes());
        }
        Message::Task(m) => {
            buf.extend_from_slice(&m.a.to_be_bytes());
            buf.extend_from_slice(&m.b.to_be_bytes());
            buf.extend_from_slice(&m.h.to_be_bytes());
            buf.push(m.method as u8);
            buf.extend_from_slice(&m.worker_index.to_be_bytes());
            buf.extend_from_slice(&m.worker_count.to_be_bytes());
        }
        Message::Result(m) => {
            buf.extend_from_slice(&m.value.to_be_bytes());
        }
        Message::Error(m) => {
            let bytes = m.text.as_bytes();
            buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            buf.extend_from_slice(bytes);
        }
    }

    buf
}

/// Decode one already-delimited payload buffer into a typed message.
///
/// The envelope is validated first; body decoding is dispatched strictly by
/// the envelope type. The whole buffer must be consumed exactly.
pub fn decode_message(buf: &[u8]) -> Result<Message, CodecError> {
    let mut r = Reader::new(buf);

    let magic = r.u32()?;
    let version = r.u16()?;
    let type_code = r.u8()?;

    if magic != PROTOCOL_MAGIC {
        return Err(CodecError::BadMagic(magic));
    }
    if version != PROTOCOL_VERSION {
        return Err(CodecError::VersionMismatch(version));
    }

    let msg = match type_code {
        TYPE_HELLO => Message::Hello(HelloMsg { cores: r.u32()? }),
        TYPE_TASK => {
            let a = r.f64()?;
            let b = r.f64()?;
            let h = r.f64()?;
            let method = match r.u8()? {
                1 => Method::Midpoint,
                2 => Method::Trapezoid,
                3 => Method::Simpson,
                _ => return Err(CodecError::Malformed("unknown method code")),
            };
            let worker_index = r.u32()?;
            let worker_count = r.u32()?;
            Message::Task(TaskMsg {
                a,
                b,
                h,
                method,
                worker_index,
                worker_count,
            })
        }
        TYPE_RESULT => Message::Result(ResultMsg { value: r.f64()? }),
        TYPE_ERROR => {
            let len = r.u32()? as usize;
            let bytes = r.bytes(len)?;
            let text = String::from_utf8(bytes.to_vec())
                .map_err(|_| CodecError::Malformed("error text is not valid UTF-8"))?;
            Message::Error(ErrorMsg { text })
        }
        other => return Err(CodecError::UnknownType(other)),
    };

    r.finish()?;
    Ok(msg)
}

/// Cursor over a payload buffer with checked fixed-width reads
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .pos
            .checked_add(n)
            .ok_or(CodecError::Malformed("length overflow"))?;
        if end > self.buf.len() {
            return Err(CodecError::Malformed("buffer too short"));
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f64(&mut self) -> Result<f64, CodecError> {
        let b = self.bytes(8)?;
        Ok(f64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn finish(self) -> Result<(), CodecError> {
        if self.pos != self.buf.len() {
            return Err(CodecError::Malformed("trailing bytes after message body"));
        }
        Ok(())
    }
}
