//! # Frame
//!
//! The `frame` module implements WebSocket frames as defined in [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2)
//! together with the reassembled [`Message`] handed to applications.
//!
//! ### Frame Binary Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)       |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! :                     Payload Data continued ...                :
//! +---------------------------------------------------------------+
//! ```
//!
//! - [`Frame`]: one wire-level unit. The payload is always stored unmasked; the masking
//!   key of an inbound frame is consumed by the decoder and never kept.
//! - [`Message`]: the application-level unit, the concatenation of one or more frames.
//!
//! ```rust
//! use wsframe::frame::{Frame, Message, OpCode};
//!
//! let text = Message::text("Hello, WebSocket!");
//! assert_eq!(text.opcode, OpCode::Text);
//!
//! let first = Frame::text("Hel").with_fin(false);
//! let last = Frame::continuation("lo");
//! assert!(!first.fin && last.fin);
//! ```
use bytes::{Bytes, BytesMut};

use crate::{Result, WebSocketError};

/// WebSocket operation code (OpCode), the 4-bit tag that determines how a frame is handled.
///
/// # Data Frame OpCodes
/// - `Continuation` (0x0): continues a fragmented message started by another data frame
/// - `Text` (0x1): UTF-8 encoded text data
/// - `Binary` (0x2): raw binary data
///
/// # Control Frame OpCodes
/// - `Close` (0x8): initiates or confirms connection closure
/// - `Ping` (0x9): liveness check, answered with a `Pong`
/// - `Pong` (0xA): answer to a `Ping`
///
/// # Reserved OpCodes
/// 0x3-0x7 (data) and 0xB-0xF (control) are carried as [`OpCode::Reserved`]. They are not
/// rejected by the decoder; the session delivers them to the application as-is.
///
/// Only those ranges are meaningful inside `Reserved`. Opcodes compare and hash by their wire
/// value, so `Reserved(0x1)` equals [`OpCode::Text`] and bits above the low nibble are ignored.
#[derive(Debug, Copy, Clone)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    Reserved(u8),
}

impl OpCode {
    /// Returns `true` for control opcodes (`Close`, `Ping`, `Pong` and the reserved 0xB-0xF range).
    #[inline]
    pub fn is_control(&self) -> bool {
        u8::from(*self) & 0x08 != 0
    }

    /// Returns `true` for the opcodes RFC 6455 leaves reserved.
    #[inline]
    pub fn is_reserved(&self) -> bool {
        matches!(Self::from_nibble(u8::from(*self)), OpCode::Reserved(_))
    }

    /// Maps the low nibble of `value` to its opcode. The upper bits are ignored.
    pub(crate) fn from_nibble(value: u8) -> Self {
        match value & 0x0F {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            other => Self::Reserved(other),
        }
    }
}

impl PartialEq for OpCode {
    fn eq(&self, other: &Self) -> bool {
        u8::from(*self) == u8::from(*other)
    }
}

impl Eq for OpCode {}

impl std::hash::Hash for OpCode {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::hash::Hash::hash(&u8::from(*self), state);
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WebSocketError;

    /// Converts a 4-bit code into an `OpCode`.
    ///
    /// Every value from 0x0 to 0xF is a valid opcode (reserved ones included); anything wider than
    /// four bits results in [`WebSocketError::InvalidOpCode`].
    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        if value > 0x0F {
            return Err(WebSocketError::InvalidOpCode(value));
        }
        Ok(Self::from_nibble(value))
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
            OpCode::Reserved(code) => code & 0x0F,
        }
    }
}

/// A reassembled application message.
///
/// `opcode` is the opcode of the first frame of the sequence and `data` the concatenation of
/// every frame payload in arrival order. Messages produced by the
/// [`MessageAssembler`](crate::assembler::MessageAssembler) own their buffer exclusively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The operation code of the message (Text, Binary, Close, ...).
    pub opcode: OpCode,
    /// The unmasked message payload.
    pub data: Bytes,
}

impl Message {
    /// Creates a new text message.
    pub fn text(data: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Text,
            data: data.into(),
        }
    }

    /// Creates a new binary message.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Binary,
            data: data.into(),
        }
    }

    /// Creates a ping message.
    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Ping,
            data: data.into(),
        }
    }

    /// Creates a pong message.
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Pong,
            data: data.into(),
        }
    }

    /// Creates a close message with a raw payload. The payload is not validated.
    pub fn close_raw(data: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Close,
            data: data.into(),
        }
    }

    /// Returns the payload as a string slice.
    ///
    /// # Errors
    /// [`WebSocketError::InvalidUTF8`] if the payload is not valid UTF-8.
    pub fn as_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.data).map_err(|_| WebSocketError::InvalidUTF8)
    }

    /// Returns `true` if the payload is valid UTF-8.
    #[inline]
    pub fn is_utf8(&self) -> bool {
        #[cfg(feature = "simd")]
        return simdutf8::basic::from_utf8(&self.data).is_ok();
        #[cfg(not(feature = "simd"))]
        return std::str::from_utf8(&self.data).is_ok();
    }
}

impl From<Message> for (OpCode, Bytes) {
    fn from(val: Message) -> Self {
        (val.opcode, val.data)
    }
}

impl From<(OpCode, Bytes)> for Message {
    fn from((opcode, data): (OpCode, Bytes)) -> Self {
        Self { opcode, data }
    }
}

/// A complete frame becomes a message by freezing its buffer; no bytes are copied.
impl From<Frame> for Message {
    fn from(value: Frame) -> Self {
        Self {
            opcode: value.opcode,
            data: value.payload.freeze(),
        }
    }
}

/// A single wire-level WebSocket frame.
///
/// **Note: most users should send and receive [`Message`]s.** Frames are only needed when the
/// fragmentation of a message must be controlled explicitly.
///
/// # Fields
/// - `fin`: final fragment flag. When `true` the frame completes a message.
/// - `opcode`: frame type.
/// - `payload`: unmasked payload. Its length is exactly the length declared on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Indicates if this is the final frame in a message.
    pub fin: bool,
    /// The opcode of the frame, defining its type.
    pub opcode: OpCode,
    /// The payload of the frame.
    pub payload: BytesMut,
}

/// Largest possible header of an unmasked frame: 2 bytes + 8 bytes of extended length.
pub(crate) const MAX_HEAD_SIZE: usize = 10;

impl Frame {
    /// Creates a new frame.
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<BytesMut>) -> Self {
        Self {
            fin,
            opcode,
            payload: payload.into(),
        }
    }

    /// Creates a final text frame.
    pub fn text(payload: impl AsRef<[u8]>) -> Self {
        Self::new(true, OpCode::Text, BytesMut::from(payload.as_ref()))
    }

    /// Creates a final binary frame.
    pub fn binary(payload: impl AsRef<[u8]>) -> Self {
        Self::new(true, OpCode::Binary, BytesMut::from(payload.as_ref()))
    }

    /// Creates a final continuation frame. Use [`Frame::with_fin`] for intermediate fragments.
    pub fn continuation(payload: impl AsRef<[u8]>) -> Self {
        Self::new(true, OpCode::Continuation, BytesMut::from(payload.as_ref()))
    }

    /// Creates a ping frame.
    pub fn ping(payload: impl AsRef<[u8]>) -> Self {
        Self::new(true, OpCode::Ping, BytesMut::from(payload.as_ref()))
    }

    /// Creates a pong frame, usually echoing the payload of a ping.
    pub fn pong(payload: impl AsRef<[u8]>) -> Self {
        Self::new(true, OpCode::Pong, BytesMut::from(payload.as_ref()))
    }

    /// Creates a close frame with a raw payload.
    ///
    /// This method does not validate if `payload` is a valid close frame payload.
    pub fn close_raw(payload: impl AsRef<[u8]>) -> Self {
        Self::new(true, OpCode::Close, BytesMut::from(payload.as_ref()))
    }

    /// Sets the `fin` flag.
    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    /// Formats the unmasked frame header into `head` and returns its size.
    ///
    /// The smallest length encoding is always chosen:
    /// - 0..=125: the length is stored in the second byte (2-byte header)
    /// - 126..=65535: marker 126 followed by a big-endian `u16` (4-byte header)
    /// - otherwise: marker 127 followed by a big-endian `u64` (10-byte header)
    ///
    /// # Panics
    /// Panics if `head` is shorter than [`MAX_HEAD_SIZE`].
    pub(crate) fn fmt_head(&self, head: &mut [u8]) -> usize {
        head[0] = (self.fin as u8) << 7 | u8::from(self.opcode);

        let len = self.payload.len();
        if len < 126 {
            head[1] = len as u8;
            2
        } else if len <= u16::MAX as usize {
            head[1] = 126;
            head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            4
        } else {
            head[1] = 127;
            head[2..10].copy_from_slice(&(len as u64).to_be_bytes());
            10
        }
    }
}

impl From<Message> for Frame {
    fn from(value: Message) -> Self {
        Frame::new(true, value.opcode, BytesMut::from(&value.data[..]))
    }
}
