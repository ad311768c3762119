//! Frame codec built on [`tokio_util::codec`].
//!
//! A [`Codec`] is meant to be wrapped in a [`Framed`](tokio_util::codec::Framed) over any
//! `AsyncRead + AsyncWrite` transport: the transport is the byte source and sink, the codec turns
//! its bytes into [`Frame`]s and back, exactly one frame per call.
use bytes::{Buf, BytesMut};
use tokio_util::codec;

use crate::{
    frame::{Frame, OpCode, MAX_HEAD_SIZE},
    mask, WebSocketError,
};

/// Represents the reading state of a WebSocket frame.
enum ReadState {
    /// The first two bytes were consumed, waiting for the extended length and mask.
    Header(Header),
    /// The whole header was consumed, waiting for the payload.
    Payload(HeaderAndMask),
}

/// The fields carried by the first two bytes of a frame.
struct Header {
    /// Indicates if this is the final fragment in a message.
    fin: bool,
    /// Indicates if the payload is masked.
    masked: bool,
    /// The operation code of the frame.
    opcode: OpCode,
    /// Number of extended length bytes that follow (0, 2 or 8).
    extra: usize,
    /// The 7-bit length field.
    length_code: u8,
    /// Remaining header bytes: extended length plus mask key.
    header_size: usize,
}

/// Header and mask data once every byte before the payload was decoded.
struct HeaderAndMask {
    header: Header,
    /// Masking key, used once to unmask the payload and then dropped.
    mask: Option<[u8; 4]>,
    /// Length of the payload, in bytes.
    payload_len: usize,
}

/// A combined codec that provides both encoding and decoding of WebSocket frames.
pub struct Codec {
    decoder: Decoder,
    encoder: Encoder,
}

impl Codec {
    /// Creates a codec whose decoder rejects frames with a payload larger than `max_payload_read`.
    pub fn new(max_payload_read: usize) -> Self {
        Self::from((Decoder::new(max_payload_read), Encoder))
    }
}

impl From<(Decoder, Encoder)> for Codec {
    fn from((decoder, encoder): (Decoder, Encoder)) -> Self {
        Self { decoder, encoder }
    }
}

impl codec::Decoder for Codec {
    type Item = <Decoder as codec::Decoder>::Item;
    type Error = <Decoder as codec::Decoder>::Error;

    #[inline]
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decoder.decode(src)
    }

    #[inline]
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decoder.decode_eof(src)
    }
}

impl codec::Encoder<Frame> for Codec {
    type Error = <Encoder as codec::Encoder<Frame>>::Error;

    #[inline]
    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encoder.encode(item, dst)
    }
}

/// A decoder for WebSocket frames.
///
/// `Decoder` parses a frame in stages (first two header bytes, extended length and mask, payload),
/// keeping the partial state between calls so that a frame split across several reads is decoded
/// exactly once all of its bytes are available.
pub struct Decoder {
    /// Current reading state, `None` at a frame boundary.
    state: Option<ReadState>,
    /// Maximum allowed size for a single frame payload.
    max_payload_size: usize,
}

impl Decoder {
    /// Creates a new `Decoder` that rejects payloads larger than `max_payload_size` bytes.
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            state: None,
            max_payload_size,
        }
    }

    /// Returns `true` if the decoder stopped in the middle of a frame.
    #[inline]
    fn is_mid_frame(&self, src: &BytesMut) -> bool {
        self.state.is_some() || !src.is_empty()
    }
}

impl codec::Decoder for Decoder {
    type Item = Frame;
    type Error = WebSocketError;

    /// Decodes one frame from `src`.
    ///
    /// # Returns
    /// - `Ok(Some(Frame))`: a complete frame, payload already unmasked.
    /// - `Ok(None)`: more bytes are needed.
    /// - `Err(WebSocketError::FrameTooLarge)`: the declared length exceeds the configured maximum
    ///   or does not fit in memory on this platform.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state.take() {
                None => {
                    if src.remaining() < 2 {
                        return Ok(None);
                    }

                    // RSV bits are not validated, extensions are never negotiated
                    let fin = src[0] & 0b1000_0000 != 0;
                    let opcode = OpCode::from_nibble(src[0]);
                    let masked = src[1] & 0b1000_0000 != 0;
                    let length_code = src[1] & 0x7F;

                    let extra = match length_code {
                        126 => 2,
                        127 => 8,
                        _ => 0,
                    };
                    let header_size = extra + masked as usize * 4;
                    src.advance(2);

                    self.state = Some(ReadState::Header(Header {
                        fin,
                        masked,
                        opcode,
                        extra,
                        length_code,
                        header_size,
                    }));
                }
                Some(ReadState::Header(header)) => {
                    if src.remaining() < header.header_size {
                        self.state = Some(ReadState::Header(header));
                        return Ok(None);
                    }

                    let payload_len = match header.extra {
                        2 => usize::from(src.get_u16()),
                        8 => usize::try_from(src.get_u64())
                            .map_err(|_| WebSocketError::FrameTooLarge)?,
                        _ => usize::from(header.length_code),
                    };

                    // raw key bytes, no endianness conversion
                    let mask = if header.masked {
                        let mut key = [0u8; 4];
                        src.copy_to_slice(&mut key);
                        Some(key)
                    } else {
                        None
                    };

                    if payload_len > self.max_payload_size {
                        return Err(WebSocketError::FrameTooLarge);
                    }

                    self.state = Some(ReadState::Payload(HeaderAndMask {
                        header,
                        mask,
                        payload_len,
                    }));
                }
                Some(ReadState::Payload(header_and_mask)) => {
                    if src.remaining() < header_and_mask.payload_len {
                        self.state = Some(ReadState::Payload(header_and_mask));
                        return Ok(None);
                    }

                    let HeaderAndMask {
                        header,
                        mask,
                        payload_len,
                    } = header_and_mask;

                    let mut payload = src.split_to(payload_len);
                    if let Some(key) = mask {
                        mask::apply_mask(&mut payload, key);
                    }

                    break Ok(Some(Frame::new(header.fin, header.opcode, payload)));
                }
            }
        }
    }

    /// Called once the transport reached end of input.
    ///
    /// Nothing buffered at a frame boundary is a clean close and ends the stream. Any partial
    /// header, extended length, mask or payload is [`WebSocketError::UnexpectedEof`].
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if self.is_mid_frame(src) => {
                #[cfg(feature = "logging")]
                log::warn!(
                    "stream ended in the middle of a frame ({} bytes buffered)",
                    src.len()
                );
                self.state = None;
                src.clear();
                Err(WebSocketError::UnexpectedEof)
            }
            None => Ok(None),
        }
    }
}

/// WebSocket frame encoder.
///
/// Frames are written unmasked, with RSV bits cleared and the smallest length encoding.
pub struct Encoder;

impl codec::Encoder<Frame> for Encoder {
    type Error = WebSocketError;

    /// Appends the header and the payload of `frame` to `dst`.
    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut header = [0; MAX_HEAD_SIZE];
        let size = frame.fmt_head(&mut header[..]);

        dst.reserve(size + frame.payload.len());
        dst.extend_from_slice(&header[..size]);
        dst.extend_from_slice(&frame.payload);

        Ok(())
    }
}
