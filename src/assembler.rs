//! Reassembly of fragmented messages.

use std::{
    future::poll_fn,
    task::{ready, Context, Poll},
};

use bytes::BytesMut;
use futures::StreamExt;

use crate::{
    frame::{Frame, Message, OpCode},
    Result, WebSocketError,
};

/// Turns a stream of frames into complete [`Message`]s.
///
/// [`MessageAssembler`] follows a sans-io design: [`MessageAssembler::on_frame`] consumes one
/// frame at a time, while [`MessageAssembler::poll_message`] and
/// [`MessageAssembler::read_message`] drive it over any
/// [`futures::Stream`](https://docs.rs/futures/latest/futures/stream/trait.Stream.html) of frames,
/// normally a [`Framed`](tokio_util::codec::Framed) transport using the [`Codec`](crate::codec::Codec).
///
/// A message is either a single frame with `fin` set, or a non-continuation frame without `fin`
/// followed by continuation frames, the last of which has `fin` set. Control frames are not
/// allowed inside a fragmented message. Every error is terminal for the message being read and
/// the partially accumulated data is dropped.
///
/// # Example
/// ```no_run
/// use tokio::net::TcpStream;
/// use tokio_util::codec::Framed;
/// use wsframe::{assembler::MessageAssembler, codec::Codec};
///
/// async fn read_one(stream: TcpStream) -> wsframe::Result<()> {
///     let mut framed = Framed::new(stream, Codec::new(1024 * 1024));
///     let mut assembler = MessageAssembler::new(64 * 1024);
///
///     let message = assembler.read_message(&mut framed).await?;
///     println!("{:?}: {} bytes", message.opcode, message.data.len());
///     Ok(())
/// }
/// ```
pub struct MessageAssembler {
    /// Message being reassembled, if a non-final frame was received.
    fragment: Option<Fragment>,
    /// Maximum total payload size of a fragmented message.
    max_message_size: usize,
    /// Set once the frame stream ended.
    is_closed: bool,
}

/// Fragmented message in progress.
struct Fragment {
    /// Opcode of the first frame, which becomes the message opcode.
    opcode: OpCode,
    /// The first frame's payload, extended with every continuation.
    accumulated: BytesMut,
}

impl MessageAssembler {
    /// Creates an assembler that rejects fragmented messages larger than `max_message_size` bytes.
    pub fn new(max_message_size: usize) -> Self {
        Self {
            fragment: None,
            max_message_size,
            is_closed: false,
        }
    }

    /// Returns `true` while a fragmented message is being accumulated.
    pub fn is_fragmented(&self) -> bool {
        self.fragment.is_some()
    }

    /// Processes one incoming frame.
    ///
    /// - A final frame outside of a fragmented message is returned right away as a message, its
    ///   buffer is frozen without copying.
    /// - A non-final frame starts a fragmented message. Its buffer becomes the accumulator.
    /// - A continuation frame extends the message in progress and completes it when `fin` is set.
    ///
    /// # Returns
    /// - `Ok(Some(Message))` once a message is complete.
    /// - `Ok(None)` if more fragments are needed.
    /// - `Err(WebSocketError::InvalidContinuationFrame)` for a continuation frame with no message
    ///   in progress.
    /// - `Err(WebSocketError::InvalidFragmentOpcode)` for any other opcode while a message is in
    ///   progress.
    /// - `Err(WebSocketError::FragmentedMessageTooLong)` when the message would exceed the limit.
    pub fn on_frame(&mut self, frame: Frame) -> Result<Option<Message>> {
        let Some(mut fragment) = self.fragment.take() else {
            if frame.opcode == OpCode::Continuation {
                return Err(WebSocketError::InvalidContinuationFrame);
            }

            if frame.fin {
                return Ok(Some(Message::from(frame)));
            }

            self.fragment = Some(Fragment {
                opcode: frame.opcode,
                accumulated: frame.payload,
            });

            return Ok(None);
        };

        if frame.opcode != OpCode::Continuation {
            return Err(WebSocketError::InvalidFragmentOpcode(frame.opcode));
        }

        if fragment.accumulated.len() + frame.payload.len() > self.max_message_size {
            return Err(WebSocketError::FragmentedMessageTooLong);
        }

        fragment.accumulated.extend_from_slice(&frame.payload);

        if frame.fin {
            Ok(Some(Message {
                opcode: fragment.opcode,
                data: fragment.accumulated.freeze(),
            }))
        } else {
            self.fragment = Some(fragment);
            Ok(None)
        }
    }

    /// Polls `stream` until a complete message is available.
    ///
    /// # Returns
    /// - `Poll::Ready(Ok(Message))`: a complete message.
    /// - `Poll::Ready(Err(WebSocketError::ConnectionClosed))`: the stream ended on a frame
    ///   boundary, now or on a previous call.
    /// - `Poll::Ready(Err(_))`: a decoding or fragmentation error.
    /// - `Poll::Pending`: more bytes are needed.
    pub fn poll_message<S>(&mut self, stream: &mut S, cx: &mut Context<'_>) -> Poll<Result<Message>>
    where
        S: futures::Stream<Item = Result<Frame>> + Unpin,
    {
        while !self.is_closed {
            let res = match ready!(stream.poll_next_unpin(cx)) {
                Some(res) => res,
                None => {
                    #[cfg(feature = "logging")]
                    if self.fragment.is_some() {
                        log::debug!("stream closed while a fragmented message was in progress");
                    }
                    self.fragment = None;
                    self.is_closed = true;
                    break;
                }
            };

            match res.and_then(|frame| self.on_frame(frame)) {
                Ok(Some(message)) => return Poll::Ready(Ok(message)),
                Ok(None) => {}
                Err(err) => {
                    self.fragment = None;
                    return Poll::Ready(Err(err));
                }
            }
        }

        Poll::Ready(Err(WebSocketError::ConnectionClosed))
    }

    /// Reads the next complete message from `stream`.
    pub async fn read_message<S>(&mut self, stream: &mut S) -> Result<Message>
    where
        S: futures::Stream<Item = Result<Frame>> + Unpin,
    {
        poll_fn(|cx| self.poll_message(stream, cx)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn frames(frames: Vec<Frame>) -> impl futures::Stream<Item = Result<Frame>> + Unpin {
        stream::iter(frames.into_iter().map(Ok))
    }

    #[tokio::test]
    async fn test_single_frame_message() {
        let mut assembler = MessageAssembler::new(10);
        let mut stream = frames(vec![Frame::binary(vec![7u8; 64])]);

        // the limit only applies to fragmented messages
        let message = assembler.read_message(&mut stream).await.unwrap();
        assert_eq!(message.opcode, OpCode::Binary);
        assert_eq!(message.data.len(), 64);
    }

    #[tokio::test]
    async fn test_two_fragments() {
        let mut assembler = MessageAssembler::new(1024);
        let mut stream = frames(vec![
            Frame::text("ab").with_fin(false),
            Frame::continuation("cd"),
        ]);

        let message = assembler.read_message(&mut stream).await.unwrap();
        assert_eq!(message, Message::text("abcd"));
        assert!(!assembler.is_fragmented());
    }

    #[tokio::test]
    async fn test_many_fragments_keep_first_opcode() {
        let mut assembler = MessageAssembler::new(1024);
        let mut stream = frames(vec![
            Frame::binary([1u8]).with_fin(false),
            Frame::continuation([2u8]).with_fin(false),
            Frame::continuation([3u8]).with_fin(false),
            Frame::continuation([4u8]),
            Frame::text("next"),
        ]);

        let message = assembler.read_message(&mut stream).await.unwrap();
        assert_eq!(message.opcode, OpCode::Binary);
        assert_eq!(&message.data[..], &[1, 2, 3, 4]);

        let message = assembler.read_message(&mut stream).await.unwrap();
        assert_eq!(message, Message::text("next"));
    }

    #[tokio::test]
    async fn test_fragmented_message_too_long() {
        let mut assembler = MessageAssembler::new(10);
        let mut stream = frames(vec![
            Frame::text("12345").with_fin(false),
            Frame::continuation("67890").with_fin(false),
            Frame::continuation("1"),
        ]);

        assert!(matches!(
            assembler.read_message(&mut stream).await,
            Err(WebSocketError::FragmentedMessageTooLong)
        ));
        assert!(!assembler.is_fragmented());
    }

    #[tokio::test]
    async fn test_fragmented_message_at_limit() {
        let mut assembler = MessageAssembler::new(10);
        let mut stream = frames(vec![
            Frame::text("12345").with_fin(false),
            Frame::continuation("67890"),
        ]);

        let message = assembler.read_message(&mut stream).await.unwrap();
        assert_eq!(message.data.len(), 10);
    }

    #[tokio::test]
    async fn test_invalid_fragment_opcode() {
        let mut assembler = MessageAssembler::new(1024);
        let mut stream = frames(vec![Frame::text("ab").with_fin(false), Frame::binary("cd")]);

        assert!(matches!(
            assembler.read_message(&mut stream).await,
            Err(WebSocketError::InvalidFragmentOpcode(OpCode::Binary))
        ));
    }

    #[tokio::test]
    async fn test_control_frame_inside_fragmented_message() {
        let mut assembler = MessageAssembler::new(1024);
        let mut stream = frames(vec![
            Frame::text("ab").with_fin(false),
            Frame::ping("x"),
            Frame::continuation("cd"),
        ]);

        assert!(matches!(
            assembler.read_message(&mut stream).await,
            Err(WebSocketError::InvalidFragmentOpcode(OpCode::Ping))
        ));
    }

    #[tokio::test]
    async fn test_continuation_without_start() {
        let mut assembler = MessageAssembler::new(1024);
        let mut stream = frames(vec![Frame::continuation("orphan")]);

        assert!(matches!(
            assembler.read_message(&mut stream).await,
            Err(WebSocketError::InvalidContinuationFrame)
        ));
    }

    #[tokio::test]
    async fn test_end_of_stream() {
        let mut assembler = MessageAssembler::new(1024);
        let mut stream = frames(vec![Frame::text("ab").with_fin(false)]);

        assert!(matches!(
            assembler.read_message(&mut stream).await,
            Err(WebSocketError::ConnectionClosed)
        ));
        // stays closed
        assert!(matches!(
            assembler.read_message(&mut stream).await,
            Err(WebSocketError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_stream_error_is_propagated() {
        let mut assembler = MessageAssembler::new(1024);
        let mut stream = stream::iter(vec![
            Ok(Frame::text("ab").with_fin(false)),
            Err(WebSocketError::FrameTooLarge),
            Ok(Frame::continuation("cd")),
        ]);

        assert!(matches!(
            assembler.read_message(&mut stream).await,
            Err(WebSocketError::FrameTooLarge)
        ));
        assert!(!assembler.is_fragmented());

        // the partial message does not survive the error
        assert!(matches!(
            assembler.read_message(&mut stream).await,
            Err(WebSocketError::InvalidContinuationFrame)
        ));
    }

    #[test]
    fn test_on_frame_steps() {
        let mut assembler = MessageAssembler::new(1024);

        assert!(assembler
            .on_frame(Frame::text("a").with_fin(false))
            .unwrap()
            .is_none());
        assert!(assembler.is_fragmented());
        assert!(assembler
            .on_frame(Frame::continuation("b").with_fin(false))
            .unwrap()
            .is_none());

        let message = assembler.on_frame(Frame::continuation("c")).unwrap().unwrap();
        assert_eq!(message, Message::text("abc"));
    }
}
