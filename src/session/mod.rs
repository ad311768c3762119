mod upgrade;
mod writer;

use std::{
    collections::VecDeque,
    future::poll_fn,
    pin::Pin,
    task::{ready, Context, Poll},
};

use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::{
    assembler::MessageAssembler,
    codec::Codec,
    frame::{Frame, Message, OpCode},
    Options, Result, WebSocketError,
};

use writer::WriteHalf;

pub use upgrade::{HttpStream, UpgradeFut, UpgradeResult};

/// WebSocket session over a transport that already completed the opening handshake.
///
/// Reading yields complete [`Message`]s: fragments are reassembled, pings are answered with a
/// pong and a close frame from the peer is echoed back before the session reports
/// [`WebSocketError::ConnectionClosed`]. Frames and messages are written through the
/// [`futures::Sink`] implementations.
///
/// The type parameter defaults to [`HttpStream`], the connection handed over by hyper once
/// [`WebSocket::upgrade`] completes. Any `AsyncRead + AsyncWrite` transport can be wrapped with
/// [`WebSocket::from_stream`].
///
/// # Example
/// ```no_run
/// use futures::{SinkExt, StreamExt};
/// use tokio::net::TcpListener;
/// use wsframe::{Options, WebSocket};
///
/// # async fn run(listener: TcpListener) -> wsframe::Result<()> {
/// // the handshake was performed elsewhere
/// let (stream, _) = listener.accept().await?;
/// let mut ws = WebSocket::from_stream(stream, Options::default().with_utf8());
///
/// while let Some(message) = ws.next().await {
///     ws.send(message).await?;
/// }
/// # Ok(())
/// # }
/// ```
pub struct WebSocket<S = HttpStream> {
    stream: Framed<S, Codec>,
    assembler: MessageAssembler,
    writer: WriteHalf,
    /// Frames the protocol requires us to send: pongs and the close echo.
    obligated_sends: VecDeque<Frame>,
    flush_sends: bool,
    check_utf8: bool,
    is_closed: bool,
}

impl<S> WebSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a transport whose handshake already completed.
    pub fn from_stream(stream: S, options: Options) -> Self {
        let mut stream = Framed::new(stream, Codec::new(options.payload_limit()));
        if let Some(boundary) = options.max_backpressure_write_boundary {
            stream.set_backpressure_boundary(boundary);
        }

        Self {
            stream,
            assembler: MessageAssembler::new(options.message_limit()),
            writer: WriteHalf::new(),
            obligated_sends: VecDeque::new(),
            flush_sends: false,
            check_utf8: options.check_utf8,
            is_closed: false,
        }
    }

    /// Returns `true` once the peer closed the connection or a read failed.
    pub fn is_closed(&self) -> bool {
        self.is_closed
    }

    /// Polls for the next message.
    ///
    /// Pending pongs and close echoes are flushed before every read. Ping frames are answered
    /// and never returned. A close frame is echoed and ends the session with
    /// [`WebSocketError::ConnectionClosed`].
    ///
    /// Any error marks the session closed, later calls return
    /// [`WebSocketError::ConnectionClosed`].
    pub fn poll_next_message(&mut self, cx: &mut Context<'_>) -> Poll<Result<Message>> {
        loop {
            if let Err(err) = ready!(self.poll_flush_obligated(cx)) {
                self.is_closed = true;
                return Poll::Ready(Err(err));
            }

            if self.is_closed {
                return Poll::Ready(Err(WebSocketError::ConnectionClosed));
            }

            let res = ready!(self.assembler.poll_message(&mut self.stream, cx));
            match res.and_then(|message| self.on_message(message)) {
                Ok(Some(message)) => return Poll::Ready(Ok(message)),
                Ok(None) => {}
                Err(err) => {
                    #[cfg(feature = "logging")]
                    match err {
                        WebSocketError::ConnectionClosed => log::debug!("connection closed"),
                        WebSocketError::UnexpectedEof => {
                            log::warn!("connection dropped in the middle of a frame")
                        }
                        ref err => log::debug!("read failed: {err}"),
                    }
                    self.is_closed = true;
                    return Poll::Ready(Err(err));
                }
            }
        }
    }

    /// Reads the next message.
    pub async fn next_message(&mut self) -> Result<Message> {
        poll_fn(|cx| self.poll_next_message(cx)).await
    }

    /// Sends `data` as a JSON text message.
    #[cfg(feature = "json")]
    #[cfg_attr(docsrs, doc(cfg(feature = "json")))]
    pub async fn send_json<T: serde::Serialize>(&mut self, data: &T) -> Result<()> {
        let bytes = serde_json::to_vec(data)?;
        SinkExt::send(self, Frame::text(bytes)).await
    }

    /// Sends a message as several frames of at most `fragment_size` bytes each.
    ///
    /// The first frame carries `opcode`, the following ones are continuations and only the last
    /// one has `fin` set. A payload that fits in one fragment, or a `fragment_size` of zero, is
    /// sent as a single frame.
    pub async fn send_fragmented(
        &mut self,
        opcode: OpCode,
        payload: impl AsRef<[u8]>,
        fragment_size: usize,
    ) -> Result<()> {
        let payload = payload.as_ref();

        if fragment_size == 0 || payload.len() <= fragment_size {
            return SinkExt::send(self, Frame::new(true, opcode, payload)).await;
        }

        let count = payload.len().div_ceil(fragment_size);
        for (index, chunk) in payload.chunks(fragment_size).enumerate() {
            let opcode = if index == 0 {
                opcode
            } else {
                OpCode::Continuation
            };
            SinkExt::feed(&mut *self, Frame::new(index + 1 == count, opcode, chunk)).await?;
        }

        SinkExt::<Frame>::flush(self).await
    }

    fn on_message(&mut self, message: Message) -> Result<Option<Message>> {
        match message.opcode {
            OpCode::Text => {
                if self.check_utf8 && !message.is_utf8() {
                    return Err(WebSocketError::InvalidUTF8);
                }
                Ok(Some(message))
            }
            OpCode::Ping => {
                #[cfg(feature = "logging")]
                log::trace!("ping with {} bytes", message.data.len());
                if !self.writer.is_closing() {
                    self.obligated_sends.push_back(Frame::pong(&message.data));
                }
                Ok(None)
            }
            OpCode::Close => {
                self.emit_close(Frame::close_raw(&message.data));
                Ok(None)
            }
            _ => Ok(Some(message)),
        }
    }

    fn emit_close(&mut self, frame: Frame) {
        // a close we initiated is answered, not echoed
        if !self.writer.is_closing() {
            self.obligated_sends.push_back(frame);
        }
        self.is_closed = true;
    }

    fn poll_flush_obligated(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        while !self.obligated_sends.is_empty() {
            ready!(self.writer.poll_ready(&mut self.stream, cx))?;

            if let Some(next) = self.obligated_sends.pop_front() {
                self.writer.start_send(&mut self.stream, next)?;
                self.flush_sends = true;
            }
        }

        if self.flush_sends {
            ready!(self.writer.poll_flush(&mut self.stream, cx))?;
            self.flush_sends = false;
        }

        Poll::Ready(Ok(()))
    }
}

impl<S> futures::Stream for WebSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Item = Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match ready!(this.poll_next_message(cx)) {
            Ok(message) => Poll::Ready(Some(message)),
            Err(_) => Poll::Ready(None),
        }
    }
}

impl<S> futures::Sink<Frame> for WebSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Error = WebSocketError;

    fn poll_ready(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::result::Result<(), Self::Error>> {
        let this = self.get_mut();
        ready!(this.poll_flush_obligated(cx))?;
        this.writer.poll_ready(&mut this.stream, cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Frame) -> std::result::Result<(), Self::Error> {
        let this = self.get_mut();
        this.writer.start_send(&mut this.stream, item)
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::result::Result<(), Self::Error>> {
        let this = self.get_mut();
        this.writer.poll_flush(&mut this.stream, cx)
    }

    fn poll_close(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::result::Result<(), Self::Error>> {
        let this = self.get_mut();
        ready!(this.poll_flush_obligated(cx))?;
        this.writer.poll_close(&mut this.stream, cx)
    }
}

impl<S> futures::Sink<Message> for WebSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Error = WebSocketError;

    fn poll_ready(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::result::Result<(), Self::Error>> {
        futures::Sink::<Frame>::poll_ready(self, cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Message) -> std::result::Result<(), Self::Error> {
        futures::Sink::<Frame>::start_send(self, Frame::from(item))
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::result::Result<(), Self::Error>> {
        futures::Sink::<Frame>::poll_flush(self, cx)
    }

    fn poll_close(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::result::Result<(), Self::Error>> {
        futures::Sink::<Frame>::poll_close(self, cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    const KEY: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    /// Encodes a short masked frame the way a client sends it.
    fn client_frame(fin: bool, opcode: u8, payload: &[u8]) -> Vec<u8> {
        assert!(payload.len() < 126);

        let mut out = vec![(fin as u8) << 7 | opcode, 0x80 | payload.len() as u8];
        out.extend_from_slice(&KEY);

        let mut payload = payload.to_vec();
        crate::mask::apply_mask(&mut payload, KEY);
        out.extend_from_slice(&payload);
        out
    }

    fn pair(options: Options) -> (WebSocket<DuplexStream>, DuplexStream) {
        let (client, server) = duplex(4096);
        (WebSocket::from_stream(server, options), client)
    }

    async fn read_bytes(client: &mut DuplexStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        client.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_text_message() {
        let (mut ws, mut client) = pair(Options::default());
        client
            .write_all(&client_frame(true, 0x1, b"Hello"))
            .await
            .unwrap();

        let message = ws.next_message().await.unwrap();
        assert_eq!(message, Message::text("Hello"));
    }

    #[tokio::test]
    async fn test_ping_is_answered_before_next_message() {
        let (mut ws, mut client) = pair(Options::default());
        client.write_all(&client_frame(true, 0x9, b"x")).await.unwrap();
        client
            .write_all(&client_frame(true, 0x1, b"hi"))
            .await
            .unwrap();

        let message = ws.next_message().await.unwrap();
        assert_eq!(message, Message::text("hi"));

        assert_eq!(read_bytes(&mut client, 3).await, [0x8A, 0x01, b'x']);
    }

    #[tokio::test]
    async fn test_pong_is_delivered() {
        let (mut ws, mut client) = pair(Options::default());
        client
            .write_all(&client_frame(true, 0xA, b"beat"))
            .await
            .unwrap();

        let message = ws.next_message().await.unwrap();
        assert_eq!(message.opcode, OpCode::Pong);
        assert_eq!(&message.data[..], b"beat");
    }

    #[tokio::test]
    async fn test_close_is_echoed() {
        let (mut ws, mut client) = pair(Options::default());
        client
            .write_all(&client_frame(true, 0x8, &[0x03, 0xE8]))
            .await
            .unwrap();

        assert!(matches!(
            ws.next_message().await,
            Err(WebSocketError::ConnectionClosed)
        ));
        assert!(ws.is_closed());
        assert_eq!(read_bytes(&mut client, 4).await, [0x88, 0x02, 0x03, 0xE8]);

        assert!(matches!(
            ws.next_message().await,
            Err(WebSocketError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_send_after_peer_close_is_rejected() {
        let (mut ws, mut client) = pair(Options::default());
        client.write_all(&[0x88, 0x80, 0, 0, 0, 0]).await.unwrap();

        assert!(matches!(
            ws.next_message().await,
            Err(WebSocketError::ConnectionClosed)
        ));
        assert!(matches!(
            ws.send(Message::text("late")).await,
            Err(WebSocketError::ConnectionClosed)
        ));

        // closing after the echo shuts the transport down without a second close frame
        SinkExt::<Frame>::close(&mut ws).await.unwrap();

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, [0x88, 0x00]);
    }

    #[tokio::test]
    async fn test_ping_after_local_close_is_not_answered() {
        let (mut ws, mut client) = pair(Options::default());
        ws.send(Frame::close_raw(b"")).await.unwrap();
        assert_eq!(read_bytes(&mut client, 2).await, [0x88, 0x00]);

        client.write_all(&client_frame(true, 0x9, b"x")).await.unwrap();
        client.write_all(&client_frame(true, 0x8, &[])).await.unwrap();

        assert!(matches!(
            ws.next_message().await,
            Err(WebSocketError::ConnectionClosed)
        ));

        SinkExt::<Frame>::close(&mut ws).await.unwrap();
        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_fragmented_message() {
        let (mut ws, mut client) = pair(Options::default());
        client
            .write_all(&client_frame(false, 0x1, b"Hel"))
            .await
            .unwrap();
        client
            .write_all(&client_frame(true, 0x0, b"lo"))
            .await
            .unwrap();

        let message = ws.next_message().await.unwrap();
        assert_eq!(message, Message::text("Hello"));
    }

    #[tokio::test]
    async fn test_fragmented_message_over_limit() {
        let (mut ws, mut client) = pair(Options::default().with_max_message_size(4));
        client
            .write_all(&client_frame(false, 0x2, b"abc"))
            .await
            .unwrap();
        client
            .write_all(&client_frame(true, 0x0, b"de"))
            .await
            .unwrap();

        assert!(matches!(
            ws.next_message().await,
            Err(WebSocketError::FragmentedMessageTooLong)
        ));
        assert!(ws.is_closed());
    }

    #[tokio::test]
    async fn test_frame_over_payload_limit() {
        let (mut ws, mut client) = pair(Options::default().with_max_payload_read(8));
        client
            .write_all(&client_frame(true, 0x2, &[0u8; 9]))
            .await
            .unwrap();

        assert!(matches!(
            ws.next_message().await,
            Err(WebSocketError::FrameTooLarge)
        ));
    }

    #[tokio::test]
    async fn test_invalid_utf8() {
        let (mut ws, mut client) = pair(Options::default().with_utf8());
        client
            .write_all(&client_frame(true, 0x1, &[0xFF, 0xFE]))
            .await
            .unwrap();

        assert!(matches!(
            ws.next_message().await,
            Err(WebSocketError::InvalidUTF8)
        ));
    }

    #[tokio::test]
    async fn test_utf8_not_checked_by_default() {
        let (mut ws, mut client) = pair(Options::default());
        client
            .write_all(&client_frame(true, 0x1, &[0xFF, 0xFE]))
            .await
            .unwrap();

        let message = ws.next_message().await.unwrap();
        assert_eq!(&message.data[..], &[0xFF, 0xFE]);
    }

    #[tokio::test]
    async fn test_truncated_frame() {
        let (mut ws, mut client) = pair(Options::default());
        client.write_all(&[0x81, 0x85, 0x01]).await.unwrap();
        drop(client);

        assert!(matches!(
            ws.next_message().await,
            Err(WebSocketError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_clean_end_of_stream() {
        let (mut ws, client) = pair(Options::default());
        drop(client);

        assert!(matches!(
            ws.next_message().await,
            Err(WebSocketError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_stream_ends_on_close() {
        let (mut ws, mut client) = pair(Options::default());
        client.write_all(&client_frame(true, 0x2, &[1u8, 2])).await.unwrap();
        client.write_all(&client_frame(true, 0x8, &[])).await.unwrap();

        let message = ws.next().await.unwrap();
        assert_eq!(message, Message::binary(vec![1u8, 2]));
        assert!(ws.next().await.is_none());
    }

    #[tokio::test]
    async fn test_send_message_is_unmasked() {
        let (mut ws, mut client) = pair(Options::default());
        ws.send(Message::text("Hi")).await.unwrap();

        assert_eq!(read_bytes(&mut client, 4).await, [0x81, 0x02, b'H', b'i']);
    }

    #[tokio::test]
    async fn test_send_fragmented() {
        let (mut ws, mut client) = pair(Options::default());
        ws.send_fragmented(OpCode::Text, "hello", 2).await.unwrap();

        assert_eq!(
            read_bytes(&mut client, 11).await,
            [0x01, 0x02, b'h', b'e', 0x00, 0x02, b'l', b'l', 0x80, 0x01, b'o']
        );
    }

    #[tokio::test]
    async fn test_send_fragmented_single_frame() {
        let (mut ws, mut client) = pair(Options::default());
        ws.send_fragmented(OpCode::Binary, [9u8, 9], 16).await.unwrap();

        assert_eq!(read_bytes(&mut client, 4).await, [0x82, 0x02, 9, 9]);
    }

    #[tokio::test]
    async fn test_close_sends_close_frame() {
        let (mut ws, mut client) = pair(Options::default());
        SinkExt::<Frame>::close(&mut ws).await.unwrap();

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, [0x88, 0x00]);

        assert!(matches!(
            ws.send(Message::text("late")).await,
            Err(WebSocketError::ConnectionClosed)
        ));
    }

    #[cfg(feature = "json")]
    #[tokio::test]
    async fn test_send_json() {
        let (mut ws, mut client) = pair(Options::default());
        ws.send_json(&serde_json::json!({"a": 1})).await.unwrap();

        let head = read_bytes(&mut client, 2).await;
        assert_eq!(head[0], 0x81);
        let body = read_bytes(&mut client, head[1] as usize).await;
        assert_eq!(body, br#"{"a":1}"#);
    }
}
