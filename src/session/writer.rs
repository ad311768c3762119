//! Write side of a WebSocket session.

use std::task::{Context, Poll};

use futures::SinkExt;

use crate::{
    frame::{Frame, OpCode},
    Result, WebSocketError,
};

/// Write half of the WebSocket connection.
///
/// [`WriteHalf`] forwards frames to the underlying framed sink and takes care of closing the
/// connection gracefully:
///
/// 1. Sending a [`OpCode::Close`] frame to the peer, unless one was already sent
/// 2. Flushing any pending frames
/// 3. Closing the underlying network stream
///
/// Frames are never masked, this crate only implements the server role.
pub(crate) struct WriteHalf {
    close_state: Option<CloseState>,
}

/// Sequential steps taken to close the connection.
enum CloseState {
    /// The `Close` frame is waiting for the sink to be ready.
    Sending(Frame),
    /// The `Close` frame was queued, pending frames are being flushed.
    Flushing,
    /// The underlying stream is being shut down.
    Closing,
    /// The connection is fully closed.
    Done,
}

impl WriteHalf {
    pub(crate) fn new() -> Self {
        Self { close_state: None }
    }

    /// Returns `true` once a close frame was queued or the stream was shut down.
    pub(crate) fn is_closing(&self) -> bool {
        self.close_state.is_some()
    }

    /// Polls the readiness of the sink to accept a new frame.
    ///
    /// Fails with [`WebSocketError::ConnectionClosed`] once a close frame was sent: nothing may
    /// follow it on the wire.
    pub(crate) fn poll_ready<S>(&mut self, stream: &mut S, cx: &mut Context<'_>) -> Poll<Result<()>>
    where
        S: futures::Sink<Frame, Error = WebSocketError> + Unpin,
    {
        if self.close_state.is_some() {
            return Poll::Ready(Err(WebSocketError::ConnectionClosed));
        }

        stream.poll_ready_unpin(cx)
    }

    /// Queues `frame` for sending. A close frame moves the connection to its closing state so
    /// that [`WriteHalf::poll_close`] does not send a second one.
    pub(crate) fn start_send<S>(&mut self, stream: &mut S, frame: Frame) -> Result<()>
    where
        S: futures::Sink<Frame, Error = WebSocketError> + Unpin,
    {
        if frame.opcode == OpCode::Close && self.close_state.is_none() {
            self.close_state = Some(CloseState::Flushing);
        }

        stream.start_send_unpin(frame)
    }

    /// Flushes every pending frame.
    pub(crate) fn poll_flush<S>(&mut self, stream: &mut S, cx: &mut Context<'_>) -> Poll<Result<()>>
    where
        S: futures::Sink<Frame, Error = WebSocketError> + Unpin,
    {
        stream.poll_flush_unpin(cx)
    }

    /// Drives the graceful shutdown: send close, flush, close the stream.
    pub(crate) fn poll_close<S>(&mut self, stream: &mut S, cx: &mut Context<'_>) -> Poll<Result<()>>
    where
        S: futures::Sink<Frame, Error = WebSocketError> + Unpin,
    {
        loop {
            match self.close_state.take() {
                None => {
                    self.close_state = Some(CloseState::Sending(Frame::close_raw(b"")));
                }
                Some(CloseState::Sending(frame)) => {
                    match stream.poll_ready_unpin(cx) {
                        Poll::Pending => {
                            self.close_state = Some(CloseState::Sending(frame));
                            break Poll::Pending;
                        }
                        Poll::Ready(res) => res?,
                    }

                    stream.start_send_unpin(frame)?;

                    self.close_state = Some(CloseState::Flushing);
                }
                Some(CloseState::Flushing) => {
                    match stream.poll_flush_unpin(cx) {
                        Poll::Pending => {
                            self.close_state = Some(CloseState::Flushing);
                            break Poll::Pending;
                        }
                        Poll::Ready(res) => res?,
                    }

                    self.close_state = Some(CloseState::Closing);
                }
                Some(CloseState::Closing) => {
                    match stream.poll_close_unpin(cx) {
                        Poll::Pending => {
                            self.close_state = Some(CloseState::Closing);
                            break Poll::Pending;
                        }
                        Poll::Ready(res) => res?,
                    }

                    self.close_state = Some(CloseState::Done);
                }
                Some(CloseState::Done) => {
                    self.close_state = Some(CloseState::Done);
                    break Poll::Ready(Ok(()));
                }
            }
        }
    }
}
