//! # wsframe
//! Server side of the WebSocket protocol (RFC 6455): the opening handshake, a frame codec with
//! masking, reassembly of fragmented messages and a session that answers control frames.
//!
//! The crate is layered so that each piece can be used on its own:
//!
//! - [`handshake`]: validates an HTTP upgrade request and computes the `Sec-WebSocket-Accept`
//!   token.
//! - [`codec`]: a [`tokio_util::codec`] decoder and encoder turning bytes into [`Frame`]s and back.
//! - [`assembler`]: turns a stream of frames into complete [`Message`]s.
//! - [`WebSocket`]: the session tying everything together over any `AsyncRead + AsyncWrite`
//!   transport, usually a connection upgraded by hyper.
//!
//! # Features
//! The crate provides several optional features that can be enabled in your `Cargo.toml`:
//!
//! - `logging`: Enables debug logging for handshake negotiation and frame processing using the
//!   `log` crate.
//!
//! - `simd`: Uses `simdutf8` to validate text payloads.
//!
//! - `json`: Enables sending JSON values with [`WebSocket::send_json`].
//!
//! # Server Example
//! ```rust
//! use futures::{SinkExt, StreamExt};
//! use http_body_util::Empty;
//! use hyper::{body::{Bytes, Incoming}, Request, Response};
//! use wsframe::{OpCode, WebSocket};
//!
//! async fn server_upgrade(
//!     mut req: Request<Incoming>,
//! ) -> wsframe::Result<Response<Empty<Bytes>>> {
//!     let (response, fut) = WebSocket::upgrade(&mut req)?;
//!
//!     tokio::spawn(async move {
//!         if let Ok(mut ws) = fut.await {
//!             while let Some(message) = ws.next().await {
//!                 if matches!(message.opcode, OpCode::Text | OpCode::Binary) {
//!                     let _ = ws.send(message).await;
//!                 }
//!             }
//!         }
//!     });
//!
//!     Ok(response)
//! }
//! ```
//!
//! # Memory Safety
//! - Maximum payload size of a single frame (configurable, default 1 MiB)
//! - Maximum size of a fragmented message (configurable, default 2 MiB)
//! - Optional UTF-8 validation for text messages

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod assembler;
pub mod codec;
pub mod frame;
pub mod handshake;
mod mask;
mod options;
mod session;

use thiserror::Error;

pub use frame::{Frame, Message, OpCode};
pub use options::*;
pub use session::{HttpStream, UpgradeFut, UpgradeResult, WebSocket};

/// A result type for WebSocket operations, using `WebSocketError` as the error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Represents errors that can occur during WebSocket operations.
///
/// Every error returned while reading is terminal for the session: the partially read message is
/// dropped and the connection should be discarded.
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// Returned when attempting to perform operations on a closed WebSocket connection, or when
    /// the transport ended cleanly on a frame boundary.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// The transport ended in the middle of a frame.
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// A frame other than a continuation was received while a fragmented message was in
    /// progress. Control frames are not accepted between fragments.
    #[error("Invalid fragment opcode: {0:?}")]
    InvalidFragmentOpcode(OpCode),

    /// The accumulated size of a fragmented message exceeded the configured limit.
    #[error("Fragmented message too long")]
    FragmentedMessageTooLong,

    /// A continuation frame was received without a preceding initial frame.
    #[error("Invalid continuation frame")]
    InvalidContinuationFrame,

    /// Occurs when a received frame's payload length exceeds the maximum configured size.
    /// This helps prevent memory exhaustion attacks.
    #[error("Frame too large")]
    FrameTooLarge,

    /// The value does not fit in the 4-bit opcode field.
    #[error("Invalid opcode: {0}")]
    InvalidOpCode(u8),

    /// Indicates that a text message contains invalid UTF-8 data.
    #[error("Invalid UTF-8")]
    InvalidUTF8,

    /// The HTTP request is not a valid WebSocket upgrade.
    #[error("Invalid WebSocket handshake")]
    InvalidHandshake,

    /// Wraps standard I/O errors that may occur during WebSocket communication,
    /// such as connection resets or network timeouts.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Wraps errors from the hyper HTTP library that may occur during the upgrade.
    #[error(transparent)]
    HTTPError(#[from] hyper::Error),

    /// Wraps errors that occur during JSON serialization.
    /// Only available when the `json` feature is enabled.
    #[cfg(feature = "json")]
    #[cfg_attr(docsrs, doc(cfg(feature = "json")))]
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
