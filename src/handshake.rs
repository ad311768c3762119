//! Server side of the WebSocket opening handshake ([RFC 6455 Section 4.2](https://datatracker.ietf.org/doc/html/rfc6455#section-4.2)).
//!
//! ```http
//! GET /board HTTP/1.1
//! Host: server.example.com
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! is answered with
//!
//! ```http
//! HTTP/1.1 101 Switching Protocols
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! ```
//!
//! A request that is not a WebSocket upgrade is an expected branch rather than an error:
//! [`ClientHandshake::try_parse`] returns `None` and the HTTP layer answers with
//! [`bad_request`].
use base64::prelude::*;
use bytes::Bytes;
use http_body_util::{Empty, Full};
use hyper::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    Response, StatusCode,
};
use sha1::{Digest, Sha1};

use crate::{Result, WebSocketError};

/// Magic string appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Type alias for the HTTP response that completes a WebSocket upgrade.
///
/// The body is always empty: once the response is written the connection stops speaking HTTP.
pub type HttpResponse = Response<Empty<Bytes>>;

/// A validated client request to switch to the WebSocket protocol.
///
/// Only lives for the duration of the handshake; all it carries is the client nonce needed to
/// compute the accept token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHandshake {
    key: String,
}

impl ClientHandshake {
    /// Checks whether `headers` describe a valid WebSocket upgrade.
    ///
    /// Header names and tokens are compared case-insensitively. All of the following must hold:
    /// - `Connection` contains the token `Upgrade`
    /// - `Upgrade` contains the token `websocket`
    /// - `Sec-WebSocket-Version` is exactly `13`
    /// - `Sec-WebSocket-Key` is present and non-empty
    ///
    /// Any other header, `Sec-WebSocket-Protocol` and `Sec-WebSocket-Extensions` included, is
    /// ignored.
    pub fn try_parse(headers: &HeaderMap) -> Option<Self> {
        if !has_token(headers, header::CONNECTION, "upgrade") {
            #[cfg(feature = "logging")]
            log::debug!("handshake rejected: no `Upgrade` token in Connection header");
            return None;
        }

        if !has_token(headers, header::UPGRADE, "websocket") {
            #[cfg(feature = "logging")]
            log::debug!("handshake rejected: no `websocket` token in Upgrade header");
            return None;
        }

        if !headers
            .get(header::SEC_WEBSOCKET_VERSION)
            .is_some_and(|version| version.as_bytes() == b"13")
        {
            #[cfg(feature = "logging")]
            log::debug!("handshake rejected: Sec-WebSocket-Version must be 13");
            return None;
        }

        let key = headers
            .get(header::SEC_WEBSOCKET_KEY)
            .and_then(|key| key.to_str().ok())
            .map(str::trim)
            .filter(|key| !key.is_empty());

        match key {
            Some(key) => Some(Self {
                key: key.to_owned(),
            }),
            None => {
                #[cfg(feature = "logging")]
                log::debug!("handshake rejected: missing Sec-WebSocket-Key");
                None
            }
        }
    }

    /// The raw `Sec-WebSocket-Key` sent by the client.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Computes the `Sec-WebSocket-Accept` value answering this handshake.
    pub fn accept(&self) -> String {
        compute_accept(&self.key)
    }
}

/// Returns `true` if any occurrence of header `name` lists `token` in its comma-separated value.
fn has_token(headers: &HeaderMap, name: HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|item| item.trim().eq_ignore_ascii_case(token))
}

/// Computes the `Sec-WebSocket-Accept` token: base64(SHA-1(`key` + [`WS_GUID`])).
///
/// ```
/// assert_eq!(
///     wsframe::handshake::compute_accept("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
pub fn compute_accept(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WS_GUID.as_bytes());
    let digest = sha1.finalize();
    BASE64_STANDARD.encode(&digest[..])
}

/// Builds the `101 Switching Protocols` response carrying `accept`.
///
/// `accept` normally comes from [`compute_accept`], which only yields base64 characters. A value
/// that is not a valid header value fails with [`WebSocketError::InvalidHandshake`].
pub fn build_success_response(accept: &str) -> Result<HttpResponse> {
    let accept = HeaderValue::from_str(accept).map_err(|_| WebSocketError::InvalidHandshake)?;

    Ok(Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::UPGRADE, "websocket")
        .header(header::CONNECTION, "Upgrade")
        .header(header::SEC_WEBSOCKET_ACCEPT, accept)
        .body(Empty::new())
        .expect("bug: failed to build response"))
}

/// Builds the `400 Bad Request` response for a request that failed negotiation.
pub fn bad_request() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Full::new(Bytes::from_static(b"Invalid WebSocket handshake")))
        .expect("bug: failed to build response")
}
