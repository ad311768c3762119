//! Server upgrade glue between hyper and [`WebSocket`].

use std::{
    future::Future,
    pin::Pin,
    task::{ready, Context, Poll},
};

use hyper::{upgrade::Upgraded, Request};
use hyper_util::rt::TokioIo;
use pin_project::pin_project;

use crate::{
    handshake::{build_success_response, ClientHandshake, HttpResponse},
    Options, Result, WebSocket, WebSocketError,
};

/// Connection handed over by hyper once the `101 Switching Protocols` response was written.
pub type HttpStream = TokioIo<Upgraded>;

/// Result of [`WebSocket::upgrade`]: the response to send back, and a future resolving to the
/// session once hyper hands the connection over.
pub type UpgradeResult = Result<(HttpResponse, UpgradeFut)>;

impl WebSocket<HttpStream> {
    /// Upgrades an HTTP connection to a WebSocket one with default [`Options`].
    ///
    /// The returned response must be sent to the client before the [`UpgradeFut`] can resolve.
    pub fn upgrade<B>(request: impl std::borrow::BorrowMut<Request<B>>) -> UpgradeResult {
        Self::upgrade_with_options(request, Options::default())
    }

    /// Attempts to upgrade an incoming `hyper::Request` to a WebSocket connection.
    ///
    /// Fails with [`WebSocketError::InvalidHandshake`] if the request is not a valid WebSocket
    /// upgrade, in which case the caller should answer with
    /// [`bad_request`](crate::handshake::bad_request).
    pub fn upgrade_with_options<B>(
        mut request: impl std::borrow::BorrowMut<Request<B>>,
        options: Options,
    ) -> UpgradeResult {
        let request = request.borrow_mut();

        let handshake =
            ClientHandshake::try_parse(request.headers()).ok_or(WebSocketError::InvalidHandshake)?;

        #[cfg(feature = "logging")]
        log::debug!("accepting websocket upgrade on {}", request.uri());

        let response = build_success_response(&handshake.accept())?;

        let fut = UpgradeFut {
            inner: hyper::upgrade::on(request),
            options: Some(options),
        };

        Ok((response, fut))
    }
}

/// Future resolving to a [`WebSocket`] once hyper completes the connection upgrade.
#[pin_project]
#[derive(Debug)]
pub struct UpgradeFut {
    #[pin]
    inner: hyper::upgrade::OnUpgrade,
    options: Option<Options>,
}

impl Future for UpgradeFut {
    type Output = Result<WebSocket<HttpStream>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let upgraded = ready!(this.inner.poll(cx))?;

        let options = this
            .options
            .take()
            .expect("bug: UpgradeFut polled after completion");

        Poll::Ready(Ok(WebSocket::from_stream(TokioIo::new(upgraded), options)))
    }
}
