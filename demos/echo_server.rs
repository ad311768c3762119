//! A WebSocket echo server built on wsframe and hyper.
//! This server accepts WebSocket connections and echoes back any text or binary messages it receives.

use futures::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::{
    body::{Bytes, Incoming},
    server::conn::http1,
    service::service_fn,
    Request, Response,
};
use tokio::net::TcpListener;
use wsframe::{handshake, OpCode, Options, WebSocket, WebSocketError};

/// Handles an individual WebSocket client connection by echoing back any received messages.
async fn handle_client(fut: wsframe::UpgradeFut) -> wsframe::Result<()> {
    let mut ws = fut.await?;

    while let Some(message) = ws.next().await {
        if matches!(message.opcode, OpCode::Text | OpCode::Binary) {
            ws.send(message).await?;
        }
    }

    log::debug!("Client disconnected");

    Ok(())
}

/// Upgrades an HTTP connection to a WebSocket connection, answering `400` when the request is not
/// a valid upgrade.
async fn server_upgrade(mut req: Request<Incoming>) -> wsframe::Result<Response<Full<Bytes>>> {
    let options = Options::default()
        .with_utf8()
        .with_max_payload_read(16 * 1024 * 1024)
        .with_max_message_size(32 * 1024 * 1024);

    let (response, fut) = match WebSocket::upgrade_with_options(&mut req, options) {
        Ok(upgrade) => upgrade,
        Err(WebSocketError::InvalidHandshake) => return Ok(handshake::bad_request()),
        Err(err) => return Err(err),
    };

    tokio::task::spawn(async move {
        if let Err(e) = handle_client(fut).await {
            log::error!("Error in websocket connection: {}", e);
        }
    });

    Ok(response.map(|_| Full::new(Bytes::new())))
}

/// Initializes logging and starts listening for WebSocket connections on port 8080.
/// Each client connection is handled in a separate task.
#[tokio::main]
async fn main() -> wsframe::Result<()> {
    simple_logger::init_with_level(log::Level::Debug).expect("log");

    let listener = TcpListener::bind("0.0.0.0:8080").await?;
    log::debug!("Listening on {}", listener.local_addr()?);

    loop {
        let (stream, _) = listener.accept().await?;
        log::info!("Client connected");

        tokio::spawn(async move {
            let io = hyper_util::rt::TokioIo::new(stream);
            let conn_fut = http1::Builder::new()
                .serve_connection(io, service_fn(server_upgrade))
                .with_upgrades();
            if let Err(e) = conn_fut.await {
                log::error!("An error occurred: {:?}", e);
            }
        });
    }
}
