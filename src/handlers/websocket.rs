use futures_util::sink::SinkExt;
use futures_util::stream::{SplitStream, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::time::timeout;
use warp::ws::{Message, WebSocket};

use crate::core::gateway::SharedGateway;
use crate::core::message_types::{ClientEvent, ServerEvent};
use crate::error::{RelayError, Result};

/// Close code for a socket that never authenticated
const CLOSE_UNAUTHORIZED: u16 = 4001;

// Handle a WebSocket connection from upgrade to teardown
pub async fn handle_ws_client(ws: WebSocket, gateway: SharedGateway, handshake_token: Option<String>) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    // Forward queued frames to the socket; a close frame ends the writer
    tokio::task::spawn(async move {
        let mut rx = rx;
        while let Some(message) = rx.recv().await {
            let closing = message.is_close();
            if let Err(e) = ws_tx.send(message).await {
                debug!("WebSocket send failed: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
        if let Err(e) = ws_tx.close().await {
            debug!("WebSocket close failed: {}", e);
        }
    });

    let identity = timeout(
        gateway.handshake_timeout(),
        resolve_identity(&gateway, &mut ws_rx, handshake_token),
    )
    .await
    .unwrap_or(Err(RelayError::HandshakeTimeout));

    let user_id = match identity {
        Ok(user_id) => user_id,
        Err(e) => {
            warn!("WebSocket authentication failed: {}", e);
            reject(&tx, &e);
            return;
        }
    };

    let connection = match gateway.connect(&user_id, tx.clone()).await {
        Ok(connection) => connection,
        Err(e) => {
            error!("Failed to admit connection for {}: {}", user_id, e);
            reject(&tx, &e);
            return;
        }
    };
    // From here the registry owns the outbound channel
    drop(tx);

    // Events are handled one at a time, in arrival order
    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(msg) if msg.is_text() => {
                if let Ok(text) = msg.to_str() {
                    gateway.handle_text(&connection, text).await;
                }
            }
            Ok(msg) if msg.is_close() => break,
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket error on {}: {}", connection.id, e);
                break;
            }
        }
        if connection.is_closed() {
            break;
        }
    }

    if let Err(e) = gateway.disconnect(&connection) {
        error!("Failed to clean up connection {}: {}", connection.id, e);
    }
    info!("Client disconnected: {}", connection.id);
}

/// Identity from the upgrade token, or from an `authenticate` first frame
async fn resolve_identity(
    gateway: &SharedGateway,
    ws_rx: &mut SplitStream<WebSocket>,
    handshake_token: Option<String>,
) -> Result<String> {
    if let Some(token) = handshake_token {
        return gateway.authenticate(&token).await;
    }

    let frame = next_text(ws_rx).await?;
    match ClientEvent::parse(&frame)? {
        ClientEvent::Authenticate { token } => gateway.authenticate(&token).await,
        _ => Err(RelayError::AuthError(
            "First event must be authenticate".to_string(),
        )),
    }
}

async fn next_text(ws_rx: &mut SplitStream<WebSocket>) -> Result<String> {
    while let Some(result) = ws_rx.next().await {
        let msg = result.map_err(|_| RelayError::ConnectionClosed)?;
        if msg.is_close() {
            break;
        }
        if msg.is_text() {
            return msg
                .to_str()
                .map(str::to_string)
                .map_err(|_| RelayError::MessageParseError("Invalid text frame".to_string()));
        }
    }
    Err(RelayError::ConnectionClosed)
}

fn reject(tx: &mpsc::UnboundedSender<Message>, err: &RelayError) {
    if let Ok(text) = ServerEvent::connection_error(err).to_text() {
        if tx.send(Message::text(text)).is_err() {
            return;
        }
    }
    if tx
        .send(Message::close_with(CLOSE_UNAUTHORIZED, "unauthorized"))
        .is_err()
    {
        debug!("Socket closed before rejection could be sent");
    }
}
