//! WebSocket synchronization server.
//!
//! One task reads each connection's frames and routes them through the
//! [`Hub`]; a second task drains the connection's outbound channel into the
//! socket, so broadcasting never waits on a slow client.

mod hub;
mod registry;
mod session;

pub use hub::{Hub, HubConfig};
pub use registry::Registry;
pub use session::{Session, SessionState};

use futures_util::{SinkExt, StreamExt};
use gridsync_core::backend::Backend;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use crate::error::{Result, ServerError};
use crate::protocol;

/// Parse `addr` and bind a TCP listener on it.
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let parsed: SocketAddr = addr.parse().map_err(|source| ServerError::InvalidBindAddress {
        addr: addr.to_string(),
        source,
    })?;
    TcpListener::bind(parsed)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })
}

/// Accept connections until the listener fails.
pub async fn serve<B: Backend>(listener: TcpListener, hub: Hub<B>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "listening");
    }
    loop {
        let (stream, peer) = listener.accept().await?;
        let hub = hub.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(hub, stream, peer).await {
                warn!(%peer, "connection ended with error: {}", err);
            }
        });
    }
}

async fn handle_connection<B: Backend>(
    hub: Hub<B>,
    stream: TcpStream,
    peer: SocketAddr,
) -> std::result::Result<(), tungstenite::Error> {
    let socket = tokio_tungstenite::accept_async(stream).await?;
    debug!(%peer, "websocket handshake complete");
    let (mut sink, mut frames) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = hub.connect(tx);

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match protocol::encode(&message) {
                Ok(text) => text,
                Err(err) => {
                    warn!(kind = message.kind(), "failed to encode message: {}", err);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut result = Ok(());
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Message::Text(text)) => hub.handle_text(&mut session, text.as_str()).await,
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => {
                warn!(connection = %session.id, "ignoring binary frame");
            }
            // Ping/pong are answered by tungstenite.
            Ok(_) => {}
            Err(err) => {
                result = Err(err);
                break;
            }
        }
    }

    // Dropping the registry entry closes the channel and ends the writer.
    hub.disconnect(&mut session);
    let _ = writer.await;
    result
}
