//! WebSocket transport for the fan-out gateway.
//!
//! Accepts long-lived connections, resolves the client's role from the
//! `?token=` query parameter, and bridges the socket to the
//! transport-independent `GatewayCore`: a writer task drains the
//! client's outbound channel while the reader loop feeds inbound frames
//! to the core.

use crate::application::gateway::{GatewayAuth, GatewayCore};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

pub async fn serve(
    core: Arc<GatewayCore>,
    bind_addr: &str,
    auth: GatewayAuth,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind gateway listener on {}", bind_addr))?;
    info!("Gateway listening on {}", bind_addr);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!("Gateway connection from {}", peer);
                        let core = core.clone();
                        let auth = auth.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(core, stream, auth).await {
                                debug!("Gateway connection ended: {:#}", e);
                            }
                        });
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("Gateway listener stopped");
    Ok(())
}

async fn handle_connection(
    core: Arc<GatewayCore>,
    stream: TcpStream,
    auth: GatewayAuth,
) -> Result<()> {
    let mut token: Option<String> = None;
    let websocket = accept_hdr_async(stream, |request: &Request, response: Response| {
        token = query_param(request.uri().query(), "token");
        Ok::<Response, ErrorResponse>(response)
    })
    .await
    .context("WebSocket handshake failed")?;

    let Some(role) = auth.resolve_role(token.as_deref()) else {
        // Handshake completed but no credentials; close immediately.
        let (mut sink, _) = websocket.split();
        let _ = sink.send(Message::Close(None)).await;
        anyhow::bail!("authentication required");
    };

    let (mut sink, mut inbound) = websocket.split();
    let (client_id, mut outbound) = core.connect(Some(role)).await;

    let writer_client = client_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
        debug!("Writer for {} finished", writer_client);
    });

    while let Some(message) = inbound.next().await {
        match message {
            Ok(Message::Text(text)) => core.handle_text(&client_id, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Read error for {}: {}", client_id, e);
                break;
            }
        }
    }

    core.disconnect(&client_id).await;
    writer.abort();
    Ok(())
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    let query = query?;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}
