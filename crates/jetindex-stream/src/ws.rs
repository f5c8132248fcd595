//! WebSocket transport — subscribes to the firehose over `wss://`.
//!
//! The subscription carries the wanted collections and the optional
//! resume cursor as query parameters. Frames arrive as binary WebSocket
//! messages and are forwarded untouched; decoding happens in the
//! connector so transport and codec stay independent.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{channel::mpsc, SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::transport::{FrameStream, FrameTransport, TransportError};

/// WebSocket firehose transport.
pub struct WsTransport {
    endpoint: String,
    /// Collection NSIDs requested from the upstream (empty = everything).
    collections: Vec<String>,
}

impl WsTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            collections: vec![],
        }
    }

    /// Restrict the subscription to the given collection NSIDs.
    pub fn with_collections(mut self, collections: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.collections.extend(collections.into_iter().map(Into::into));
        self
    }

    fn subscription_url(&self, cursor: Option<u64>) -> Result<Url, TransportError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| TransportError::InvalidEndpoint(format!("{}: {e}", self.endpoint)))?;
        if !self.collections.is_empty() || cursor.is_some() {
            let mut pairs = url.query_pairs_mut();
            for collection in &self.collections {
                pairs.append_pair("wantedCollections", collection);
            }
            if let Some(cursor) = cursor {
                pairs.append_pair("cursor", &cursor.to_string());
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl FrameTransport for WsTransport {
    async fn subscribe(&self, cursor: Option<u64>) -> Result<FrameStream, TransportError> {
        let url = self.subscription_url(cursor)?;
        info!(url = %url, "connecting to firehose");

        let (ws_stream, _) =
            connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::ConnectionFailed {
                    url: self.endpoint.clone(),
                    reason: e.to_string(),
                })?;

        let (tx, rx) = mpsc::channel::<Result<Bytes, TransportError>>(512);
        tokio::spawn(run_ws_subscription(ws_stream, tx));

        Ok(Box::pin(rx))
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

// ─── Internal WebSocket loop ──────────────────────────────────────────────────

async fn run_ws_subscription(
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    mut tx: mpsc::Sender<Result<Bytes, TransportError>>,
) {
    let (mut write, mut read) = ws_stream.split();

    while let Some(msg_result) = read.next().await {
        match msg_result {
            Err(e) => {
                warn!(error = %e, "WebSocket receive error");
                let _ = tx.send(Err(TransportError::WebSocket(e.to_string()))).await;
                break;
            }
            Ok(Message::Binary(data)) => {
                if tx.send(Ok(Bytes::from(data))).await.is_err() {
                    // Receiver dropped — subscription abandoned
                    break;
                }
            }
            Ok(Message::Ping(data)) => {
                // Respond to server pings to keep the connection alive
                let _ = write.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(frame)) => {
                info!(?frame, "WebSocket closed by server");
                let _ = tx.send(Err(TransportError::Closed)).await;
                break;
            }
            Ok(other) => {
                debug!(kind = ?message_kind(&other), "ignoring non-binary message");
            }
        }
    }

    debug!("WebSocket subscription loop ended");
}

fn message_kind(msg: &Message) -> &'static str {
    match msg {
        Message::Text(_) => "text",
        Message::Binary(_) => "binary",
        Message::Ping(_) => "ping",
        Message::Pong(_) => "pong",
        Message::Close(_) => "close",
        Message::Frame(_) => "frame",
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
