// ABOUTME: WebSocket connector for the machine event endpoint
// Pumps outbound frames and heartbeats, dispatches inbound frames onto the message bus

use super::bus::MessageBus;
use super::connection::{Connector, Link};
use super::error::TransportError;
use super::protocol::Frame;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{debug, error, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    heartbeat_interval: Duration,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Connector for WebSocketConnector {
    fn open(&self, url: &str) -> BoxFuture<'static, Result<Link, TransportError>> {
        let url = url.to_string();
        let heartbeat_interval = self.heartbeat_interval;

        Box::pin(async move {
            debug!("Attempting WebSocket handshake with {}", url);
            let (ws_stream, response) =
                connect_async(url.as_str())
                    .await
                    .map_err(|e| TransportError::Connect {
                        url: url.clone(),
                        reason: e.to_string(),
                    })?;
            info!("WebSocket connected to {}", url);
            debug!("WebSocket response status: {:?}", response.status());

            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let bus = MessageBus::new(outbound_tx);

            let closed = pump(ws_stream, outbound_rx, bus.clone(), heartbeat_interval);
            Ok(Link {
                bus,
                closed: Box::pin(closed),
            })
        })
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn pump(
    ws_stream: WsStream,
    mut outbound_rx: mpsc::UnboundedReceiver<Frame>,
    bus: MessageBus,
    heartbeat_interval: Duration,
) -> Result<(), TransportError> {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut ticker = tokio::time::interval(heartbeat_interval);
    ticker.tick().await; // Skip first immediate tick

    let result = loop {
        tokio::select! {
            Some(frame) = outbound_rx.recv() => {
                let json = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(e) => break Err(TransportError::Protocol(e.to_string())),
                };
                if let Err(e) = ws_sender.send(tungstenite::Message::Text(json)).await {
                    error!("Failed to send WebSocket message: {}", e);
                    break Err(TransportError::Protocol(e.to_string()));
                }
            }

            _ = ticker.tick() => {
                if let Ok(json) = serde_json::to_string(&Frame::heartbeat()) {
                    if let Err(e) = ws_sender.send(tungstenite::Message::Text(json)).await {
                        break Err(TransportError::Protocol(e.to_string()));
                    }
                    debug!("Heartbeat sent");
                }
            }

            incoming = ws_receiver.next() => match incoming {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    match serde_json::from_str::<Frame>(&text) {
                        Ok(frame) => bus.dispatch(frame),
                        Err(e) => warn!("Failed to parse frame: {}", e),
                    }
                }
                Some(Ok(tungstenite::Message::Close(_))) | None => {
                    info!("WebSocket closed by endpoint");
                    break Ok(());
                }
                Some(Ok(_)) => {
                    // Binary, Ping and Pong carry nothing for us
                }
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    break Err(TransportError::Protocol(e.to_string()));
                }
            },
        }
    };

    match &result {
        Ok(()) => bus.clear(),
        Err(e) => bus.fail_all(e),
    }
    result
}
