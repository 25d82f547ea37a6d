//! Transport boundary for the two hardware channels.
//!
//! A [`TransportConnector`] knows how to open one physical link and hand
//! back a [`FrameStream`] of text frames. The ingestor owns probing,
//! fallback and parsing; connectors only move bytes.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use lwd_config::{ControllerChannelConfig, ScaleChannelConfig};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport unavailable at {target}: {reason}")]
    Unavailable { target: String, reason: String },
    #[error("transport read failed: {0}")]
    Read(String),
    #[error("transport write failed: {0}")]
    Write(String),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// One open link. Dropping the stream releases the underlying handle.
#[async_trait]
pub trait FrameStream: Send {
    /// `Ok(None)` on orderly end of stream.
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError>;
}

#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Human-readable target for logs.
    fn describe(&self) -> String;

    async fn open(&self) -> Result<Box<dyn FrameStream>, TransportError>;
}

/// Builds connectors from channel config. The runtime holds one of these so
/// tests can swap hardware for scripted links.
pub trait ConnectorFactory: Send + Sync {
    fn controller(&self, cfg: &ControllerChannelConfig) -> Box<dyn TransportConnector>;
    fn scale(&self, cfg: &ScaleChannelConfig) -> Box<dyn TransportConnector>;
}

/// Production factory: WebSocket pub/sub for the controller, TCP lines for
/// the scale.
#[derive(Clone, Copy, Debug, Default)]
pub struct HardwareConnectors;

impl ConnectorFactory for HardwareConnectors {
    fn controller(&self, cfg: &ControllerChannelConfig) -> Box<dyn TransportConnector> {
        Box::new(PubSubConnector::new(cfg.url.clone(), cfg.topic.clone()))
    }

    fn scale(&self, cfg: &ScaleChannelConfig) -> Box<dyn TransportConnector> {
        Box::new(LineStreamConnector::new(cfg.address.clone()))
    }
}

// ---------------------------------------------------------------------------
// Controller: WebSocket pub/sub
// ---------------------------------------------------------------------------

/// Connects to a pub/sub broker over WebSocket and subscribes to one topic.
#[derive(Clone, Debug)]
pub struct PubSubConnector {
    url: String,
    topic: String,
}

impl PubSubConnector {
    pub fn new(url: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            topic: topic.into(),
        }
    }

    fn subscribe_message(&self) -> String {
        serde_json::json!({ "action": "subscribe", "topic": self.topic }).to_string()
    }
}

#[async_trait]
impl TransportConnector for PubSubConnector {
    fn describe(&self) -> String {
        format!("{} [{}]", self.url, self.topic)
    }

    async fn open(&self) -> Result<Box<dyn FrameStream>, TransportError> {
        let (mut ws, _resp) =
            connect_async(self.url.as_str())
                .await
                .map_err(|e| TransportError::Unavailable {
                    target: self.describe(),
                    reason: e.to_string(),
                })?;

        ws.send(Message::Text(self.subscribe_message()))
            .await
            .map_err(|e| TransportError::Write(e.to_string()))?;

        Ok(Box::new(PubSubStream { ws }))
    }
}

struct PubSubStream {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FrameStream for PubSubStream {
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.ws.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(TransportError::Read(e.to_string())),
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => {
                        tracing::trace!("dropping non-utf8 binary frame");
                    }
                },
                Some(Ok(Message::Close(_))) => return Ok(None),
                // Ping/pong and raw frames carry no readings.
                Some(Ok(_)) => {}
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Scale: TCP line stream
// ---------------------------------------------------------------------------

/// Reads newline-delimited text from a serial-to-TCP bridge.
#[derive(Clone, Debug)]
pub struct LineStreamConnector {
    address: String,
}

impl LineStreamConnector {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl TransportConnector for LineStreamConnector {
    fn describe(&self) -> String {
        self.address.clone()
    }

    async fn open(&self) -> Result<Box<dyn FrameStream>, TransportError> {
        let stream =
            TcpStream::connect(self.address.as_str())
                .await
                .map_err(|e| TransportError::Unavailable {
                    target: self.describe(),
                    reason: e.to_string(),
                })?;
        Ok(Box::new(LineStream {
            lines: BufReader::new(stream).lines(),
        }))
    }
}

struct LineStream {
    lines: Lines<BufReader<TcpStream>>,
}

#[async_trait]
impl FrameStream for LineStream {
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Ok(Some(line.trim_end_matches('\r').to_string())),
                Ok(None) => return Ok(None),
                Err(e) => return Err(TransportError::Read(e.to_string())),
            }
        }
    }
}
