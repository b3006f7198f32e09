use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::debug;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message, Utf8Bytes, error::ProtocolError};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::feed::protocol;
use crate::metrics::{self, METRICS};

type FeedStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound for the close handshake, so a dead peer cannot stall a
/// watcher on its way out.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Failure to establish a feed connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// DNS failure, refused / reset connection, handshake cut short.
    /// Expected to resolve on its own.
    #[error("feed unreachable: {0}")]
    Network(String),

    /// Malformed endpoint, HTTP-level refusal of the upgrade, TLS
    /// misconfiguration. Retrying will not help.
    #[error("connection rejected: {0}")]
    Rejected(String),
}

impl ConnectError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ConnectError::Network(_))
    }
}

/// Failure on an open session.
#[derive(Debug, Error)]
pub enum RecvError {
    /// Nothing arrived within the read timeout. Not a failure.
    #[error("no frame within {0:?}")]
    Timeout(Duration),

    /// Transport is gone; the session must be discarded.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Frame-level violation the transport cannot recover from.
    #[error("protocol failure: {0}")]
    Protocol(String),
}

impl RecvError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, RecvError::Protocol(_))
    }
}

/// A frame surfaced by [`ConnectionSession::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    Text(String),

    /// Ping / pong / binary frames. Pongs are answered by tungstenite.
    Control,
}

/// One WebSocket connection to the feed.
///
/// A session is never reused after it fails: the watcher drops it and
/// opens a fresh one. Dropping a session releases the transport.
pub struct ConnectionSession {
    endpoint: String,
    stream: Option<FeedStream>,
}

impl ConnectionSession {
    /// Connects to `endpoint` and completes the WebSocket handshake
    /// within `wait`. A handshake that does not finish in time counts
    /// as a network failure.
    pub async fn open(endpoint: &str, wait: Duration) -> Result<Self, ConnectError> {
        let (stream, _response) = timeout(wait, connect_async(endpoint))
            .await
            .map_err(|_| ConnectError::Network(format!("handshake not completed within {:?}", wait)))?
            .map_err(connect_error)?;

        metrics::incr(&METRICS.ws_connections_active);
        debug!("connected to {}", endpoint);

        Ok(Self {
            endpoint: endpoint.to_string(),
            stream: Some(stream),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Sends the subscribe frame for `topic` (`{channel}_{pair}`),
    /// giving up after `wait`.
    pub async fn subscribe(&mut self, topic: &str, wait: Duration) -> Result<(), RecvError> {
        let stream = self.stream_mut()?;
        let sub = protocol::subscribe_message(topic);

        timeout(wait, stream.send(Message::Text(Utf8Bytes::from(sub.to_string()))))
            .await
            .map_err(|_| RecvError::ConnectionLost(format!("subscribe not sent within {:?}", wait)))?
            .map_err(stream_error)
    }

    /// Waits up to `wait` for the next frame.
    pub async fn receive(&mut self, wait: Duration) -> Result<FeedMessage, RecvError> {
        let stream = self.stream_mut()?;

        match timeout(wait, stream.next()).await {
            Err(_) => Err(RecvError::Timeout(wait)),
            Ok(None) => Err(RecvError::ConnectionLost("stream ended".to_string())),
            Ok(Some(Err(e))) => Err(stream_error(e)),
            Ok(Some(Ok(Message::Text(text)))) => Ok(FeedMessage::Text(text.as_str().to_owned())),
            Ok(Some(Ok(Message::Close(frame)))) => {
                let reason = frame
                    .map(|f| f.reason.as_str().to_owned())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "no reason".to_string());
                Err(RecvError::ConnectionLost(format!("closed by server ({})", reason)))
            }
            Ok(Some(Ok(_))) => Ok(FeedMessage::Control),
        }
    }

    /// Sends a close frame and releases the transport. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            metrics::decr(&METRICS.ws_connections_active);
            let _ = timeout(CLOSE_TIMEOUT, stream.close(None)).await;
            debug!("closed connection to {}", self.endpoint);
        }
    }

    fn stream_mut(&mut self) -> Result<&mut FeedStream, RecvError> {
        self.stream
            .as_mut()
            .ok_or_else(|| RecvError::ConnectionLost("session closed".to_string()))
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        if self.stream.take().is_some() {
            metrics::decr(&METRICS.ws_connections_active);
        }
    }
}

fn connect_error(e: tungstenite::Error) -> ConnectError {
    match e {
        // Maintenance windows and rate limits answer the upgrade with
        // 5xx / 429; those clear up on their own.
        tungstenite::Error::Http(ref response) if retryable_status(response.status().as_u16()) => {
            ConnectError::Network(e.to_string())
        }
        tungstenite::Error::Io(_)
        | tungstenite::Error::ConnectionClosed
        | tungstenite::Error::AlreadyClosed
        | tungstenite::Error::Protocol(
            ProtocolError::HandshakeIncomplete | ProtocolError::ResetWithoutClosingHandshake,
        ) => ConnectError::Network(e.to_string()),
        other => ConnectError::Rejected(other.to_string()),
    }
}

fn retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

fn stream_error(e: tungstenite::Error) -> RecvError {
    match e {
        tungstenite::Error::Io(_)
        | tungstenite::Error::ConnectionClosed
        | tungstenite::Error::AlreadyClosed
        | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            RecvError::ConnectionLost(e.to_string())
        }
        other => RecvError::Protocol(other.to_string()),
    }
}
