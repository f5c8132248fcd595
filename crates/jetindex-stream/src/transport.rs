//! `FrameTransport` trait — abstraction over the firehose subscription.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur at the transport level.
///
/// Transport errors are never fatal to the indexer: the connector
/// reconnects with backoff and resumes from the last persisted cursor.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The peer closed the stream unexpectedly (distinct from the stream
    /// simply ending).
    #[error("stream closed unexpectedly")]
    Closed,
}

/// A stream of raw binary frames from one subscription.
///
/// Yields `Err` for transport failures; the stream ending (`None`) is a
/// clean end, signaled distinctly from close/error.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Abstracts over firehose transports so tests can script delivery.
#[async_trait]
pub trait FrameTransport: Send + Sync {
    /// Open a subscription starting from `cursor` (`None` = live tail).
    async fn subscribe(&self, cursor: Option<u64>) -> Result<FrameStream, TransportError>;

    /// The endpoint this transport connects to (for logging).
    fn endpoint(&self) -> &str;
}
