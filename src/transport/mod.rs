//! Live video transports.
//!
//! The stream view talks to both transports through the connector traits
//! below, so tests can script transport behavior without a network.

mod mjpeg;
pub mod multipart;
mod websocket;

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;

pub use mjpeg::{stream_url, HttpMjpegConnector, MjpegReader};
pub use websocket::{TungsteniteConnector, TungsteniteSocket};

/// JPEG parts of one MJPEG load; the first error or the end of the stream
/// ends the load
pub type FrameStream = BoxStream<'static, Result<Bytes, TransportError>>;

#[async_trait]
pub trait MjpegConnector: Send + Sync {
    /// Start one load of the MJPEG stream at `url`
    async fn open(&self, url: &str) -> Result<FrameStream, TransportError>;
}

/// An open WebSocket that delivers base64 frames as text
#[async_trait]
pub trait FrameSocket: Send {
    /// Next text payload; `None` once the peer closed the socket
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the socket
    async fn close(&mut self);
}

#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameSocket>, TransportError>;
}

/// The pair of connectors a stream view mounts with
#[derive(Clone)]
pub struct Connectors {
    pub mjpeg: Arc<dyn MjpegConnector>,
    pub socket: Arc<dyn SocketConnector>,
}

impl Connectors {
    pub fn new(mjpeg: Arc<dyn MjpegConnector>, socket: Arc<dyn SocketConnector>) -> Self {
        Self { mjpeg, socket }
    }

    /// Real network transports
    pub fn network(connect_timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            mjpeg: Arc::new(HttpMjpegConnector::new(connect_timeout)?),
            socket: Arc::new(TungsteniteConnector::new(connect_timeout)),
        })
    }
}
