use super::{FrameSocket, SocketConnector};
use crate::error::TransportError;
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

/// Opens `ws://` and `wss://` frame sockets with tokio-tungstenite
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    connect_timeout: Duration,
}

impl TungsteniteConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl SocketConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameSocket>, TransportError> {
        debug!("Opening frame socket at {}", url);
        let (stream, response) = timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                address: url.to_string(),
            })??;
        debug!("Frame socket upgraded (status {})", response.status());

        Ok(Box::new(TungsteniteSocket { stream }))
    }
}

pub struct TungsteniteSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FrameSocket for TungsteniteSocket {
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    debug!("Frame socket closed by peer: {:?}", frame);
                    return None;
                }
                Ok(Message::Binary(data)) => {
                    trace!("Ignoring binary message of {} bytes", data.len());
                }
                // Ping/pong replies are queued by tungstenite itself
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            trace!("Frame socket close: {}", e);
        }
    }
}
