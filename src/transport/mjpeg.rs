use super::multipart::{multipart_delimiter, MultipartParser};
use super::{FrameStream, MjpegConnector};
use crate::error::TransportError;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, Stream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, trace};
use url::Url;

/// Reads JPEG parts from the body of a multipart response
pub struct MjpegReader {
    chunks: BoxStream<'static, Result<Bytes, TransportError>>,
    body: BytesMut,
    parser: MultipartParser,
    eof: bool,
}

impl MjpegReader {
    /// `chunks` is the raw response body; `delimiter` the `--boundary` line
    pub fn new<S, E>(chunks: S, delimiter: &str) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<TransportError>,
    {
        Self {
            chunks: chunks.map(|chunk| chunk.map_err(Into::into)).boxed(),
            body: BytesMut::new(),
            parser: MultipartParser::new(delimiter),
            eof: false,
        }
    }

    /// Next complete JPEG part; `StreamEnded` once the body is exhausted
    pub async fn next_frame(&mut self) -> Result<Bytes, TransportError> {
        loop {
            if let Some(part) = self.parser.next_part(&mut self.body)? {
                trace!("MJPEG part of {} bytes", part.len());
                return Ok(part);
            }
            if self.eof || self.parser.is_finished() {
                return Err(TransportError::StreamEnded);
            }

            match self.chunks.next().await {
                Some(chunk) => self.body.extend_from_slice(&chunk?),
                None => self.eof = true,
            }
        }
    }

    pub fn into_stream(self) -> FrameStream {
        Box::pin(futures::stream::unfold(Some(self), |reader| async move {
            let mut reader = reader?;
            match reader.next_frame().await {
                Ok(frame) => Some((Ok(frame), Some(reader))),
                Err(e) => Some((Err(e), None)),
            }
        }))
    }
}

/// Opens MJPEG streams over HTTP or HTTPS with reqwest
#[derive(Debug, Clone)]
pub struct HttpMjpegConnector {
    client: Client,
    connect_timeout: Duration,
}

impl HttpMjpegConnector {
    pub fn new(connect_timeout: Duration) -> Result<Self, TransportError> {
        // No overall request timeout: the body never ends while the camera is live
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("gatecam/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            connect_timeout,
        })
    }
}

/// Parse an MJPEG URL, accepting only `http` and `https`
pub fn stream_url(url: &str) -> Result<Url, TransportError> {
    let invalid = |reason: String| TransportError::InvalidUrl {
        url: url.to_string(),
        reason,
    };

    let parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(invalid(format!("unsupported scheme '{}'", other))),
    }
}

#[async_trait]
impl MjpegConnector for HttpMjpegConnector {
    async fn open(&self, url: &str) -> Result<FrameStream, TransportError> {
        let url = stream_url(url)?;
        debug!("Opening MJPEG stream at {}", url);

        let request = self
            .client
            .get(url.clone())
            .header(ACCEPT, "multipart/x-mixed-replace, image/jpeg")
            .header(CACHE_CONTROL, "no-cache")
            .send();
        let response = timeout(self.connect_timeout, request)
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                address: url.to_string(),
            })??;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        let delimiter = multipart_delimiter(content_type)?;
        debug!("MJPEG response accepted (delimiter {})", delimiter);

        Ok(MjpegReader::new(response.bytes_stream(), &delimiter).into_stream())
    }
}
