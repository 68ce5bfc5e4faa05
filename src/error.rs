use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatecamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("System error: {message}")]
    System { message: String },
}

impl GatecamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }
}

/// Failures while establishing or reading a live video transport
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Unsupported URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Connection to {address} timed out")]
    ConnectTimeout { address: String },

    #[error("Unexpected HTTP status {status}")]
    HttpStatus { status: u16 },

    #[error("Response is not a multipart stream (content type: {content_type})")]
    NotMultipart { content_type: String },

    #[error("Malformed response: {details}")]
    Malformed { details: String },

    #[error("Stream ended")]
    StreamEnded,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Authorization required")]
    NotAuthenticated,

    #[error("Failed to persist session to {path}: {details}")]
    Storage { path: String, details: String },
}

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event receiver lagged behind by {skipped} events")]
    Lagged { skipped: u64 },

    #[error("Event channel closed")]
    ChannelClosed,
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server startup failed: {details}")]
    StartupFailed { details: String },

    #[error("No JPEG frames found in {dir}")]
    NoFrames { dir: String },
}

pub type Result<T> = std::result::Result<T, GatecamError>;
