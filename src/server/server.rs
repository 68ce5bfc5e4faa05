use crate::{
    config::ServerConfig,
    error::{GatecamError, Result, ServerError},
};
use axum::{routing::get, Router};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::info;

use super::frames::FrameLibrary;
use super::handlers::{health_handler, mjpeg_stream_handler, ws_video_handler};

/// Shared state for the Axum server
#[derive(Clone)]
pub struct ServerState {
    pub(crate) library: Arc<FrameLibrary>,
    pub(crate) frame_interval: Duration,
    pub(crate) accepted_tokens: Arc<Vec<String>>,
    pub(crate) clients: Arc<AtomicUsize>,
}

impl ServerState {
    /// An empty allow-list accepts any non-empty token
    pub(crate) fn accepts(&self, token: Option<&str>) -> bool {
        match token {
            Some(token) if !token.is_empty() => {
                self.accepted_tokens.is_empty() || self.accepted_tokens.iter().any(|t| t == token)
            }
            _ => false,
        }
    }

    pub(crate) fn client_count(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }
}

/// Counts a connected client for as long as it lives
pub(crate) struct ClientGuard(Arc<AtomicUsize>);

impl ClientGuard {
    pub(crate) fn new(clients: &Arc<AtomicUsize>) -> Self {
        clients.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(clients))
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Serves a looping frame library over MJPEG and WebSocket
pub struct StreamServer {
    pub(crate) config: ServerConfig,
    pub(crate) library: Arc<FrameLibrary>,
    pub(crate) frame_interval: Duration,
    clients: Arc<AtomicUsize>,
}

impl StreamServer {
    pub fn new(config: ServerConfig, library: FrameLibrary) -> Self {
        let frame_interval = Duration::from_micros(1_000_000u64 / config.fps.max(1) as u64);

        Self {
            config,
            library: Arc::new(library),
            frame_interval,
            clients: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn router(&self) -> Router {
        let state = ServerState {
            library: Arc::clone(&self.library),
            frame_interval: self.frame_interval,
            accepted_tokens: Arc::new(self.config.accepted_tokens.clone()),
            clients: Arc::clone(&self.clients),
        };

        Router::new()
            .route("/video/stream", get(mjpeg_stream_handler))
            .route("/ws/video", get(ws_video_handler))
            .route("/health", get(health_handler))
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.ip, self.config.port)
    }

    /// Number of streaming clients currently connected
    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }

    /// Bind the configured address and serve until the task is dropped
    pub async fn start(&self) -> Result<()> {
        let addr = self.address();
        info!("Starting frame server on {}", addr);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::BindFailed {
                address: addr.clone(),
                source: e,
            })?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(
                "Frame server listening on {} ({} frames at {:?} per frame)",
                addr,
                self.library.len(),
                self.frame_interval
            );
        }

        axum::serve(listener, self.router())
            .await
            .map_err(|e| ServerError::StartupFailed {
                details: format!("Server error: {}", e),
            })?;

        Ok(())
    }
}

/// Stream server builder for configuration
pub struct StreamServerBuilder {
    config: Option<ServerConfig>,
    library: Option<FrameLibrary>,
}

impl StreamServerBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            library: None,
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use these frames instead of loading `frames_dir`
    pub fn library(mut self, library: FrameLibrary) -> Self {
        self.library = Some(library);
        self
    }

    /// Build the server, loading frames from the configured directory if needed
    pub async fn build(self) -> Result<StreamServer> {
        let config = self.config.ok_or_else(|| {
            GatecamError::Server(ServerError::StartupFailed {
                details: "Server configuration is required".to_string(),
            })
        })?;

        let library = match self.library {
            Some(library) => library,
            None => FrameLibrary::load(&config.frames_dir).await?,
        };

        Ok(StreamServer::new(config, library))
    }
}

impl Default for StreamServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
