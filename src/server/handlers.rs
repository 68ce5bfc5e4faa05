use axum::{
    body::Body,
    extract::{
        rejection::QueryRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::Deserialize;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::server::{ClientGuard, ServerState};

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    token: Option<String>,
}

fn token_of(query: &Result<Query<TokenQuery>, QueryRejection>) -> Option<&str> {
    query.as_ref().ok().and_then(|q| q.token.as_deref())
}

fn unauthorized(endpoint: &str) -> Response {
    warn!("Rejected {} client without a valid token", endpoint);
    (StatusCode::UNAUTHORIZED, "Authorization required").into_response()
}

/// Handler for the MJPEG stream endpoint
pub async fn mjpeg_stream_handler(
    State(state): State<ServerState>,
    query: Result<Query<TokenQuery>, QueryRejection>,
) -> Response {
    if !state.accepts(token_of(&query)) {
        return unauthorized("MJPEG");
    }

    let guard = ClientGuard::new(&state.clients);
    info!("New MJPEG stream client connected");

    let stream = async_stream::stream! {
        let _guard = guard;
        let mut frame_interval = interval(state.frame_interval);
        frame_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick = 0u64;

        loop {
            frame_interval.tick().await;
            let frame = state.library.frame_at(tick);
            tick += 1;
            trace!("Streaming frame {} ({} bytes)", frame.id, frame.len());

            let boundary = format!(
                "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nX-Frame-ID: {}\r\nX-Timestamp: {}\r\n\r\n",
                frame.len(),
                tick,
                frame.timestamp_millis()
            );

            yield Ok::<_, axum::Error>(Bytes::from(boundary));
            yield Ok(frame.data.clone());
            yield Ok(Bytes::from_static(b"\r\n"));
        }
    };

    (
        [
            (header::CONTENT_TYPE, "multipart/x-mixed-replace; boundary=frame"),
            (header::CACHE_CONTROL, "no-cache, private"),
            (header::PRAGMA, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Handler for the WebSocket frame endpoint
pub async fn ws_video_handler(
    State(state): State<ServerState>,
    query: Result<Query<TokenQuery>, QueryRejection>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if !state.accepts(token_of(&query)) {
        return unauthorized("WebSocket");
    }

    match upgrade {
        Ok(upgrade) => upgrade.on_upgrade(move |socket| push_frames(socket, state)),
        Err(rejection) => rejection.into_response(),
    }
}

/// Push one base64 text frame per tick until the client goes away
async fn push_frames(mut socket: WebSocket, state: ServerState) {
    let _guard = ClientGuard::new(&state.clients);
    info!("New WebSocket frame client connected");

    let mut frame_interval = interval(state.frame_interval);
    frame_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tick = 0u64;

    loop {
        tokio::select! {
            _ = frame_interval.tick() => {
                let frame = state.library.frame_at(tick);
                tick += 1;
                let payload = STANDARD.encode(&frame.data);
                if socket.send(Message::Text(payload)).await.is_err() {
                    debug!("WebSocket frame client went away");
                    break;
                }
            }
            message = socket.recv() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    debug!("WebSocket frame client closed after {} frames", tick);
                    break;
                }
                // Clients have nothing to say on this socket
                Some(Ok(_)) => {}
            }
        }
    }
}

/// Handler for health check endpoint
pub async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let health_info = serde_json::json!({
        "status": "healthy",
        "frames": state.library.len(),
        "frames_dir": state.library.source().display().to_string(),
        "frame_interval_ms": state.frame_interval.as_millis() as u64,
        "clients": state.client_count(),
    });

    (StatusCode::OK, Json(health_info))
}
