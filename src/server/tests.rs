use super::{FrameLibrary, StreamServer, StreamServerBuilder};
use crate::{
    config::ServerConfig,
    endpoints::StreamEndpoints,
    error::{GatecamError, ServerError, TransportError},
    events::EventBus,
    selector::{FramePayload, SelectorPolicy, StreamSource, Teardown},
    surface::{FrameSurface, SurfaceSource},
    transport::{
        Connectors, HttpMjpegConnector, MjpegConnector, SocketConnector,
        TungsteniteConnector,
    },
    view::{StreamView, ViewOptions, ViewStatus},
};
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use bytes::Bytes;
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tower::ServiceExt;

const FIRST: &[u8] = &[0xFF, 0xD8, 0x01, 0x01, 0xFF, 0xD9];
const SECOND: &[u8] = &[0xFF, 0xD8, 0x02, 0x02, 0x02, 0xFF, 0xD9];

fn server_config(accepted_tokens: Vec<String>) -> ServerConfig {
    ServerConfig {
        ip: "127.0.0.1".to_string(),
        port: 0,
        frames_dir: "./frames".to_string(),
        fps: 50,
        accepted_tokens,
    }
}

fn test_library() -> FrameLibrary {
    FrameLibrary::from_jpegs(vec![Bytes::from_static(FIRST), Bytes::from_static(SECOND)]).unwrap()
}

fn test_server(accepted_tokens: Vec<String>) -> StreamServer {
    StreamServer::new(server_config(accepted_tokens), test_library())
}

async fn spawn_server(server: StreamServer) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { server.serve(listener).await });
    addr
}

async fn wait_until(view: &StreamView, condition: impl Fn(&ViewStatus) -> bool) -> ViewStatus {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = view.status();
            if condition(&status) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("view never reached the expected status")
}

#[tokio::test]
async fn test_library_loads_sorted_jpegs() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("b.jpg"), SECOND).unwrap();
    std::fs::write(temp_dir.path().join("a.JPEG"), FIRST).unwrap();
    std::fs::write(temp_dir.path().join("notes.txt"), b"not a frame").unwrap();
    std::fs::write(temp_dir.path().join("c.jpg"), b"GIF89a").unwrap();

    let library = FrameLibrary::load(temp_dir.path()).await.unwrap();

    assert_eq!(library.len(), 2);
    assert_eq!(library.frame_at(0).data.as_ref(), FIRST);
    assert_eq!(library.frame_at(1).data.as_ref(), SECOND);
    assert_eq!(library.frame_at(2).data.as_ref(), FIRST);
}

#[tokio::test]
async fn test_library_without_frames_fails() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("readme.md"), b"empty").unwrap();

    assert!(matches!(
        FrameLibrary::load(temp_dir.path()).await,
        Err(GatecamError::Server(ServerError::NoFrames { .. }))
    ));
    assert!(FrameLibrary::from_jpegs(Vec::new()).is_err());
}

#[tokio::test]
async fn test_builder_requires_config() {
    assert!(StreamServerBuilder::new().build().await.is_err());

    let server = StreamServerBuilder::new()
        .config(server_config(Vec::new()))
        .library(test_library())
        .build()
        .await
        .unwrap();
    assert_eq!(server.address(), "127.0.0.1:0");
    assert_eq!(server.frame_interval, Duration::from_millis(20));
}

#[tokio::test]
async fn test_builder_loads_frames_dir() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("0001.jpg"), FIRST).unwrap();

    let mut config = server_config(Vec::new());
    config.frames_dir = temp_dir.path().display().to_string();
    let server = StreamServerBuilder::new().config(config).build().await.unwrap();

    assert_eq!(server.library.len(), 1);
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let router = test_server(Vec::new()).router();

    for uri in ["/video/stream", "/video/stream?token=", "/ws/video"] {
        let response = router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
    }
}

#[tokio::test]
async fn test_unlisted_token_is_unauthorized() {
    let router = test_server(vec!["secret".to_string()]).router();

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/video/stream?token=guess")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/video/stream?token=secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "multipart/x-mixed-replace; boundary=frame"
    );
}

#[tokio::test]
async fn test_health_endpoint() {
    let response = test_server(Vec::new())
        .router()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["frames"], 2);
    assert_eq!(health["clients"], 0);
}

#[tokio::test]
async fn test_mjpeg_round_trip() {
    let addr = spawn_server(test_server(Vec::new())).await;
    let connector = HttpMjpegConnector::new(Duration::from_secs(2)).unwrap();

    let mut frames = connector
        .open(&format!("http://{}/video/stream?token=t", addr))
        .await
        .unwrap();

    assert_eq!(frames.next().await.unwrap().unwrap().as_ref(), FIRST);
    assert_eq!(frames.next().await.unwrap().unwrap().as_ref(), SECOND);
    assert_eq!(frames.next().await.unwrap().unwrap().as_ref(), FIRST);
}

#[tokio::test]
async fn test_mjpeg_rejected_token() {
    let addr = spawn_server(test_server(vec!["secret".to_string()])).await;
    let connector = HttpMjpegConnector::new(Duration::from_secs(2)).unwrap();

    let result = connector
        .open(&format!("http://{}/video/stream?token=guess", addr))
        .await;

    assert!(matches!(result, Err(TransportError::HttpStatus { status: 401 })));
}

#[tokio::test]
async fn test_websocket_round_trip() {
    let addr = spawn_server(test_server(Vec::new())).await;
    let connector = TungsteniteConnector::new(Duration::from_secs(2));

    let mut socket = connector
        .connect(&format!("ws://{}/ws/video?token=t", addr))
        .await
        .unwrap();

    let first = socket.recv().await.unwrap().unwrap();
    let second = socket.recv().await.unwrap().unwrap();
    assert_eq!(FramePayload::parse(&first).unwrap().jpeg(), FIRST);
    assert_eq!(FramePayload::parse(&second).unwrap().jpeg(), SECOND);

    socket.close().await;
}

#[tokio::test]
async fn test_view_plays_mjpeg_from_server() {
    let addr = spawn_server(test_server(Vec::new())).await;
    let mjpeg_url = format!("http://{}/video/stream?token=t", addr);

    let view = StreamView::mount(
        StreamEndpoints {
            mjpeg_url: mjpeg_url.clone(),
            ws_url: format!("ws://{}/ws/video?token=t", addr),
        },
        ViewOptions::default(),
        Arc::new(FrameSurface::new()),
        Arc::new(EventBus::new(100)),
        Connectors::network(Duration::from_secs(2)).unwrap(),
    );

    let status = wait_until(&view, |s| s.frames_rendered >= 3).await;
    assert_eq!(status.source, StreamSource::Mjpeg);
    assert_eq!(status.failures, 0);
    assert_eq!(view.surface().source(), SurfaceSource::Url(mjpeg_url));

    assert_eq!(view.shutdown().await, Some(Teardown::DetachMjpeg));
}

#[tokio::test]
async fn test_view_falls_back_to_server_websocket() {
    let addr = spawn_server(test_server(Vec::new())).await;

    let view = StreamView::mount(
        StreamEndpoints {
            // No MJPEG route here: every load fails with 404
            mjpeg_url: format!("http://{}/video/unavailable?token=t", addr),
            ws_url: format!("ws://{}/ws/video?token=t", addr),
        },
        ViewOptions {
            policy: SelectorPolicy::default(),
            mjpeg_retry_delay: Duration::from_millis(10),
        },
        Arc::new(FrameSurface::new()),
        Arc::new(EventBus::new(100)),
        Connectors::network(Duration::from_secs(2)).unwrap(),
    );

    let status = wait_until(&view, |s| {
        s.connection.is_connected() && s.frames_rendered >= 2
    })
    .await;
    assert_eq!(status.source, StreamSource::WebSocket);
    assert_eq!(status.failures, 3);
    assert_eq!(status.label, "WebSocket (WS connected)");

    match view.surface().source() {
        SurfaceSource::DataUri(uri) => assert!(uri.starts_with("data:image/jpeg;base64,")),
        other => panic!("unexpected surface source {:?}", other),
    }

    assert_eq!(view.shutdown().await, Some(Teardown::CloseSocket));
}
