use super::ViewOptions;
use crate::endpoints::StreamEndpoints;
use crate::error::TransportError;
use crate::events::{EventBus, StreamEvent};
use crate::selector::{Effect, SelectorEvent, StreamSelector, StreamSource};
use crate::surface::FrameSurface;
use crate::transport::{Connectors, MjpegConnector, SocketConnector};
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

const SIGNAL_CAPACITY: usize = 64;

/// A transport callback on its way to the selector
#[derive(Debug)]
pub(super) struct Signal {
    event: SelectorEvent,
    detail: Option<String>,
}

impl Signal {
    fn new(event: SelectorEvent) -> Self {
        Self {
            event,
            detail: None,
        }
    }

    fn failed(event: SelectorEvent, error: &TransportError) -> Self {
        Self {
            event,
            detail: Some(error.to_string()),
        }
    }
}

pub(super) struct Driver {
    pub(super) mount_id: Uuid,
    pub(super) endpoints: StreamEndpoints,
    pub(super) options: ViewOptions,
    pub(super) selector: Arc<Mutex<StreamSelector>>,
    pub(super) surface: Arc<FrameSurface>,
    pub(super) event_bus: Arc<EventBus>,
    pub(super) connectors: Connectors,
    pub(super) cancel: CancellationToken,
}

impl Driver {
    pub(super) async fn run(self) {
        let (mjpeg_tx, mjpeg_rx) = mpsc::channel(SIGNAL_CAPACITY);
        let mjpeg_cancel = self.cancel.child_token();
        let mjpeg_task = tokio::spawn(run_mjpeg(
            Arc::clone(&self.connectors.mjpeg),
            self.endpoints.mjpeg_url.clone(),
            self.options.mjpeg_retry_delay,
            Arc::clone(&self.surface),
            mjpeg_tx,
            mjpeg_cancel.clone(),
        ));

        let mut mjpeg_rx = Some(mjpeg_rx);
        let mut socket_rx: Option<mpsc::Receiver<Signal>> = None;
        let mut socket_task = None;

        loop {
            let (from, signal) = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                signal = recv_from(&mut mjpeg_rx) => (StreamSource::Mjpeg, signal),
                signal = recv_from(&mut socket_rx) => (StreamSource::WebSocket, signal),
            };

            let Some(signal) = signal else {
                trace!("{} transport task finished", from);
                match from {
                    StreamSource::Mjpeg => mjpeg_rx = None,
                    StreamSource::WebSocket => socket_rx = None,
                }
                continue;
            };

            if self.apply(signal) {
                // MJPEG signals still queued belong to a detached transport
                mjpeg_cancel.cancel();
                mjpeg_rx = None;

                let (socket_tx, rx) = mpsc::channel(SIGNAL_CAPACITY);
                socket_rx = Some(rx);
                socket_task = Some(tokio::spawn(run_socket(
                    Arc::clone(&self.connectors.socket),
                    self.endpoints.ws_url.clone(),
                    socket_tx,
                    self.cancel.child_token(),
                )));
            }
        }

        drop(mjpeg_rx);
        drop(socket_rx);
        let _ = mjpeg_task.await;
        if let Some(task) = socket_task {
            let _ = task.await;
        }
        debug!("Stream view {} driver stopped", self.mount_id);
    }

    /// Feed one signal through the selector; true when the socket must be opened
    fn apply(&self, signal: Signal) -> bool {
        let (before, after, open_socket) = {
            let mut selector = self.selector.lock();
            if !selector.is_mounted() {
                return false;
            }
            let before = selector.state();
            let effect = selector.handle(&signal.event);

            // Surface writes happen under the selector lock so unmount can't
            // interleave between a transition and its effect
            let open_socket = match effect {
                Some(Effect::OpenSocket) => {
                    self.surface.claim(StreamSource::WebSocket);
                    true
                }
                Some(Effect::Paint(payload)) => {
                    self.surface.paint_payload(StreamSource::WebSocket, payload);
                    false
                }
                None => {
                    if let SelectorEvent::SocketMessage(_) = signal.event {
                        trace!("Dropped malformed frame payload");
                    }
                    false
                }
            };
            (before, selector.state(), open_socket)
        };

        if after.failures > before.failures && before.source == StreamSource::Mjpeg {
            let reason = signal.detail.unwrap_or_else(|| "load failed".to_string());
            let _ = self.event_bus.publish(StreamEvent::MjpegLoadFailed {
                mount_id: self.mount_id,
                failures: after.failures,
                reason,
            });
        }
        if after.source != before.source {
            let _ = self.event_bus.publish(StreamEvent::SourceChanged {
                mount_id: self.mount_id,
                from: before.source,
                to: after.source,
                timestamp: SystemTime::now(),
            });
        }
        if after.connection != before.connection {
            let _ = self.event_bus.publish(StreamEvent::ConnectionChanged {
                mount_id: self.mount_id,
                connected: after.connection.is_connected(),
                timestamp: SystemTime::now(),
            });
        }

        open_socket
    }
}

async fn recv_from(rx: &mut Option<mpsc::Receiver<Signal>>) -> Option<Signal> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Load the MJPEG stream until detached, reporting every failed load
async fn run_mjpeg(
    connector: Arc<dyn MjpegConnector>,
    url: String,
    retry_delay: Duration,
    surface: Arc<FrameSurface>,
    tx: mpsc::Sender<Signal>,
    cancel: CancellationToken,
) {
    loop {
        let failure = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            failure = load_mjpeg(connector.as_ref(), &url, &surface, &tx) => failure,
        };

        warn!("MJPEG load failed: {}", failure);
        if tx
            .send(Signal::failed(SelectorEvent::MjpegLoadFailed, &failure))
            .await
            .is_err()
        {
            break;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = sleep(retry_delay) => {}
        }
    }
    debug!("MJPEG loader detached");
}

/// One load of the MJPEG stream; returns the error that ended it
async fn load_mjpeg(
    connector: &dyn MjpegConnector,
    url: &str,
    surface: &FrameSurface,
    tx: &mpsc::Sender<Signal>,
) -> TransportError {
    let mut frames = match connector.open(url).await {
        Ok(frames) => frames,
        Err(e) => return e,
    };

    loop {
        match frames.next().await {
            Some(Ok(jpeg)) => {
                if surface.paint_jpeg(StreamSource::Mjpeg, jpeg).is_some() {
                    let _ = tx.send(Signal::new(SelectorEvent::MjpegFrameRendered)).await;
                }
            }
            Some(Err(e)) => return e,
            None => return TransportError::StreamEnded,
        }
    }
}

/// Run the frame socket; no reconnect once it closes
async fn run_socket(
    connector: Arc<dyn SocketConnector>,
    url: String,
    tx: mpsc::Sender<Signal>,
    cancel: CancellationToken,
) {
    let connected = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        result = connector.connect(&url) => result,
    };

    let mut socket = match connected {
        Ok(socket) => socket,
        Err(e) => {
            warn!("Frame socket failed to open: {}", e);
            let _ = tx.send(Signal::failed(SelectorEvent::SocketErrored, &e)).await;
            return;
        }
    };

    if tx.send(Signal::new(SelectorEvent::SocketOpened)).await.is_err() {
        socket.close().await;
        return;
    }

    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            message = socket.recv() => Some(message),
        };

        match received {
            None => {
                debug!("Closing frame socket");
                socket.close().await;
                return;
            }
            Some(Some(Ok(text))) => {
                if tx
                    .send(Signal::new(SelectorEvent::SocketMessage(text)))
                    .await
                    .is_err()
                {
                    socket.close().await;
                    return;
                }
            }
            Some(Some(Err(e))) => {
                warn!("Frame socket error: {}", e);
                let _ = tx.send(Signal::failed(SelectorEvent::SocketErrored, &e)).await;
                return;
            }
            Some(None) => {
                info!("Frame socket closed");
                let _ = tx.send(Signal::new(SelectorEvent::SocketClosed)).await;
                return;
            }
        }
    }
}
