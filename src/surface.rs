use crate::frame::FrameData;
use crate::selector::{FramePayload, StreamSource};
use bytes::Bytes;
use parking_lot::RwLock;
use std::time::SystemTime;
use tokio::sync::watch;
use tracing::trace;

/// What the surface is currently pointed at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceSource {
    Empty,
    /// A streaming URL the surface renders natively (MJPEG)
    Url(String),
    /// An inline `data:image/jpeg;base64,...` frame
    DataUri(String),
}

impl SurfaceSource {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SurfaceSource::Empty => None,
            SurfaceSource::Url(url) => Some(url),
            SurfaceSource::DataUri(uri) => Some(uri),
        }
    }
}

#[derive(Debug)]
struct SurfaceInner {
    owner: Option<StreamSource>,
    source: SurfaceSource,
    latest: Option<FrameData>,
    frames_rendered: u64,
}

/// The single render target of a stream view.
///
/// Only the transport that currently owns the surface may write to it; writes
/// tagged with any other source are dropped. Frames overwrite each other, the
/// latest one wins.
#[derive(Debug)]
pub struct FrameSurface {
    inner: RwLock<SurfaceInner>,
    updates: watch::Sender<u64>,
}

impl FrameSurface {
    pub fn new() -> Self {
        let (updates, _) = watch::channel(0);
        Self {
            inner: RwLock::new(SurfaceInner {
                owner: None,
                source: SurfaceSource::Empty,
                latest: None,
                frames_rendered: 0,
            }),
            updates,
        }
    }

    /// Hand exclusive write access to `owner`
    pub fn claim(&self, owner: StreamSource) {
        trace!("Surface claimed by {}", owner);
        self.inner.write().owner = Some(owner);
    }

    /// Drop the current owner; every later write is ignored until the next claim
    pub fn release(&self) {
        self.inner.write().owner = None;
    }

    pub fn owner(&self) -> Option<StreamSource> {
        self.inner.read().owner
    }

    /// Point the surface at a streaming URL
    pub fn bind_url(&self, owner: StreamSource, url: &str) -> bool {
        let mut inner = self.inner.write();
        if inner.owner != Some(owner) {
            return false;
        }
        inner.source = SurfaceSource::Url(url.to_string());
        true
    }

    /// Render one multipart JPEG part; the bound URL stays as the source
    pub fn paint_jpeg(&self, owner: StreamSource, jpeg: Bytes) -> Option<u64> {
        self.paint(owner, jpeg, None)
    }

    /// Render a WebSocket frame; the source becomes its data URI
    pub fn paint_payload(&self, owner: StreamSource, payload: FramePayload) -> Option<u64> {
        let uri = payload.data_uri();
        self.paint(owner, Bytes::from(payload.into_jpeg()), Some(uri))
    }

    fn paint(&self, owner: StreamSource, jpeg: Bytes, data_uri: Option<String>) -> Option<u64> {
        let frame_id = {
            let mut inner = self.inner.write();
            if inner.owner != Some(owner) {
                trace!("Dropping frame from inactive {} transport", owner);
                return None;
            }
            inner.frames_rendered += 1;
            let frame_id = inner.frames_rendered;
            if let Some(uri) = data_uri {
                inner.source = SurfaceSource::DataUri(uri);
            }
            inner.latest = Some(FrameData::new(frame_id, SystemTime::now(), jpeg));
            frame_id
        };

        self.updates.send_replace(frame_id);
        Some(frame_id)
    }

    pub fn source(&self) -> SurfaceSource {
        self.inner.read().source.clone()
    }

    pub fn latest_frame(&self) -> Option<FrameData> {
        self.inner.read().latest.clone()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.inner.read().frames_rendered
    }

    /// Watch the id of the most recently rendered frame
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.updates.subscribe()
    }
}

impl Default for FrameSurface {
    fn default() -> Self {
        Self::new()
    }
}
