//! A mounted live video view.
//!
//! [`StreamView`] owns one [`StreamSelector`] and the transport tasks feeding
//! it. Transport callbacks arrive as signals on channels scoped to each
//! transport instance; the driver task turns them into selector events and
//! applies the returned effects to the [`FrameSurface`].

mod driver;

use crate::config::{GatecamConfig, StreamConfig};
use crate::endpoints::StreamEndpoints;
use crate::error::Result;
use crate::events::{EventBus, StreamEvent};
use crate::selector::{
    ConnectionState, SelectorPolicy, StreamSelector, StreamSource, Teardown,
};
use crate::surface::FrameSurface;
use crate::transport::Connectors;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use driver::Driver;

#[derive(Debug, Clone, Copy)]
pub struct ViewOptions {
    pub policy: SelectorPolicy,
    /// Pause between MJPEG load attempts
    pub mjpeg_retry_delay: Duration,
}

impl ViewOptions {
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            policy: SelectorPolicy {
                failure_threshold: config.failure_threshold,
                counting: config.failure_counting,
            },
            mjpeg_retry_delay: config.mjpeg_retry_delay(),
        }
    }
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            policy: SelectorPolicy::default(),
            mjpeg_retry_delay: Duration::from_secs(1),
        }
    }
}

/// Snapshot of a view for status labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewStatus {
    pub mount_id: Uuid,
    pub source: StreamSource,
    pub connection: ConnectionState,
    pub failures: u32,
    pub frames_rendered: u64,
    pub mounted: bool,
    pub label: String,
}

pub struct StreamView {
    mount_id: Uuid,
    selector: Arc<Mutex<StreamSelector>>,
    surface: Arc<FrameSurface>,
    event_bus: Arc<EventBus>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl StreamView {
    /// Bind the surface to the MJPEG URL and start loading it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn mount(
        endpoints: StreamEndpoints,
        options: ViewOptions,
        surface: Arc<FrameSurface>,
        event_bus: Arc<EventBus>,
        connectors: Connectors,
    ) -> Self {
        let mount_id = Uuid::new_v4();
        let selector = Arc::new(Mutex::new(StreamSelector::new(options.policy)));
        let cancel = CancellationToken::new();

        surface.claim(StreamSource::Mjpeg);
        surface.bind_url(StreamSource::Mjpeg, &endpoints.mjpeg_url);
        info!("Mounted stream view {} on {}", mount_id, endpoints.mjpeg_url);
        let _ = event_bus.publish(StreamEvent::Mounted {
            mount_id,
            mjpeg_url: endpoints.mjpeg_url.clone(),
            timestamp: SystemTime::now(),
        });

        let driver = Driver {
            mount_id,
            endpoints,
            options,
            selector: Arc::clone(&selector),
            surface: Arc::clone(&surface),
            event_bus: Arc::clone(&event_bus),
            connectors,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(driver.run());

        Self {
            mount_id,
            selector,
            surface,
            event_bus,
            cancel,
            driver: Mutex::new(Some(handle)),
        }
    }

    /// Mount with network transports and endpoints derived from configuration
    pub fn from_config(
        config: &GatecamConfig,
        token: &str,
        surface: Arc<FrameSurface>,
        event_bus: Arc<EventBus>,
    ) -> Result<Self> {
        let endpoints = StreamEndpoints::from_config(config, token)?;
        Ok(Self::mount(
            endpoints,
            ViewOptions::from_config(&config.stream),
            surface,
            event_bus,
            Connectors::network(config.stream.connect_timeout())?,
        ))
    }

    pub fn mount_id(&self) -> Uuid {
        self.mount_id
    }

    pub fn surface(&self) -> &Arc<FrameSurface> {
        &self.surface
    }

    pub fn status(&self) -> ViewStatus {
        let selector = self.selector.lock();
        let state = selector.state();
        ViewStatus {
            mount_id: self.mount_id,
            source: state.source,
            connection: state.connection,
            failures: state.failures,
            frames_rendered: self.surface.frames_rendered(),
            mounted: selector.is_mounted(),
            label: selector.status_label(),
        }
    }

    /// Tear down the active transport.
    ///
    /// Returns the teardown performed on the first call and `None` afterwards.
    /// The surface is released before the transports are cancelled, so frames
    /// still in flight never reach it.
    pub fn unmount(&self) -> Option<Teardown> {
        let teardown = {
            let mut selector = self.selector.lock();
            let teardown = selector.unmount()?;
            self.surface.release();
            teardown
        };
        self.cancel.cancel();

        info!("Unmounted stream view {} ({:?})", self.mount_id, teardown);
        let _ = self.event_bus.publish(StreamEvent::Unmounted {
            mount_id: self.mount_id,
            timestamp: SystemTime::now(),
        });
        Some(teardown)
    }

    /// Unmount and wait until every transport task has finished
    pub async fn shutdown(&self) -> Option<Teardown> {
        let teardown = self.unmount();
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        teardown
    }
}

impl Drop for StreamView {
    fn drop(&mut self) {
        self.unmount();
    }
}
