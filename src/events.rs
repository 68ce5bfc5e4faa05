use crate::error::EventBusError;
use crate::selector::StreamSource;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle events of mounted stream views
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamEvent {
    /// A view was mounted and bound to its MJPEG URL
    Mounted {
        mount_id: Uuid,
        mjpeg_url: String,
        timestamp: SystemTime,
    },
    /// One MJPEG load attempt failed
    MjpegLoadFailed {
        mount_id: Uuid,
        failures: u32,
        reason: String,
    },
    /// The view switched transports
    SourceChanged {
        mount_id: Uuid,
        from: StreamSource,
        to: StreamSource,
        timestamp: SystemTime,
    },
    /// WebSocket connection status changed
    ConnectionChanged {
        mount_id: Uuid,
        connected: bool,
        timestamp: SystemTime,
    },
    /// The view was torn down
    Unmounted { mount_id: Uuid, timestamp: SystemTime },
}

impl StreamEvent {
    pub fn mount_id(&self) -> Uuid {
        match self {
            StreamEvent::Mounted { mount_id, .. }
            | StreamEvent::MjpegLoadFailed { mount_id, .. }
            | StreamEvent::SourceChanged { mount_id, .. }
            | StreamEvent::ConnectionChanged { mount_id, .. }
            | StreamEvent::Unmounted { mount_id, .. } => *mount_id,
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            StreamEvent::Mounted { mjpeg_url, .. } => format!("Mounted on {}", mjpeg_url),
            StreamEvent::MjpegLoadFailed {
                failures, reason, ..
            } => format!("MJPEG load failed ({} so far): {}", failures, reason),
            StreamEvent::SourceChanged { from, to, .. } => {
                format!("Switched from {} to {}", from, to)
            }
            StreamEvent::ConnectionChanged { connected, .. } => format!(
                "WebSocket {}",
                if *connected {
                    "connected"
                } else {
                    "disconnected"
                }
            ),
            StreamEvent::Unmounted { .. } => "Unmounted".to_string(),
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            StreamEvent::Mounted { .. } => "mounted",
            StreamEvent::MjpegLoadFailed { .. } => "mjpeg_load_failed",
            StreamEvent::SourceChanged { .. } => "source_changed",
            StreamEvent::ConnectionChanged { .. } => "connection_changed",
            StreamEvent::Unmounted { .. } => "unmounted",
        }
    }
}

/// Broadcast bus for stream lifecycle events
pub struct EventBus {
    sender: broadcast::Sender<StreamEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new event bus with debug logging enabled
    pub fn with_debug_logging(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: true,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers, returning how many received it
    pub fn publish(&self, event: StreamEvent) -> Result<usize, EventBusError> {
        match &event {
            StreamEvent::SourceChanged { from, to, .. } => {
                warn!("Stream fell back from {} to {}", from, to);
            }
            StreamEvent::ConnectionChanged { connected, .. } => {
                if *connected {
                    info!("WebSocket stream connected");
                } else {
                    warn!("WebSocket stream disconnected");
                }
            }
            _ => {
                if self.debug_logging {
                    debug!("Event: {}", event.description());
                }
            }
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            debug_logging: self.debug_logging,
        }
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    All,
    EventTypes(Vec<&'static str>),
    /// Only events of one mounted view
    Mount(Uuid),
}

impl EventFilter {
    pub fn matches(&self, event: &StreamEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Mount(mount_id) => event.mount_id() == *mount_id,
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<StreamEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(receiver: broadcast::Receiver<StreamEvent>, filter: EventFilter, name: String) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<StreamEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { skipped: n });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}
