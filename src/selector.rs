//! Transport selection state machine for the live video view.
//!
//! The selector starts on the MJPEG transport and moves to the WebSocket
//! transport once the MJPEG stream has failed to load `failure_threshold`
//! times. The move is one-way for the lifetime of a mount. All decisions live
//! in [`transition`], a pure function, so the I/O adapter in [`crate::view`]
//! only has to feed it events and carry out the returned [`Effect`].

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;

/// MJPEG load failures before falling back to the WebSocket transport
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Transport currently feeding the frame surface.
///
/// Ordered `Mjpeg < WebSocket`; a mount's source sequence never decreases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StreamSource {
    Mjpeg,
    WebSocket,
}

impl fmt::Display for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamSource::Mjpeg => write!(f, "MJPEG"),
            StreamSource::WebSocket => write!(f, "WebSocket"),
        }
    }
}

/// Whether the WebSocket transport is open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// How MJPEG load failures accumulate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureCounting {
    /// Every failure since mount counts, rendered frames do not reset the counter
    #[default]
    Cumulative,
    /// A rendered MJPEG frame resets the counter
    Consecutive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorPolicy {
    pub failure_threshold: u32,
    pub counting: FailureCounting,
}

impl Default for SelectorPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            counting: FailureCounting::Cumulative,
        }
    }
}

/// Observable state of one mounted stream view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorState {
    pub source: StreamSource,
    pub failures: u32,
    pub connection: ConnectionState,
}

impl SelectorState {
    pub fn initial() -> Self {
        Self {
            source: StreamSource::Mjpeg,
            failures: 0,
            connection: ConnectionState::Disconnected,
        }
    }
}

impl Default for SelectorState {
    fn default() -> Self {
        Self::initial()
    }
}

/// Inputs delivered by the transports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorEvent {
    /// The MJPEG stream failed to load (connect, status, framing or EOF)
    MjpegLoadFailed,
    /// A multipart JPEG part reached the surface
    MjpegFrameRendered,
    SocketOpened,
    SocketClosed,
    SocketErrored,
    /// Text payload of one WebSocket message
    SocketMessage(String),
}

impl SelectorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SelectorEvent::MjpegLoadFailed => "mjpeg_load_failed",
            SelectorEvent::MjpegFrameRendered => "mjpeg_frame_rendered",
            SelectorEvent::SocketOpened => "socket_opened",
            SelectorEvent::SocketClosed => "socket_closed",
            SelectorEvent::SocketErrored => "socket_errored",
            SelectorEvent::SocketMessage(_) => "socket_message",
        }
    }
}

/// A validated base64 JPEG frame from the WebSocket transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePayload {
    encoded: String,
    jpeg: Vec<u8>,
}

impl FramePayload {
    /// Accepts a payload only if it is base64 of something that starts like a JPEG
    pub fn parse(raw: &str) -> Option<Self> {
        let encoded = raw.trim();
        if encoded.is_empty() {
            return None;
        }

        let jpeg = STANDARD.decode(encoded).ok()?;
        if jpeg.len() < 2 || jpeg[0] != 0xFF || jpeg[1] != 0xD8 {
            return None;
        }

        Some(Self {
            encoded: encoded.to_string(),
            jpeg,
        })
    }

    pub fn data_uri(&self) -> String {
        format!("data:image/jpeg;base64,{}", self.encoded)
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    pub fn jpeg(&self) -> &[u8] {
        &self.jpeg
    }

    pub fn into_jpeg(self) -> Vec<u8> {
        self.jpeg
    }
}

/// Side effect the adapter must carry out after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Stop the MJPEG loader and open the WebSocket
    OpenSocket,
    /// Replace the surface content with this frame
    Paint(FramePayload),
}

/// Teardown work for the transport active at unmount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    DetachMjpeg,
    CloseSocket,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: SelectorState,
    pub effect: Option<Effect>,
}

impl Transition {
    fn stay(state: &SelectorState) -> Self {
        Self {
            state: *state,
            effect: None,
        }
    }
}

/// Compute the next state for `event`.
///
/// Events that belong to the inactive transport are ignored, which keeps a
/// late MJPEG error from touching a WebSocket mount and vice versa.
pub fn transition(
    state: &SelectorState,
    policy: &SelectorPolicy,
    event: &SelectorEvent,
) -> Transition {
    match (state.source, event) {
        (StreamSource::Mjpeg, SelectorEvent::MjpegLoadFailed) => {
            let failures = state.failures.saturating_add(1);
            if failures >= policy.failure_threshold {
                Transition {
                    state: SelectorState {
                        source: StreamSource::WebSocket,
                        failures,
                        connection: ConnectionState::Disconnected,
                    },
                    effect: Some(Effect::OpenSocket),
                }
            } else {
                Transition {
                    state: SelectorState { failures, ..*state },
                    effect: None,
                }
            }
        }
        (StreamSource::Mjpeg, SelectorEvent::MjpegFrameRendered) => match policy.counting {
            FailureCounting::Cumulative => Transition::stay(state),
            FailureCounting::Consecutive => Transition {
                state: SelectorState {
                    failures: 0,
                    ..*state
                },
                effect: None,
            },
        },
        (StreamSource::WebSocket, SelectorEvent::SocketOpened) => Transition {
            state: SelectorState {
                connection: ConnectionState::Connected,
                ..*state
            },
            effect: None,
        },
        (StreamSource::WebSocket, SelectorEvent::SocketClosed)
        | (StreamSource::WebSocket, SelectorEvent::SocketErrored) => Transition {
            state: SelectorState {
                connection: ConnectionState::Disconnected,
                ..*state
            },
            effect: None,
        },
        (StreamSource::WebSocket, SelectorEvent::SocketMessage(raw)) => Transition {
            state: *state,
            effect: FramePayload::parse(raw).map(Effect::Paint),
        },
        _ => Transition::stay(state),
    }
}

/// Stateful wrapper around [`transition`] scoped to one mount
#[derive(Debug)]
pub struct StreamSelector {
    state: SelectorState,
    policy: SelectorPolicy,
    mounted: bool,
}

impl StreamSelector {
    pub fn new(policy: SelectorPolicy) -> Self {
        Self {
            state: SelectorState::initial(),
            policy,
            mounted: true,
        }
    }

    pub fn state(&self) -> SelectorState {
        self.state
    }

    pub fn source(&self) -> StreamSource {
        self.state.source
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Apply an event; after unmount every event is ignored
    pub fn handle(&mut self, event: &SelectorEvent) -> Option<Effect> {
        if !self.mounted {
            return None;
        }
        let next = transition(&self.state, &self.policy, event);
        self.state = next.state;
        next.effect
    }

    /// Returns the teardown for the active transport the first time only
    pub fn unmount(&mut self) -> Option<Teardown> {
        if !self.mounted {
            return None;
        }
        self.mounted = false;
        Some(match self.state.source {
            StreamSource::Mjpeg => Teardown::DetachMjpeg,
            StreamSource::WebSocket => Teardown::CloseSocket,
        })
    }

    /// Status text shown next to the frame surface
    pub fn status_label(&self) -> String {
        status_label(&self.state)
    }
}

impl Default for StreamSelector {
    fn default() -> Self {
        Self::new(SelectorPolicy::default())
    }
}

pub fn status_label(state: &SelectorState) -> String {
    match (state.source, state.connection) {
        (StreamSource::WebSocket, ConnectionState::Connected) => {
            "WebSocket (WS connected)".to_string()
        }
        (source, _) => source.to_string(),
    }
}
