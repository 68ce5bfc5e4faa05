pub mod config;
pub mod endpoints;
pub mod error;
pub mod events;
pub mod frame;
pub mod logging;
pub mod selector;
pub mod session;
pub mod surface;
pub mod transport;
pub mod view;

#[cfg(feature = "server")]
pub mod server;

pub use config::GatecamConfig;
pub use endpoints::{PageOrigin, StreamEndpoints};
pub use error::{GatecamError, Result};
pub use events::{EventBus, EventFilter, EventReceiver, StreamEvent};
pub use frame::FrameData;
pub use selector::{
    status_label, transition, ConnectionState, Effect, FailureCounting, FramePayload,
    SelectorEvent, SelectorPolicy, SelectorState, StreamSelector, StreamSource, Teardown,
    Transition,
};
pub use session::{SessionEvent, SessionStore, SubscriptionId, UserId, UserRecord, UserRole};
pub use surface::{FrameSurface, SurfaceSource};
pub use transport::Connectors;
pub use view::{StreamView, ViewOptions, ViewStatus};

#[cfg(feature = "server")]
pub use server::{FrameLibrary, StreamServer, StreamServerBuilder};
