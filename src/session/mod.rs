//! Session lifecycle: shared state, notifications, and the connection manager

pub mod events;
pub mod manager;
pub mod state;

pub use events::{ChannelEvents, Notification, SessionEvents, TracingEvents};
pub use manager::{default_display_name, ConnectParams, VoiceClient};
pub use state::{ConnectionState, SessionState};
