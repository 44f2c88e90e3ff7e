//! Notifications from the session core to the presentation layer
//!
//! Workers call the sink from their own threads. A sink that drives a UI must
//! marshal onto its own thread; [`ChannelEvents`] does that by turning every
//! call into a message for a single consumer.

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Receiver of user-facing session notifications
pub trait SessionEvents: Send + Sync {
    /// A line for the user's log view
    fn on_log(&self, text: &str);

    fn on_connection_state_changed(&self, connected: bool);
}

/// Notification as a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Log(String),
    ConnectionStateChanged(bool),
}

/// Forwards notifications into a channel
#[derive(Debug, Clone)]
pub struct ChannelEvents {
    tx: Sender<Notification>,
}

impl ChannelEvents {
    pub fn new() -> (Self, Receiver<Notification>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl SessionEvents for ChannelEvents {
    fn on_log(&self, text: &str) {
        // Consumer gone means nobody is watching; nothing to do
        let _ = self.tx.send(Notification::Log(text.to_string()));
    }

    fn on_connection_state_changed(&self, connected: bool) {
        let _ = self.tx.send(Notification::ConnectionStateChanged(connected));
    }
}

/// Writes notifications to the tracing subscriber
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEvents;

impl SessionEvents for TracingEvents {
    fn on_log(&self, text: &str) {
        tracing::info!(target: "lan_voice_client::events", "{}", text);
    }

    fn on_connection_state_changed(&self, connected: bool) {
        tracing::info!(target: "lan_voice_client::events", connected, "connection state changed");
    }
}
