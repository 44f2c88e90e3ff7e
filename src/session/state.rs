//! Shared session flags and the connection state machine
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──Join sent──▶ Connected
//!       ▲                         │                         │
//!       │                      failure                 teardown
//!       │                         ▼                         │
//!       └──resources released── Disconnecting ◀─────────────┘
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Lifecycle of one client session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Disconnecting = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Disconnecting,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(text)
    }
}

/// Flags shared by the manager and both pipeline workers.
///
/// Each field is an independent atomic; no two need to change together.
#[derive(Debug)]
pub struct SessionState {
    running: AtomicBool,
    muted: AtomicBool,
    state: AtomicU8,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Flip `running` from true to false; only one caller ever wins
    pub(crate) fn claim_teardown(&self) -> bool {
        self.running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    /// Flip `muted`, returning the new value
    pub fn toggle_muted(&self) -> bool {
        !self.muted.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_connection_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Move `from -> to` only if the current state is `from`
    pub(crate) fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}
