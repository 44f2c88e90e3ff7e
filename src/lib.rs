//! # LAN Voice Client
//!
//! Client-side transport core of a real-time LAN voice chat.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            CLIENT PROCESS                            │
//! │                                                                      │
//! │   ┌─────────────┐      connect()/disconnect()     ┌──────────────┐   │
//! │   │ Presentation│ ──────────────────────────────▶ │  Connection  │   │
//! │   │ (bin/client)│ ◀── SessionEvents (log/state) ─ │   Manager    │   │
//! │   └─────────────┘                                 └──────┬───────┘   │
//! │                                    owns stream + devices │           │
//! │               ┌──────────────────────────────────────────┤           │
//! │               ▼                                          ▼           │
//! │   ┌──────────────────────┐                  ┌──────────────────────┐ │
//! │   │   Capture Pipeline   │                  │  Playback Pipeline   │ │
//! │   │  (network::sender)   │                  │ (network::receiver)  │ │
//! │   │ mic ─▶ Audio packets │                  │ packets ─▶ speaker   │ │
//! │   └──────────┬───────────┘                  └──────────▲───────────┘ │
//! │              │ PacketWriter (locked)                   │ read_packet │
//! └──────────────┼─────────────────────────────────────────┼─────────────┘
//!                ▼            TCP, [type:u8][len:u32 BE]   │
//!        ─────────────────────────────────────────────────────────
//!                              voice relay server
//! ```
//!
//! Teardown from any trigger (socket closed, send failure, user action,
//! process exit) funnels through [`session::VoiceClient::disconnect`], which
//! runs exactly once per session.

pub mod audio;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod session;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

    /// Default channel count (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Default frame duration in milliseconds
    pub const DEFAULT_FRAME_MS: u32 = 10;

    /// Bytes per sample on the wire (signed 16-bit PCM)
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// Default TCP port of the relay server
    pub const DEFAULT_PORT: u16 = 50000;

    /// Default connect timeout in milliseconds
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 4000;

    /// Largest payload either side accepts
    pub const MAX_PAYLOAD_SIZE: usize = 2_000_000;

    /// Packet header size: type tag + big-endian u32 length
    pub const HEADER_SIZE: usize = 5;

    /// Longest teardown waits to write the Leave packet
    pub const LEAVE_TIMEOUT_MS: u64 = 250;

    /// Input device buffer, in frames
    pub const INPUT_BUFFER_FRAMES: usize = 4;

    /// Output device buffer, in frames
    pub const OUTPUT_BUFFER_FRAMES: usize = 6;

    /// Display name used when none is configured and none can be derived
    pub const FALLBACK_NAME: &str = "lan-voice-user";
}
