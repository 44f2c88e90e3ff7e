//! Capture pipeline: microphone frames to Audio packets
//!
//! Runs on its own worker for as long as the session is running. The blocking
//! device read paces the loop at one iteration per frame; nothing here sleeps.

use std::io::Write;

use crate::audio::AudioInput;
use crate::error::{AudioError, ProtocolError};
use crate::protocol::{PacketType, PacketWriter};
use crate::session::SessionState;

/// Why the capture loop returned
#[derive(Debug)]
pub enum CaptureExit {
    /// Session stopped running
    Stopped,
    /// The stream refused a packet
    SendFailed(ProtocolError),
    /// The input device failed while the session was still running
    DeviceFailed(AudioError),
}

/// Counters for one capture run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_sent: u64,
    /// Frames drained from the device but withheld while muted
    pub frames_muted: u64,
    pub short_reads: u64,
}

#[derive(Debug)]
pub struct CaptureOutcome {
    pub exit: CaptureExit,
    pub stats: CaptureStats,
}

/// Read frames from `input` and send each full one as an Audio packet.
///
/// While muted the device is still drained every cycle so that unmuting
/// resumes with live audio rather than a backlog. Short reads are dropped.
/// The loop never stops or releases the device itself.
pub fn run_capture<W: Write>(
    input: &dyn AudioInput,
    writer: &PacketWriter<W>,
    state: &SessionState,
    frame_bytes: usize,
) -> CaptureOutcome {
    let mut frame = vec![0u8; frame_bytes];
    let mut stats = CaptureStats::default();

    let exit = loop {
        if !state.is_running() {
            break CaptureExit::Stopped;
        }

        let read = match input.read_frame(&mut frame) {
            Ok(n) => n,
            Err(_) if !state.is_running() => break CaptureExit::Stopped,
            Err(e) => break CaptureExit::DeviceFailed(e),
        };

        if read < frame_bytes {
            stats.short_reads += 1;
            continue;
        }
        if state.is_muted() {
            stats.frames_muted += 1;
            continue;
        }
        if !state.is_running() {
            break CaptureExit::Stopped;
        }

        if let Err(e) = writer.send(PacketType::Audio, &frame) {
            break CaptureExit::SendFailed(e);
        }
        stats.frames_sent += 1;
    };

    tracing::debug!(
        "Capture loop exited ({:?}): {} sent, {} muted, {} short",
        exit,
        stats.frames_sent,
        stats.frames_muted,
        stats.short_reads
    );
    CaptureOutcome { exit, stats }
}
