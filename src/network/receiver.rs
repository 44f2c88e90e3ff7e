//! Playback pipeline: the receive loop
//!
//! Single consumer of the stream. Packets are handled strictly in arrival
//! order; audio goes to the output device, server notices to the event sink.

use std::io::Read;

use crate::audio::AudioOutput;
use crate::error::ProtocolError;
use crate::protocol::{read_packet, Packet, PacketType, SystemNotice};
use crate::session::{SessionEvents, SessionState};

/// Why the receive loop returned
#[derive(Debug)]
pub enum ReceiveExit {
    /// Session stopped running
    Stopped,
    /// Peer closed the stream on a packet boundary
    EndOfStream,
    /// Read failed or the framing was violated
    Failed(ProtocolError),
}

/// Counters for one receive run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveStats {
    pub frames_played: u64,
    /// Audio payloads whose size did not match the session frame
    pub frames_rejected: u64,
    pub notices: u64,
    pub ignored: u64,
}

#[derive(Debug)]
pub struct ReceiveOutcome {
    pub exit: ReceiveExit,
    pub stats: ReceiveStats,
}

/// Text shown for a server notice
pub fn notice_line(notice: &SystemNotice) -> String {
    format!("[system] {}", notice.text)
}

fn dispatch(
    packet: Packet,
    output: &dyn AudioOutput,
    events: &dyn SessionEvents,
    frame_bytes: usize,
    stats: &mut ReceiveStats,
) {
    match packet.kind {
        PacketType::Audio if packet.payload.len() == frame_bytes => {
            let accepted = output.write_frame(&packet.payload);
            if accepted < frame_bytes {
                tracing::trace!("Output full, {} bytes dropped", frame_bytes - accepted);
            }
            stats.frames_played += 1;
        }
        PacketType::Audio => {
            tracing::debug!(
                "Dropping audio payload of {} bytes (expected {})",
                packet.payload.len(),
                frame_bytes
            );
            stats.frames_rejected += 1;
        }
        PacketType::System => {
            let notice = SystemNotice::from_payload(&packet.payload);
            events.on_log(&notice_line(&notice));
            stats.notices += 1;
        }
        PacketType::Join | PacketType::Leave | PacketType::Unknown(_) => {
            tracing::debug!("Ignoring inbound {:?} packet", packet.kind);
            stats.ignored += 1;
        }
    }
}

/// Read and dispatch packets until the stream ends, fails, or the session
/// stops running. The caller owns teardown.
pub fn run_receive<R: Read + ?Sized>(
    reader: &mut R,
    output: &dyn AudioOutput,
    events: &dyn SessionEvents,
    state: &SessionState,
    frame_bytes: usize,
) -> ReceiveOutcome {
    let mut stats = ReceiveStats::default();

    let exit = loop {
        if !state.is_running() {
            break ReceiveExit::Stopped;
        }
        match read_packet(reader) {
            Ok(Some(packet)) => dispatch(packet, output, events, frame_bytes, &mut stats),
            Ok(None) => break ReceiveExit::EndOfStream,
            Err(_) if !state.is_running() => break ReceiveExit::Stopped,
            Err(e) => break ReceiveExit::Failed(e),
        }
    };

    tracing::debug!(
        "Receive loop exited ({:?}): {} played, {} rejected, {} notices",
        exit,
        stats.frames_played,
        stats.frames_rejected,
        stats.notices
    );
    ReceiveOutcome { exit, stats }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::MockOutput;
    use crate::constants::MAX_PAYLOAD_SIZE;
    use crate::protocol::encode;
    use crate::session::{ChannelEvents, Notification};
    use std::io::Cursor;
    use std::time::Duration;

    const FRAME: usize = 320;

    fn stream_of(packets: &[(PacketType, &[u8])]) -> Cursor<Vec<u8>> {
        let mut data = Vec::new();
        for (kind, payload) in packets {
            data.extend_from_slice(&encode(*kind, payload).unwrap());
        }
        Cursor::new(data)
    }

    fn running() -> SessionState {
        let state = SessionState::new();
        state.set_running(true);
        state
    }

    #[test]
    fn test_dispatch_by_type() {
        let frame = [9u8; FRAME];
        let mut stream = stream_of(&[
            (PacketType::Audio, &frame),
            (PacketType::System, br#"{"text":"bob joined"}"#),
            (PacketType::System, b"plain notice"),
            (PacketType::Join, br#"{"room":"r1","name":"x"}"#),
            (PacketType::Leave, b""),
            (PacketType::Unknown(42), b"future"),
        ]);
        let output = MockOutput::new();
        let (events, rx) = ChannelEvents::new();
        let state = running();

        let outcome = run_receive(&mut stream, &*output, &events, &state, FRAME);

        assert!(matches!(outcome.exit, ReceiveExit::EndOfStream));
        assert_eq!(outcome.stats.frames_played, 1);
        assert_eq!(outcome.stats.notices, 2);
        assert_eq!(outcome.stats.ignored, 3);
        assert_eq!(output.next_written(Duration::ZERO).unwrap(), frame.to_vec());

        let logs: Vec<Notification> = rx.try_iter().collect();
        assert_eq!(
            logs,
            vec![
                Notification::Log("[system] bob joined".into()),
                Notification::Log("[system] plain notice".into()),
            ]
        );
    }

    #[test]
    fn test_wrong_size_audio_is_dropped_not_fatal() {
        let mut stream = stream_of(&[
            (PacketType::Audio, &[1u8; FRAME - 2]),
            (PacketType::Audio, &[2u8; FRAME + 2]),
            (PacketType::Audio, &[3u8; FRAME]),
        ]);
        let output = MockOutput::new();
        let (events, _rx) = ChannelEvents::new();
        let state = running();

        let outcome = run_receive(&mut stream, &*output, &events, &state, FRAME);

        assert!(matches!(outcome.exit, ReceiveExit::EndOfStream));
        assert_eq!(outcome.stats.frames_rejected, 2);
        assert_eq!(output.written_count(), 1);
        assert_eq!(output.next_written(Duration::ZERO).unwrap()[0], 3);
    }

    #[test]
    fn test_truncated_stream_fails() {
        let mut data = encode(PacketType::Audio, &[0u8; FRAME]).unwrap().to_vec();
        data.truncate(10);
        let output = MockOutput::new();
        let (events, _rx) = ChannelEvents::new();
        let state = running();

        let outcome = run_receive(&mut Cursor::new(data), &*output, &events, &state, FRAME);
        match outcome.exit {
            ReceiveExit::Failed(e) => assert!(e.is_violation()),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(output.written_count(), 0);
    }

    #[test]
    fn test_oversized_header_fails() {
        let mut data = vec![PacketType::Audio.tag()];
        data.extend_from_slice(&((MAX_PAYLOAD_SIZE + 1) as u32).to_be_bytes());
        let output = MockOutput::new();
        let (events, _rx) = ChannelEvents::new();
        let state = running();

        let outcome = run_receive(&mut Cursor::new(data), &*output, &events, &state, FRAME);
        assert!(matches!(
            outcome.exit,
            ReceiveExit::Failed(ProtocolError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn test_not_running_reads_nothing() {
        let mut stream = stream_of(&[(PacketType::Audio, &[0u8; FRAME])]);
        let output = MockOutput::new();
        let (events, _rx) = ChannelEvents::new();
        let state = SessionState::new();

        let outcome = run_receive(&mut stream, &*output, &events, &state, FRAME);
        assert!(matches!(outcome.exit, ReceiveExit::Stopped));
        assert_eq!(stream.position(), 0);
    }
}
