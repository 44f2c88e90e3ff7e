//! Connection manager
//!
//! Owns the stream and both devices for one session at a time. The pipeline
//! workers only borrow them; closing is done here, once, by [`VoiceClient::disconnect`].
//!
//! Blocked workers are never interrupted directly. Teardown stops the devices
//! and shuts the socket down, which makes their blocking calls return, and
//! they exit on seeing `running == false`.

use parking_lot::Mutex;
use std::fmt;
use std::io::BufReader;
use std::net::TcpStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::{AudioBackend, AudioInput, AudioOutput};
use crate::config::{AudioConfig, ClientConfig};
use crate::constants::{FALLBACK_NAME, LEAVE_TIMEOUT_MS};
use crate::error::{Error, NetworkError, Result};
use crate::network::{
    normalize_host, run_capture, run_receive, CaptureExit, ReceiveExit, Transport,
};
use crate::protocol::{JoinRequest, PacketType};
use crate::session::events::SessionEvents;
use crate::session::state::{ConnectionState, SessionState};

/// Where to connect and who to join as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub room: String,
    pub name: String,
    pub timeout: Duration,
}

impl ConnectParams {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        room: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let (host, room, name): (String, String, String) = (host.into(), room.into(), name.into());
        let name = match name.trim() {
            "" => default_display_name(),
            trimmed => trimmed.to_string(),
        };
        Self {
            host: host.trim().to_string(),
            port,
            room: room.trim().to_string(),
            name,
            timeout: Duration::from_millis(crate::constants::DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.server.host.clone(),
            config.server.port,
            config.session.room.clone(),
            config.session.name.clone(),
        )
        .with_timeout(config.server.connect_timeout())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.host.is_empty() {
            return Err("host is empty".into());
        }
        if self.room.is_empty() {
            return Err("room is empty".into());
        }
        if self.port == 0 {
            return Err("port must be non-zero".into());
        }
        Ok(())
    }
}

/// User or machine name from the environment, for sessions without a name
pub fn default_display_name() -> String {
    ["USER", "USERNAME", "HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| FALLBACK_NAME.to_string())
}

const LEAVE_TIMEOUT: Duration = Duration::from_millis(LEAVE_TIMEOUT_MS);

/// Everything a session holds open
#[derive(Default)]
struct SessionResources {
    transport: Option<Arc<Transport>>,
    input: Option<Arc<dyn AudioInput>>,
    output: Option<Arc<dyn AudioOutput>>,
    workers: Vec<JoinHandle<()>>,
}

fn best_effort<E: fmt::Display>(step: &str, result: std::result::Result<(), E>) {
    if let Err(e) = result {
        tracing::debug!("Teardown step '{}' failed: {}", step, e);
    }
}

struct Inner {
    audio: AudioConfig,
    backend: Arc<dyn AudioBackend>,
    events: Arc<dyn SessionEvents>,
    state: SessionState,
    resources: Mutex<Option<SessionResources>>,
}

impl Inner {
    /// Close everything in `session`; every step runs even if an earlier one failed
    fn release(&self, session: SessionResources) {
        let SessionResources {
            transport,
            input,
            output,
            workers,
        } = session;

        // A capture worker stuck writing to a stalled peer holds the writer;
        // skip the Leave rather than wait on it, the shutdown below frees it
        if let Some(transport) = &transport {
            best_effort("bound writes", transport.set_write_timeout(Some(LEAVE_TIMEOUT)));
            best_effort(
                "send leave",
                transport.send_within(PacketType::Leave, &[], LEAVE_TIMEOUT),
            );
        }

        if let Some(input) = &input {
            best_effort("stop input", input.stop());
            best_effort("release input", input.release());
        }
        if let Some(output) = &output {
            best_effort("stop output", output.stop());
            best_effort("release output", output.release());
        }

        if let Some(transport) = &transport {
            best_effort("shutdown read", transport.shutdown_read());
            best_effort("shutdown write", transport.shutdown_write());
        }

        // Workers are unblocked by now; the caller may itself be one of them
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                tracing::warn!("Session worker panicked");
            }
        }

        // Last handles: the socket closes here
        drop(input);
        drop(output);
        drop(transport);
    }

    fn finish_teardown(&self) {
        self.state.set_muted(false);
        self.state.set_connection_state(ConnectionState::Disconnected);
        self.events.on_connection_state_changed(false);
        self.events.on_log("disconnected");
    }

    /// Report a fatal session error unless teardown is already under way
    fn report_failure(&self, what: &str, err: &dyn fmt::Display) {
        if self.state.is_running() {
            tracing::error!("{}: {}", what, err);
            self.events.on_log(&format!("{}: {}", what, err));
        }
    }
}

/// Voice chat client: connects, runs the capture and playback workers, and
/// tears the session down from whichever side ends it first.
///
/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct VoiceClient {
    inner: Arc<Inner>,
}

impl VoiceClient {
    pub fn new(
        audio: AudioConfig,
        backend: Arc<dyn AudioBackend>,
        events: Arc<dyn SessionEvents>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                audio,
                backend,
                events,
                state: SessionState::new(),
                resources: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.inner.state
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.connection_state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn is_muted(&self) -> bool {
        self.inner.state.is_muted()
    }

    pub fn frame_bytes(&self) -> usize {
        self.inner.audio.frame_bytes()
    }

    /// Run [`VoiceClient::connect`] on a short-lived worker thread
    pub fn connect_in_background(&self, params: ConnectParams) -> Result<JoinHandle<Result<()>>> {
        let client = self.clone();
        let handle = thread::Builder::new()
            .name("voice-connect".into())
            .spawn(move || client.connect(params))?;
        Ok(handle)
    }

    /// Connect, join the room, open the devices, and start both workers.
    ///
    /// Blocks for at most the connect timeout plus device start-up. On any
    /// failure everything opened so far is released and the state returns to
    /// `Disconnected`.
    pub fn connect(&self, params: ConnectParams) -> Result<()> {
        let inner = &self.inner;
        if let Err(reason) = params.validate() {
            inner.events.on_log(&format!("invalid parameters: {}", reason));
            return Err(Error::Config(reason));
        }
        if let Err(e) = inner.audio.validate() {
            inner.events.on_log(&format!("invalid parameters: {}", e));
            return Err(e);
        }
        if !inner
            .state
            .transition(ConnectionState::Disconnected, ConnectionState::Connecting)
        {
            return Err(NetworkError::AlreadyActive.into());
        }

        let host = match normalize_host(&params.host) {
            Some(loopback) => {
                inner.events.on_log(&format!(
                    "cannot connect to {}, using {} instead",
                    params.host, loopback
                ));
                loopback.to_string()
            }
            None => params.host.clone(),
        };
        inner
            .events
            .on_log(&format!("connecting to {}:{} ...", host, params.port));

        let mut pending = SessionResources::default();
        match self.open_session(&params, &host, &mut pending) {
            Ok(reader) => self.commit(pending, reader),
            Err(e) => {
                tracing::warn!("Connect to {}:{} failed: {}", host, params.port, e);
                inner.events.on_log(&format!("connection failed: {}", e));
                inner.state.set_connection_state(ConnectionState::Disconnecting);
                inner.release(pending);
                inner.finish_teardown();
                Err(e)
            }
        }
    }

    fn check_abort(&self) -> Result<()> {
        if self.connection_state() == ConnectionState::Disconnecting {
            return Err(NetworkError::Aborted.into());
        }
        Ok(())
    }

    /// Open stream and devices into `pending`, returning the receive handle
    fn open_session(
        &self,
        params: &ConnectParams,
        host: &str,
        pending: &mut SessionResources,
    ) -> Result<BufReader<TcpStream>> {
        let inner = &self.inner;

        let transport = Arc::new(Transport::connect(host, params.port, params.timeout)?);
        pending.transport = Some(transport.clone());
        self.check_abort()?;

        let reader = transport.reader()?;
        let join = JoinRequest::new(params.room.clone(), params.name.clone());
        let payload = join
            .to_payload()
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
        transport.send(PacketType::Join, &payload)?;
        tracing::info!(
            "Joined room '{}' as '{}' on {}",
            join.room,
            join.name,
            transport.peer_addr()
        );
        self.check_abort()?;

        pending.input = Some(inner.backend.open_input(&inner.audio)?);
        pending.output = Some(inner.backend.open_output(&inner.audio)?);
        Ok(reader)
    }

    /// Publish the session and start the workers, unless a disconnect arrived
    /// while connecting
    fn commit(&self, mut session: SessionResources, reader: BufReader<TcpStream>) -> Result<()> {
        let inner = &self.inner;
        let mut slot = inner.resources.lock();

        if !inner
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Connected)
        {
            drop(slot);
            inner.events.on_log("connection attempt cancelled");
            inner.release(session);
            inner.finish_teardown();
            return Err(NetworkError::Aborted.into());
        }

        inner.state.set_running(true);
        let spawned = self.spawn_workers(&mut session, reader);
        *slot = Some(session);

        // Still under the lock, so a worker's teardown cannot report first
        if spawned.is_ok() {
            inner.events.on_connection_state_changed(true);
            inner.events.on_log("connected");
        }
        drop(slot);

        if let Err(e) = spawned {
            inner.events.on_log(&format!("connection failed: {}", e));
            self.disconnect();
            return Err(e.into());
        }
        Ok(())
    }

    fn spawn_workers(
        &self,
        session: &mut SessionResources,
        mut reader: BufReader<TcpStream>,
    ) -> std::io::Result<()> {
        let frame_bytes = self.frame_bytes();
        let (transport, input, output) =
            match (&session.transport, &session.input, &session.output) {
                (Some(t), Some(i), Some(o)) => (t.clone(), i.clone(), o.clone()),
                _ => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::NotConnected,
                        "session resources incomplete",
                    ))
                }
            };

        let client = self.clone();
        let receive = thread::Builder::new()
            .name("voice-receive".into())
            .spawn(move || {
                let inner = &client.inner;
                let outcome = run_receive(
                    &mut reader,
                    &*output,
                    &*inner.events,
                    &inner.state,
                    frame_bytes,
                );
                match &outcome.exit {
                    ReceiveExit::Stopped => {}
                    ReceiveExit::EndOfStream => {
                        if inner.state.is_running() {
                            tracing::info!("Server closed the connection");
                        }
                    }
                    ReceiveExit::Failed(e) => inner.report_failure("connection error", e),
                }
                client.disconnect();
            })?;
        session.workers.push(receive);

        let client = self.clone();
        let capture = thread::Builder::new()
            .name("voice-capture".into())
            .spawn(move || {
                let inner = &client.inner;
                let outcome = run_capture(&*input, transport.writer(), &inner.state, frame_bytes);
                match &outcome.exit {
                    CaptureExit::Stopped => return,
                    CaptureExit::SendFailed(e) => inner.report_failure("send failed", e),
                    CaptureExit::DeviceFailed(e) => inner.report_failure("audio input failed", e),
                }
                client.disconnect();
            })?;
        session.workers.push(capture);

        Ok(())
    }

    /// End the session. Safe to call from any thread, any number of times;
    /// only the first call while running does the work.
    ///
    /// While a connect attempt is in flight this only marks it aborted; the
    /// connecting thread then releases what it opened.
    pub fn disconnect(&self) {
        let inner = &self.inner;
        if inner.state.claim_teardown() {
            self.teardown();
        } else if inner
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Disconnecting)
        {
            tracing::info!("Disconnect requested during connect; aborting attempt");
        } else if inner.state.connection_state() == ConnectionState::Connected {
            // Connected but not yet running: commit holds the lock until it
            // publishes `running`, so wait for it and claim again
            drop(inner.resources.lock());
            if inner.state.claim_teardown() {
                self.teardown();
            }
        }
    }

    fn teardown(&self) {
        let inner = &self.inner;
        inner.state.set_connection_state(ConnectionState::Disconnecting);
        tracing::info!("Tearing down session");
        let session = inner.resources.lock().take().unwrap_or_default();
        inner.release(session);
        inner.finish_teardown();
    }

    /// Flip the microphone mute, returning the new state.
    ///
    /// Purely local: muted frames are still read from the device but not sent.
    pub fn toggle_mute(&self) -> bool {
        let muted = self.inner.state.toggle_muted();
        self.log_mute(muted);
        muted
    }

    pub fn set_muted(&self, muted: bool) {
        self.inner.state.set_muted(muted);
        self.log_mute(muted);
    }

    fn log_mute(&self, muted: bool) {
        self.inner.events.on_log(if muted {
            "microphone muted"
        } else {
            "microphone on"
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::MockBackend;
    use crate::audio::AudioInput;
    use crate::error::AudioError;
    use crate::protocol::{encode, read_packet, Packet};
    use crate::session::{ChannelEvents, Notification};
    use crossbeam_channel::{bounded, Receiver, Sender};
    use std::io::Write;
    use std::net::{Shutdown, TcpListener};
    use std::sync::atomic::Ordering;
    use std::sync::Barrier;
    use std::time::Instant;

    const FRAME: usize = 320;

    fn spawn_peer<F>(script: F) -> (u16, JoinHandle<Vec<Packet>>)
    where
        F: FnOnce(&mut TcpStream, &mut Vec<Packet>) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut seen = Vec::new();
            script(&mut stream, &mut seen);
            while let Ok(Some(packet)) = read_packet(&mut stream) {
                seen.push(packet);
            }
            seen
        });
        (port, handle)
    }

    fn expect_packet(stream: &mut TcpStream, seen: &mut Vec<Packet>) -> Packet {
        let packet = read_packet(stream).unwrap().unwrap();
        seen.push(packet.clone());
        packet
    }

    fn client_with(backend: Arc<dyn AudioBackend>) -> (VoiceClient, Receiver<Notification>) {
        let (events, rx) = ChannelEvents::new();
        let client = VoiceClient::new(AudioConfig::default(), backend, Arc::new(events));
        (client, rx)
    }

    fn params(host: &str, port: u16) -> ConnectParams {
        ConnectParams::new(host, port, "r1", "alice").with_timeout(Duration::from_secs(2))
    }

    fn wait_for(what: &str, cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn count(notes: &[Notification], target: &Notification) -> usize {
        notes.iter().filter(|n| *n == target).count()
    }

    fn has_log_starting(notes: &[Notification], prefix: &str) -> bool {
        notes
            .iter()
            .any(|n| matches!(n, Notification::Log(text) if text.starts_with(prefix)))
    }

    #[test]
    fn test_end_to_end_session() {
        let backend = MockBackend::new();
        let (port, peer) = spawn_peer(|stream, seen| {
            let join = expect_packet(stream, seen);
            assert_eq!(join.kind, PacketType::Join);
            let request: JoinRequest = serde_json::from_slice(&join.payload).unwrap();
            assert_eq!(request, JoinRequest::new("r1", "alice"));
            stream
                .write_all(&encode(PacketType::Audio, &[0u8; FRAME]).unwrap())
                .unwrap();
        });
        let (client, rx) = client_with(backend.clone());

        client.connect(params("127.0.0.1", port)).unwrap();
        assert_eq!(client.connection_state(), ConnectionState::Connected);

        let played = backend.output.next_written(Duration::from_secs(5)).unwrap();
        assert_eq!(played, vec![0u8; FRAME]);

        backend.input.feeder().send(vec![5u8; FRAME]).unwrap();
        backend.input.wait_until_idle_after(1);

        client.disconnect();
        let seen = peer.join().unwrap();

        assert!(seen
            .iter()
            .any(|p| p.kind == PacketType::Audio && p.payload[..] == [5u8; FRAME][..]));
        assert_eq!(seen.last().unwrap().kind, PacketType::Leave);
        assert_eq!(backend.input.stops.load(Ordering::SeqCst), 1);
        assert_eq!(backend.input.releases.load(Ordering::SeqCst), 1);
        assert_eq!(backend.output.stops.load(Ordering::SeqCst), 1);
        assert_eq!(backend.output.releases.load(Ordering::SeqCst), 1);
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);

        let notes: Vec<Notification> = rx.try_iter().collect();
        assert_eq!(count(&notes, &Notification::ConnectionStateChanged(true)), 1);
        assert_eq!(notes.last(), Some(&Notification::Log("disconnected".into())));
    }

    #[test]
    fn test_concurrent_disconnect_runs_once() {
        let backend = MockBackend::new();
        let (port, peer) = spawn_peer(|stream, seen| {
            expect_packet(stream, seen);
        });
        let (client, rx) = client_with(backend.clone());
        client.connect(params("127.0.0.1", port)).unwrap();

        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let client = client.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    client.disconnect();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert_eq!(backend.input.stops.load(Ordering::SeqCst), 1);
        assert_eq!(backend.input.releases.load(Ordering::SeqCst), 1);
        assert_eq!(backend.output.releases.load(Ordering::SeqCst), 1);

        let notes: Vec<Notification> = rx.try_iter().collect();
        assert_eq!(count(&notes, &Notification::ConnectionStateChanged(false)), 1);
        assert_eq!(count(&notes, &Notification::Log("disconnected".into())), 1);

        let seen = peer.join().unwrap();
        assert_eq!(seen.iter().filter(|p| p.kind == PacketType::Leave).count(), 1);

        // later calls are no-ops too
        client.disconnect();
        assert_eq!(backend.input.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_server_close_tears_down() {
        let backend = MockBackend::new();
        let (port, peer) = spawn_peer(|stream, seen| {
            expect_packet(stream, seen);
            stream.shutdown(Shutdown::Both).unwrap();
        });
        let (client, rx) = client_with(backend.clone());
        client.connect(params("127.0.0.1", port)).unwrap();

        wait_for("teardown", || {
            client.connection_state() == ConnectionState::Disconnected
        });
        peer.join().unwrap();

        assert_eq!(backend.input.releases.load(Ordering::SeqCst), 1);
        assert_eq!(backend.output.releases.load(Ordering::SeqCst), 1);
        let notes: Vec<Notification> = rx.try_iter().collect();
        assert!(!has_log_starting(&notes, "connection error"));
        assert_eq!(count(&notes, &Notification::Log("disconnected".into())), 1);
    }

    #[test]
    fn test_protocol_violation_tears_down() {
        let backend = MockBackend::new();
        let (port, peer) = spawn_peer(|stream, seen| {
            expect_packet(stream, seen);
            let mut header = vec![PacketType::Audio.tag()];
            header.extend_from_slice(&3_000_000u32.to_be_bytes());
            stream.write_all(&header).unwrap();
        });
        let (client, rx) = client_with(backend.clone());
        client.connect(params("127.0.0.1", port)).unwrap();

        wait_for("teardown", || {
            client.connection_state() == ConnectionState::Disconnected
        });
        let seen = peer.join().unwrap();

        assert_eq!(seen.last().unwrap().kind, PacketType::Leave);
        assert_eq!(backend.output.written_count(), 0);
        let notes: Vec<Notification> = rx.try_iter().collect();
        assert!(has_log_starting(&notes, "connection error"));
    }

    #[test]
    fn test_refused_connect_reports_and_resets() {
        let backend = MockBackend::new();
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let (client, rx) = client_with(backend.clone());

        let result = client.connect(params("127.0.0.1", port));
        assert!(matches!(result, Err(Error::Network(_))));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert_eq!(backend.input.stops.load(Ordering::SeqCst), 0);

        let notes: Vec<Notification> = rx.try_iter().collect();
        assert!(has_log_starting(&notes, "connecting to 127.0.0.1"));
        assert!(has_log_starting(&notes, "connection failed"));
        assert_eq!(notes.last(), Some(&Notification::Log("disconnected".into())));
    }

    #[test]
    fn test_device_failure_releases_partial_session() {
        let backend = MockBackend::new();
        backend.fail_output.store(true, Ordering::SeqCst);
        let (port, peer) = spawn_peer(|_, _| {});
        let (client, _rx) = client_with(backend.clone());

        let result = client.connect(params("127.0.0.1", port));
        assert!(matches!(result, Err(Error::Audio(AudioError::DeviceNotFound(_)))));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert_eq!(backend.input.releases.load(Ordering::SeqCst), 1);
        assert_eq!(backend.output.releases.load(Ordering::SeqCst), 0);

        let kinds: Vec<PacketType> = peer.join().unwrap().iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![PacketType::Join, PacketType::Leave]);
    }

    #[test]
    fn test_failing_release_does_not_stop_teardown() {
        let backend = MockBackend::new();
        backend.output.fail_release.store(true, Ordering::SeqCst);
        let (port, peer) = spawn_peer(|stream, seen| {
            expect_packet(stream, seen);
        });
        let (client, _rx) = client_with(backend.clone());
        client.connect(params("127.0.0.1", port)).unwrap();

        client.disconnect();
        // peer only returns once the socket is shut down
        let seen = peer.join().unwrap();
        assert_eq!(seen.last().unwrap().kind, PacketType::Leave);
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let backend = MockBackend::new();
        let (client, rx) = client_with(backend);

        assert!(matches!(
            client.connect(params("", 50000)),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            client.connect(ConnectParams::new("127.0.0.1", 50000, "  ", "bob")),
            Err(Error::Config(_))
        ));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);

        let notes: Vec<Notification> = rx.try_iter().collect();
        assert_eq!(notes.len(), 2);
        assert!(has_log_starting(&notes, "invalid parameters"));
    }

    #[test]
    fn test_wildcard_host_and_second_connect() {
        let backend = MockBackend::new();
        let (port, peer) = spawn_peer(|stream, seen| {
            expect_packet(stream, seen);
        });
        let (client, rx) = client_with(backend);

        client.connect(params("0.0.0.0", port)).unwrap();
        assert!(matches!(
            client.connect(params("127.0.0.1", port)),
            Err(Error::Network(NetworkError::AlreadyActive))
        ));
        assert!(client.is_connected());

        client.disconnect();
        peer.join().unwrap();
        let notes: Vec<Notification> = rx.try_iter().collect();
        assert!(has_log_starting(&notes, "cannot connect to 0.0.0.0, using 127.0.0.1"));
    }

    #[test]
    fn test_mute_is_local_and_reset_on_teardown() {
        let backend = MockBackend::new();
        let (port, peer) = spawn_peer(|stream, seen| {
            expect_packet(stream, seen);
        });
        let (client, rx) = client_with(backend.clone());
        client.connect(params("127.0.0.1", port)).unwrap();

        assert!(client.toggle_mute());
        backend.input.feeder().send(vec![1u8; FRAME]).unwrap();
        backend.input.wait_until_idle_after(1);
        assert!(client.is_muted());

        client.disconnect();
        assert!(!client.is_muted());

        let seen = peer.join().unwrap();
        assert!(seen.iter().all(|p| p.kind != PacketType::Audio));
        let notes: Vec<Notification> = rx.try_iter().collect();
        assert_eq!(count(&notes, &Notification::Log("microphone muted".into())), 1);
    }

    /// Backend whose input open waits for the test's go-ahead
    struct GatedBackend {
        inner: Arc<MockBackend>,
        entered: Sender<()>,
        proceed: Receiver<()>,
    }

    impl AudioBackend for GatedBackend {
        fn open_input(
            &self,
            config: &AudioConfig,
        ) -> std::result::Result<Arc<dyn AudioInput>, AudioError> {
            let _ = self.entered.send(());
            let _ = self.proceed.recv();
            self.inner.open_input(config)
        }

        fn open_output(
            &self,
            config: &AudioConfig,
        ) -> std::result::Result<Arc<dyn AudioOutput>, AudioError> {
            self.inner.open_output(config)
        }
    }

    #[test]
    fn test_disconnect_while_connecting_aborts() {
        let mock = MockBackend::new();
        let (entered_tx, entered_rx) = bounded(1);
        let (proceed_tx, proceed_rx) = bounded(1);
        let gated = Arc::new(GatedBackend {
            inner: mock.clone(),
            entered: entered_tx,
            proceed: proceed_rx,
        });
        let (port, peer) = spawn_peer(|_, _| {});
        let (client, rx) = client_with(gated);

        let attempt = client
            .connect_in_background(params("127.0.0.1", port))
            .unwrap();
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(client.connection_state(), ConnectionState::Connecting);

        client.disconnect();
        assert_eq!(client.connection_state(), ConnectionState::Disconnecting);
        proceed_tx.send(()).unwrap();

        let result = attempt.join().unwrap();
        assert!(matches!(result, Err(Error::Network(NetworkError::Aborted))));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert!(!client.state().is_running());
        assert_eq!(mock.input.releases.load(Ordering::SeqCst), 1);

        let kinds: Vec<PacketType> = peer.join().unwrap().iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![PacketType::Join, PacketType::Leave]);
        let notes: Vec<Notification> = rx.try_iter().collect();
        assert_eq!(count(&notes, &Notification::ConnectionStateChanged(true)), 0);
        assert_eq!(notes.last(), Some(&Notification::Log("disconnected".into())));
    }

    #[test]
    fn test_disconnect_between_connected_and_running_is_kept() {
        let backend = MockBackend::new();
        let (client, rx) = client_with(backend.clone());
        let inner = client.inner.clone();

        // Replay commit by hand: lock held, state Connected, running not yet set
        assert!(inner
            .state
            .transition(ConnectionState::Disconnected, ConnectionState::Connecting));
        let mut slot = inner.resources.lock();
        assert!(inner
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Connected));

        let stopper = {
            let client = client.clone();
            thread::spawn(move || client.disconnect())
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!stopper.is_finished(), "disconnect returned without waiting");

        inner.state.set_running(true);
        let input: Arc<dyn AudioInput> = backend.input.clone();
        let output: Arc<dyn AudioOutput> = backend.output.clone();
        *slot = Some(SessionResources {
            input: Some(input),
            output: Some(output),
            ..Default::default()
        });
        drop(slot);
        stopper.join().unwrap();

        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert!(!client.state().is_running());
        assert_eq!(backend.input.releases.load(Ordering::SeqCst), 1);
        assert_eq!(backend.output.releases.load(Ordering::SeqCst), 1);
        let notes: Vec<Notification> = rx.try_iter().collect();
        assert_eq!(count(&notes, &Notification::Log("disconnected".into())), 1);
    }

    #[test]
    fn test_degenerate_audio_format_rejected_before_connecting() {
        let backend = MockBackend::new();
        let (events, rx) = ChannelEvents::new();
        let audio = AudioConfig {
            frame_ms: 0,
            ..AudioConfig::default()
        };
        let client = VoiceClient::new(audio, backend.clone(), Arc::new(events));

        let result = client.connect(params("127.0.0.1", 50000));
        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert_eq!(backend.input.stops.load(Ordering::SeqCst), 0);

        let notes: Vec<Notification> = rx.try_iter().collect();
        assert_eq!(notes.len(), 1);
        assert!(has_log_starting(&notes, "invalid parameters"));
    }

    #[test]
    fn test_display_name_fallback() {
        let params = ConnectParams::new("h", 1, "r", "   ");
        assert!(!params.name.is_empty());
        assert_eq!(ConnectParams::new("h", 1, "r", " bob ").name, "bob");
    }
}
