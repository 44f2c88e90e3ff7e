//! In-memory devices for exercising the session without audio hardware

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::{AudioBackend, AudioInput, AudioOutput};
use crate::config::AudioConfig;
use crate::error::AudioError;

/// Input fed by the test through [`MockInput::feeder`]
pub(crate) struct MockInput {
    feed_rx: Receiver<Vec<u8>>,
    feed_tx: Sender<Vec<u8>>,
    stop_tx: Mutex<Option<Sender<()>>>,
    stop_rx: Receiver<()>,
    /// Calls to `read_frame`, counted on entry
    pub entries: AtomicUsize,
    pub stops: AtomicUsize,
    pub releases: AtomicUsize,
}

impl MockInput {
    pub fn new() -> Arc<Self> {
        let (feed_tx, feed_rx) = unbounded();
        let (stop_tx, stop_rx) = bounded(1);
        Arc::new(Self {
            feed_rx,
            feed_tx,
            stop_tx: Mutex::new(Some(stop_tx)),
            stop_rx,
            entries: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        })
    }

    pub fn feeder(&self) -> Sender<Vec<u8>> {
        self.feed_tx.clone()
    }

    /// Wait until `frames` reads have completed and the reader is blocked on
    /// the next one, so every earlier frame has been fully handled.
    pub fn wait_until_idle_after(&self, frames: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.entries.load(Ordering::SeqCst) <= frames {
            assert!(Instant::now() < deadline, "timed out waiting for {} reads", frames);
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}

impl AudioInput for MockInput {
    fn read_frame(&self, frame: &mut [u8]) -> Result<usize, AudioError> {
        self.entries.fetch_add(1, Ordering::SeqCst);
        let chunk = select! {
            recv(self.feed_rx) -> chunk => chunk.map_err(|_| AudioError::Closed)?,
            recv(self.stop_rx) -> _ => return Err(AudioError::Closed),
        };
        let n = chunk.len().min(frame.len());
        frame[..n].copy_from_slice(&chunk[..n]);
        Ok(n)
    }

    fn stop(&self) -> Result<(), AudioError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.stop_tx.lock().take();
        Ok(())
    }

    fn release(&self) -> Result<(), AudioError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Output that records every accepted frame
pub(crate) struct MockOutput {
    written_tx: Sender<Vec<u8>>,
    written_rx: Receiver<Vec<u8>>,
    /// Release fails when set, to check teardown keeps going
    pub fail_release: AtomicBool,
    pub stops: AtomicUsize,
    pub releases: AtomicUsize,
}

impl MockOutput {
    pub fn new() -> Arc<Self> {
        let (written_tx, written_rx) = unbounded();
        Arc::new(Self {
            written_tx,
            written_rx,
            fail_release: AtomicBool::new(false),
            stops: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        })
    }

    pub fn next_written(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.written_rx.recv_timeout(timeout).ok()
    }

    pub fn written_count(&self) -> usize {
        self.written_rx.len()
    }
}

impl AudioOutput for MockOutput {
    fn write_frame(&self, frame: &[u8]) -> usize {
        let _ = self.written_tx.send(frame.to_vec());
        frame.len()
    }

    fn stop(&self) -> Result<(), AudioError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) -> Result<(), AudioError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(AudioError::StreamError("release failed".into()));
        }
        Ok(())
    }
}

/// Backend handing out one fixed pair of mock devices
pub(crate) struct MockBackend {
    pub input: Arc<MockInput>,
    pub output: Arc<MockOutput>,
    pub fail_output: AtomicBool,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            input: MockInput::new(),
            output: MockOutput::new(),
            fail_output: AtomicBool::new(false),
        })
    }
}

impl AudioBackend for MockBackend {
    fn open_input(&self, _config: &AudioConfig) -> Result<Arc<dyn AudioInput>, AudioError> {
        Ok(self.input.clone())
    }

    fn open_output(&self, _config: &AudioConfig) -> Result<Arc<dyn AudioOutput>, AudioError> {
        if self.fail_output.load(Ordering::SeqCst) {
            return Err(AudioError::DeviceNotFound("mock output".into()));
        }
        Ok(self.output.clone())
    }
}
