//! Lock-free sample ring for the playback device
//!
//! Single producer (the receive loop) and single consumer (the cpal output
//! callback). The producer never blocks: samples that do not fit are dropped,
//! which keeps playback close to real time instead of drifting behind.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Bounded queue of 16-bit samples
pub struct SampleRing {
    queue: ArrayQueue<i16>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl SampleRing {
    /// Create a new ring holding up to `capacity` samples
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push as many samples as fit; returns how many were accepted
    pub fn push_samples(&self, samples: impl IntoIterator<Item = i16>) -> usize {
        let mut accepted = 0;
        let mut dropped = 0;
        for sample in samples {
            if self.queue.push(sample).is_ok() {
                accepted += 1;
            } else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            self.overflow_count.fetch_add(dropped, Ordering::Relaxed);
        }
        accepted
    }

    /// Fill `out` from the ring, padding with silence on underrun
    pub fn pop_into(&self, out: &mut [i16]) -> usize {
        let mut filled = 0;
        for slot in out.iter_mut() {
            match self.queue.pop() {
                Some(sample) => {
                    *slot = sample;
                    filled += 1;
                }
                None => *slot = 0,
            }
        }
        if filled < out.len() {
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
        }
        filled
    }

    /// Discard everything queued
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Samples dropped because the ring was full
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Callbacks that ran short of samples
    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a sample ring
pub type SharedSampleRing = Arc<SampleRing>;
