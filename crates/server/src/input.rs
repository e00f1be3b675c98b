//! Client-side input sampling.
//!
//! An [`InputQueue`] owns a thread that samples an [`InputSource`] at a fixed
//! period, stamps each snapshot with the next sequence number, keeps it in a
//! trailing history and hands it to an [`InputSink`] for transmission.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bitflags::bitflags;
use crossbeam_channel::{RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Movement keys held during one sampling period.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct MovementFlags: u8 {
        const FORWARD = 1 << 0;
        const BACKWARD = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
        const JUMP = 1 << 4;
        const CROUCH = 1 << 5;
    }
}

/// One sampled snapshot of a client's input.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct InputState {
    pub flags: MovementFlags,
    /// Radians, counter-clockwise seen from above; 0 looks down -Z.
    pub yaw: f32,
    pub pitch: f32,
    pub sequence: u64,
}

/// Raw device state, before sequencing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InputSample {
    pub flags: MovementFlags,
    pub yaw: f32,
    pub pitch: f32,
}

/// Where the sampling thread reads device state from.
pub trait InputSource: Send + 'static {
    fn sample(&self) -> InputSample;
}

/// Where the sampling thread sends each snapshot.
pub trait InputSink: Send + 'static {
    fn transmit(&self, state: &InputState);
}

impl InputSink for Sender<InputState> {
    fn transmit(&self, state: &InputState) {
        // The receiver going away just means nobody is listening any more.
        let _ = self.send(*state);
    }
}

/// Device state shared between whoever handles key events and the sampler.
#[derive(Debug, Clone, Default)]
pub struct SharedInput {
    inner: Arc<Mutex<InputSample>>,
}

impl SharedInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_flags(&self, flags: MovementFlags) {
        self.inner.lock().flags = flags;
    }

    pub fn press(&self, flags: MovementFlags) {
        self.inner.lock().flags.insert(flags);
    }

    pub fn release(&self, flags: MovementFlags) {
        self.inner.lock().flags.remove(flags);
    }

    pub fn set_rotation(&self, yaw: f32, pitch: f32) {
        let mut sample = self.inner.lock();
        sample.yaw = yaw;
        sample.pitch = pitch;
    }
}

impl InputSource for SharedInput {
    fn sample(&self) -> InputSample {
        *self.inner.lock()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputQueueConfig {
    pub period: Duration,
    /// Snapshots kept until acknowledged; the oldest are dropped beyond this.
    pub history: usize,
    /// Whether input capture starts enabled.
    pub capture: bool,
}

impl Default for InputQueueConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(50),
            history: 256,
            capture: true,
        }
    }
}

struct Shared {
    history: Mutex<VecDeque<InputState>>,
    capture: AtomicBool,
    running: AtomicBool,
}

/// Fixed-rate input sampler running on its own thread.
pub struct InputQueue {
    shared: Arc<Shared>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl InputQueue {
    pub fn start(
        config: InputQueueConfig,
        source: impl InputSource,
        sink: impl InputSink,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            history: Mutex::new(VecDeque::with_capacity(config.history)),
            capture: AtomicBool::new(config.capture),
            running: AtomicBool::new(true),
        });
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("input-queue".into())
            .spawn(move || {
                let mut sequence = 0u64;
                let mut next = Instant::now();
                while thread_shared.running.load(Ordering::Acquire) {
                    let raw = source.sample();
                    let flags = if thread_shared.capture.load(Ordering::Acquire) {
                        raw.flags
                    } else {
                        MovementFlags::empty()
                    };
                    let state = InputState {
                        flags,
                        yaw: raw.yaw,
                        pitch: raw.pitch,
                        sequence,
                    };
                    sequence += 1;

                    {
                        let mut history = thread_shared.history.lock();
                        if history.len() >= config.history.max(1) {
                            history.pop_front();
                        }
                        history.push_back(state);
                    }
                    sink.transmit(&state);

                    next += config.period;
                    let now = Instant::now();
                    if next + config.period < now {
                        tracing::debug!("Input sampling fell behind, skipping ahead");
                        next = now;
                    }
                    match stop_rx.recv_timeout(next.saturating_duration_since(now)) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("Input queue stopped after {} snapshots", sequence);
            })
            .context("spawning input-queue thread")?;

        Ok(Self {
            shared,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Enable or disable capture. While disabled every snapshot carries empty
    /// movement flags; sequencing continues.
    pub fn set_capture(&self, enabled: bool) {
        self.shared.capture.store(enabled, Ordering::Release);
    }

    pub fn capture_enabled(&self) -> bool {
        self.shared.capture.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Copy of the unacknowledged history, oldest first.
    pub fn history(&self) -> Vec<InputState> {
        self.shared.history.lock().iter().copied().collect()
    }

    /// Drop every snapshot with a sequence number up to and including `sequence`.
    pub fn purge_through(&self, sequence: u64) {
        let mut history = self.shared.history.lock();
        while history.front().is_some_and(|s| s.sequence <= sequence) {
            history.pop_front();
        }
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.shared.history.lock().back().map(|s| s.sequence)
    }

    /// Stop sampling and join the thread. No snapshot is produced after this
    /// returns. Idempotent.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Input queue thread panicked");
            }
        }
    }
}

impl Drop for InputQueue {
    fn drop(&mut self) {
        self.stop();
    }
}
