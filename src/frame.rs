//! Frames and the producer lane.
//!
//! - `Frame`: one RGB image with a capture sequence number and capture instant.
//! - `FrameSlot`: single-slot buffer guarded by a mutex. Only the newest frame
//!   is kept; publishing replaces the previous frame, readers get an `Arc`.
//! - `FrameSource`: owns a `CameraDevice` on a background thread and keeps the
//!   slot refreshed so the consumer lane never blocks on device latency.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::ingest::{CameraDevice, CameraError};
use crate::telemetry::Telemetry;

/// Bytes per pixel; frames are packed RGB.
pub const CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

#[derive(Clone)]
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Assigned by `FrameSlot::publish`; 0 until published.
    pub sequence: u64,
    captured_at: Instant,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        Self::captured_at(pixels, width, height, Instant::now())
    }

    pub fn captured_at(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        captured_at: Instant,
    ) -> Result<Self> {
        let expected = width as usize * height as usize * CHANNELS;
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame {}x{} expects {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            sequence: 0,
            captured_at,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// RGB value at `(x, y)`. Callers must stay inside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * CHANNELS;
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]]
    }

    pub fn capture_instant(&self) -> Instant {
        self.captured_at
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("age", &self.age())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// FrameSlot
// ----------------------------------------------------------------------------

#[derive(Default)]
struct SlotState {
    frame: Option<Arc<Frame>>,
    last_sequence: u64,
}

/// Single-slot frame buffer shared between the producer and consumer lanes.
///
/// Reads and writes hold the lock for the whole operation, so a reader sees
/// either the previous frame or the new one, never a mix.
#[derive(Default)]
pub struct FrameSlot {
    state: Mutex<SlotState>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the slot contents. Returns the sequence number assigned.
    pub fn publish(&self, mut frame: Frame) -> Result<u64> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("frame slot lock poisoned"))?;
        state.last_sequence += 1;
        frame.sequence = state.last_sequence;
        state.frame = Some(Arc::new(frame));
        Ok(state.last_sequence)
    }

    pub fn latest(&self) -> Result<Option<Arc<Frame>>> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow!("frame slot lock poisoned"))?;
        Ok(state.frame.clone())
    }

    pub fn clear(&self) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("frame slot lock poisoned"))?;
        state.frame = None;
        Ok(())
    }

    pub fn last_sequence(&self) -> Result<u64> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow!("frame slot lock poisoned"))?;
        Ok(state.last_sequence)
    }
}

// ----------------------------------------------------------------------------
// FrameSource
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct FrameSourceConfig {
    /// Pause between device reads on the background thread.
    pub poll_interval: Duration,
    /// Frames older than this are reported as absent.
    pub max_frame_age: Duration,
}

impl Default for FrameSourceConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            max_frame_age: Duration::from_secs(1),
        }
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct FrameSourceStats {
    pub frames_captured: u64,
    pub read_errors: u64,
    pub url: String,
}

#[derive(Default)]
struct SourceCounters {
    frames_captured: AtomicU64,
    read_errors: AtomicU64,
}

pub struct FrameSource {
    config: FrameSourceConfig,
    url: String,
    slot: Arc<FrameSlot>,
    counters: Arc<SourceCounters>,
    shutdown: Arc<AtomicBool>,
    device: Option<Box<dyn CameraDevice>>,
    join: Option<JoinHandle<()>>,
    telemetry: Telemetry,
}

impl FrameSource {
    pub fn new(
        device: Box<dyn CameraDevice>,
        config: FrameSourceConfig,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            config,
            url: device.url().to_string(),
            slot: Arc::new(FrameSlot::new()),
            counters: Arc::new(SourceCounters::default()),
            shutdown: Arc::new(AtomicBool::new(false)),
            device: Some(device),
            join: None,
            telemetry,
        }
    }

    /// Start the device and the background refresh thread.
    ///
    /// Device start failures are connection errors and are returned to the
    /// caller; there is no retry here.
    pub fn start(&mut self) -> Result<()> {
        if self.join.is_some() {
            return Ok(());
        }
        let mut device = self
            .device
            .take()
            .ok_or_else(|| anyhow!("frame source {} cannot be restarted", self.url))?;
        if let Err(err) = device.start() {
            self.device = Some(device);
            return Err(anyhow!("camera {} failed to start: {}", self.url, err));
        }

        self.shutdown.store(false, Ordering::SeqCst);
        let slot = self.slot.clone();
        let counters = self.counters.clone();
        let shutdown = self.shutdown.clone();
        let poll_interval = self.config.poll_interval;
        let telemetry = self.telemetry.clone();
        let join = std::thread::Builder::new()
            .name("frame-source".to_string())
            .spawn(move || {
                refresh_loop(device, slot, counters, shutdown, poll_interval, telemetry)
            })?;
        self.join = Some(join);
        self.telemetry
            .info(format_args!("frame source started: {}", self.url));
        Ok(())
    }

    /// Newest frame, or `None` when nothing fresh is available.
    ///
    /// Never blocks on the device. A frame older than `max_frame_age` is
    /// treated as absent so a stalled device cannot feed the same frame
    /// forever.
    pub fn read(&self) -> Option<Arc<Frame>> {
        let frame = match self.slot.latest() {
            Ok(frame) => frame?,
            Err(err) => {
                self.telemetry.error(format_args!("{}", err));
                return None;
            }
        };
        if frame.age() > self.config.max_frame_age {
            return None;
        }
        Some(frame)
    }

    /// Like `read`, but only returns a frame published after `after`.
    pub fn read_newer(&self, after: Option<u64>) -> Option<Arc<Frame>> {
        let frame = self.read()?;
        match after {
            Some(seq) if frame.sequence <= seq => None,
            _ => Some(frame),
        }
    }

    /// Stop acquisition and release the device. Idempotent.
    pub fn stop(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("frame source thread panicked"))?;
            self.telemetry
                .info(format_args!("frame source stopped: {}", self.url));
        }
        self.slot.clear()?;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.join.is_some()
    }

    pub fn is_healthy(&self) -> bool {
        self.is_running() && self.read().is_some()
    }

    pub fn stats(&self) -> FrameSourceStats {
        FrameSourceStats {
            frames_captured: self.counters.frames_captured.load(Ordering::Relaxed),
            read_errors: self.counters.read_errors.load(Ordering::Relaxed),
            url: self.url.clone(),
        }
    }

    pub fn slot(&self) -> Arc<FrameSlot> {
        self.slot.clone()
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            self.telemetry
                .warn(format_args!("frame source stop on drop failed: {}", err));
        }
    }
}

fn refresh_loop(
    mut device: Box<dyn CameraDevice>,
    slot: Arc<FrameSlot>,
    counters: Arc<SourceCounters>,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
    telemetry: Telemetry,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match device.read_frame() {
            Ok(Some(frame)) => match slot.publish(frame) {
                Ok(_) => {
                    counters.frames_captured.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    telemetry.error(format_args!("frame publish failed: {}", err));
                    break;
                }
            },
            Ok(None) => {}
            Err(CameraError::Unavailable(reason)) => {
                counters.read_errors.fetch_add(1, Ordering::Relaxed);
                telemetry.debug(format_args!("camera frame unavailable: {}", reason));
            }
            Err(err) => {
                counters.read_errors.fetch_add(1, Ordering::Relaxed);
                telemetry.warn(format_args!("camera read failed: {}", err));
            }
        }
        std::thread::sleep(poll_interval);
    }
    if let Err(err) = device.stop() {
        telemetry.warn(format_args!("camera {} stop failed: {}", device.url(), err));
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
