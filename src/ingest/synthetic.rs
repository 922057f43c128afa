//! Synthetic camera for `stub://` URLs.
//!
//! Renders a flat background with solid-colour rectangles, one per scene
//! object. The scene is shared through a `SceneHandle` so tests and the demo
//! can add or remove objects while the camera runs.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{CameraDevice, CameraError};
use crate::detect::backends::color_blob::DEFAULT_PALETTE;
use crate::frame::{Frame, CHANNELS};

#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticObject {
    pub class_name: String,
    pub color: [u8; 3],
    /// Pixel rectangle, `x1 < x2`, `y1 < y2`, exclusive upper bounds.
    pub rect: (u32, u32, u32, u32),
}

impl SyntheticObject {
    pub fn new(class_name: &str, color: [u8; 3], rect: (u32, u32, u32, u32)) -> Self {
        Self {
            class_name: class_name.to_string(),
            color,
            rect,
        }
    }

    /// Object coloured from the default palette. Unknown classes render grey.
    pub fn from_palette(class_name: &str, rect: (u32, u32, u32, u32)) -> Self {
        let color = DEFAULT_PALETTE
            .iter()
            .find(|(name, _)| *name == class_name)
            .map(|(_, rgb)| *rgb)
            .unwrap_or([128, 128, 128]);
        Self::new(class_name, color, rect)
    }
}

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub background: [u8; 3],
    /// Simulated device round-trip per read.
    pub latency: Duration,
    /// Reads that return nothing after `start`, like a warming camera.
    pub warmup_reads: u32,
    /// Maximum per-frame displacement of every object, in pixels.
    pub jitter_px: u32,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            url: "stub://workbench".to_string(),
            width: 320,
            height: 240,
            background: [16, 16, 16],
            latency: Duration::ZERO,
            warmup_reads: 0,
            jitter_px: 0,
            seed: 7,
        }
    }
}

/// Shared, mutable scene contents.
#[derive(Clone, Default)]
pub struct SceneHandle {
    objects: Arc<Mutex<Vec<SyntheticObject>>>,
}

impl SceneHandle {
    pub fn add(&self, object: SyntheticObject) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.push(object);
        }
    }

    /// Remove the object whose rectangle centre is nearest to `(x, y)`.
    pub fn remove_nearest(&self, x: f32, y: f32) -> Option<SyntheticObject> {
        let mut objects = self.objects.lock().ok()?;
        let index = objects
            .iter()
            .enumerate()
            .map(|(i, obj)| {
                let (x1, y1, x2, y2) = obj.rect;
                let cx = (x1 + x2) as f32 * 0.5;
                let cy = (y1 + y2) as f32 * 0.5;
                (i, (cx - x).powi(2) + (cy - y).powi(2))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)?;
        Some(objects.remove(index))
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<SyntheticObject> {
        self.objects.lock().map(|o| o.clone()).unwrap_or_default()
    }
}

pub struct SyntheticCamera {
    config: SyntheticConfig,
    scene: SceneHandle,
    rng: StdRng,
    started: bool,
    reads_since_start: u32,
}

impl SyntheticCamera {
    pub fn new(config: SyntheticConfig, objects: Vec<SyntheticObject>) -> Self {
        let scene = SceneHandle::default();
        for object in objects {
            scene.add(object);
        }
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            scene,
            started: false,
            reads_since_start: 0,
        }
    }

    /// Default bench scene: one cup, one bottle and one spoon.
    pub fn workbench(config: SyntheticConfig) -> Self {
        let w = config.width;
        let h = config.height;
        let objects = vec![
            SyntheticObject::from_palette("cup", (w / 8, h / 2, w / 8 + w / 10, h / 2 + h / 8)),
            SyntheticObject::from_palette(
                "bottle",
                (w / 2, h / 3, w / 2 + w / 16, h / 3 + h / 4),
            ),
            SyntheticObject::from_palette(
                "spoon",
                (3 * w / 4, 2 * h / 3, 3 * w / 4 + w / 12, 2 * h / 3 + h / 20),
            ),
        ];
        Self::new(config, objects)
    }

    pub fn scene(&self) -> SceneHandle {
        self.scene.clone()
    }

    fn render(&mut self) -> Vec<u8> {
        let width = self.config.width;
        let height = self.config.height;
        let mut pixels = Vec::with_capacity(width as usize * height as usize * CHANNELS);
        for _ in 0..(width * height) {
            pixels.extend_from_slice(&self.config.background);
        }
        for object in self.scene.snapshot() {
            let (dx, dy) = self.jitter();
            let (x1, y1, x2, y2) = object.rect;
            let x1 = shift(x1, dx, width);
            let x2 = shift(x2, dx, width);
            let y1 = shift(y1, dy, height);
            let y2 = shift(y2, dy, height);
            for y in y1..y2 {
                for x in x1..x2 {
                    let i = (y as usize * width as usize + x as usize) * CHANNELS;
                    pixels[i..i + CHANNELS].copy_from_slice(&object.color);
                }
            }
        }
        pixels
    }

    fn jitter(&mut self) -> (i64, i64) {
        let j = self.config.jitter_px as i64;
        if j == 0 {
            return (0, 0);
        }
        (self.rng.gen_range(-j..=j), self.rng.gen_range(-j..=j))
    }
}

fn shift(value: u32, delta: i64, limit: u32) -> u32 {
    (value as i64 + delta).clamp(0, limit as i64) as u32
}

impl CameraDevice for SyntheticCamera {
    fn url(&self) -> &str {
        &self.config.url
    }

    fn start(&mut self) -> Result<(), CameraError> {
        self.started = true;
        self.reads_since_start = 0;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        if !self.started {
            return Err(CameraError::Unavailable("stream not started".to_string()));
        }
        if !self.config.latency.is_zero() {
            std::thread::sleep(self.config.latency);
        }
        self.reads_since_start = self.reads_since_start.saturating_add(1);
        if self.reads_since_start <= self.config.warmup_reads {
            return Ok(None);
        }
        let pixels = self.render();
        Frame::new(pixels, self.config.width, self.config.height)
            .map(Some)
            .map_err(|e| CameraError::Unavailable(e.to_string()))
    }

    fn stop(&mut self) -> Result<(), CameraError> {
        self.started = false;
        Ok(())
    }
}
