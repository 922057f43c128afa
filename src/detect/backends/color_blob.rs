use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BBox, Detection};
use crate::frame::Frame;

/// Class colours used by the synthetic camera and this backend.
pub const DEFAULT_PALETTE: &[(&str, [u8; 3])] = &[
    ("cup", [220, 40, 40]),
    ("bottle", [40, 80, 220]),
    ("spoon", [40, 200, 60]),
];

const DEFAULT_TOLERANCE: u8 = 24;
const DEFAULT_MIN_PIXELS: usize = 12;

#[derive(Clone, Debug)]
pub struct ColorClass {
    pub class_name: String,
    pub rgb: [u8; 3],
    /// Maximum per-channel distance for a pixel to count as this colour.
    pub tolerance: u8,
}

impl ColorClass {
    fn matches(&self, px: [u8; 3]) -> bool {
        px.iter()
            .zip(self.rgb.iter())
            .all(|(a, b)| a.abs_diff(*b) <= self.tolerance)
    }
}

/// CPU backend that finds solid-colour regions.
///
/// Each configured colour is masked, the mask is split into 4-connected
/// regions, and every region of at least `min_pixels` becomes a detection.
/// Confidence is the region's fill ratio inside its bounding box.
pub struct ColorBlobBackend {
    classes: Vec<ColorClass>,
    min_pixels: usize,
}

impl ColorBlobBackend {
    pub fn new(classes: Vec<ColorClass>, min_pixels: usize) -> Self {
        Self {
            classes,
            min_pixels: min_pixels.max(1),
        }
    }

    pub fn with_default_palette() -> Self {
        let classes = DEFAULT_PALETTE
            .iter()
            .map(|(name, rgb)| ColorClass {
                class_name: name.to_string(),
                rgb: *rgb,
                tolerance: DEFAULT_TOLERANCE,
            })
            .collect();
        Self::new(classes, DEFAULT_MIN_PIXELS)
    }

    fn regions(&self, frame: &Frame, class: &ColorClass) -> Vec<Detection> {
        let width = frame.width as usize;
        let height = frame.height as usize;
        let mut mask = vec![false; width * height];
        for y in 0..height {
            for x in 0..width {
                mask[y * width + x] = class.matches(frame.pixel(x as u32, y as u32));
            }
        }

        let mut visited = vec![false; width * height];
        let mut detections = Vec::new();
        let mut stack = Vec::new();
        for start in 0..mask.len() {
            if !mask[start] || visited[start] {
                continue;
            }
            visited[start] = true;
            stack.push(start);
            let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
            let (mut max_x, mut max_y) = (0usize, 0usize);
            let mut count = 0usize;
            while let Some(idx) = stack.pop() {
                let (x, y) = (idx % width, idx / width);
                count += 1;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);

                let mut visit = |n: usize| {
                    if mask[n] && !visited[n] {
                        visited[n] = true;
                        stack.push(n);
                    }
                };
                if x > 0 {
                    visit(idx - 1);
                }
                if x + 1 < width {
                    visit(idx + 1);
                }
                if y > 0 {
                    visit(idx - width);
                }
                if y + 1 < height {
                    visit(idx + width);
                }
            }
            if count < self.min_pixels {
                continue;
            }
            let bbox = BBox {
                x1: min_x as f32,
                y1: min_y as f32,
                x2: (max_x + 1) as f32,
                y2: (max_y + 1) as f32,
            };
            let confidence = (count as f32 / bbox.area()).clamp(0.0, 1.0);
            detections.push(Detection {
                class_name: class.class_name.clone(),
                confidence,
                bbox,
            });
        }
        detections
    }
}

impl DetectorBackend for ColorBlobBackend {
    fn name(&self) -> &'static str {
        "color_blob"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let mut detections = Vec::new();
        for class in &self.classes {
            detections.extend(self.regions(frame, class));
        }
        Ok(detections)
    }

    fn supported_classes(&self) -> Vec<String> {
        self.classes.iter().map(|c| c.class_name.clone()).collect()
    }
}
