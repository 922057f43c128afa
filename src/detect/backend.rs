use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// A backend wraps one detection model. It receives a frame and returns every
/// detection it found, unfiltered; confidence gating is done by `Detector`.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Classes this backend can report.
    fn supported_classes(&self) -> Vec<String>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Confidence-gated front end for a backend.
///
/// The confidence threshold is fixed at construction and validated to lie in
/// `[0, 1]`; `set_confidence_threshold` clamps instead of failing. With an IoU
/// threshold set, overlapping boxes of one class are suppressed in favour of
/// the most confident one.
pub struct Detector {
    backend: Arc<Mutex<dyn DetectorBackend>>,
    confidence_threshold: f32,
    iou_threshold: Option<f32>,
}

impl Detector {
    pub fn new<B: DetectorBackend + 'static>(backend: B, confidence_threshold: f32) -> Result<Self> {
        Self::from_shared(Arc::new(Mutex::new(backend)), confidence_threshold)
    }

    pub fn from_shared(
        backend: Arc<Mutex<dyn DetectorBackend>>,
        confidence_threshold: f32,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(anyhow!(
                "confidence threshold {} must be between 0.0 and 1.0",
                confidence_threshold
            ));
        }
        Ok(Self {
            backend,
            confidence_threshold,
            iou_threshold: None,
        })
    }

    pub fn with_iou_threshold(mut self, iou_threshold: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&iou_threshold) {
            return Err(anyhow!(
                "IoU threshold {} must be between 0.0 and 1.0",
                iou_threshold
            ));
        }
        self.iou_threshold = Some(iou_threshold);
        Ok(self)
    }

    pub fn iou_threshold(&self) -> Option<f32> {
        self.iou_threshold
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn set_confidence_threshold(&mut self, threshold: f32) {
        self.confidence_threshold = threshold.clamp(0.0, 1.0);
    }

    pub fn backend_name(&self) -> Result<&'static str> {
        let guard = self
            .backend
            .lock()
            .map_err(|_| anyhow!("detector backend lock poisoned"))?;
        Ok(guard.name())
    }

    pub fn warm_up(&self) -> Result<()> {
        let mut guard = self
            .backend
            .lock()
            .map_err(|_| anyhow!("detector backend lock poisoned"))?;
        guard.warm_up()
    }

    pub fn supported_classes(&self) -> Result<Vec<String>> {
        let guard = self
            .backend
            .lock()
            .map_err(|_| anyhow!("detector backend lock poisoned"))?;
        Ok(guard.supported_classes())
    }

    /// Detections at or above the confidence threshold.
    pub fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let mut guard = self
            .backend
            .lock()
            .map_err(|_| anyhow!("detector backend lock poisoned"))?;
        let mut detections = guard.detect(frame)?;
        drop(guard);
        detections.retain(|d| d.confidence >= self.confidence_threshold);
        match self.iou_threshold {
            Some(iou) => Ok(suppress_overlaps(detections, iou)),
            None => Ok(detections),
        }
    }

    /// Detections of one class only.
    pub fn detect_class(&self, frame: &Frame, class_name: &str) -> Result<Vec<Detection>> {
        let mut detections = self.detect(frame)?;
        detections.retain(|d| d.class_name == class_name);
        Ok(detections)
    }
}

/// Greedy per-class non-maximum suppression. Output keeps confidence order.
fn suppress_overlaps(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let overlaps = kept.iter().any(|k| {
            k.class_name == candidate.class_name && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}
