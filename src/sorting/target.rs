use serde::Serialize;

use crate::detect::{BBox, Detection};
use crate::tracker::TrackedObject;

/// The object a sort operation acts on.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SortTarget {
    /// Present when the object came from the tracker.
    pub track_id: Option<u64>,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BBox,
}

impl SortTarget {
    pub fn area(&self) -> f32 {
        self.bbox.area()
    }

    pub fn centroid(&self) -> (f32, f32) {
        self.bbox.centroid()
    }
}

impl From<&Detection> for SortTarget {
    fn from(detection: &Detection) -> Self {
        Self {
            track_id: None,
            class_name: detection.class_name.clone(),
            confidence: detection.confidence,
            bbox: detection.bbox,
        }
    }
}

impl From<&TrackedObject> for SortTarget {
    fn from(object: &TrackedObject) -> Self {
        Self {
            track_id: Some(object.track_id),
            class_name: object.class_name.clone(),
            confidence: object.confidence,
            bbox: object.bbox,
        }
    }
}

impl std::fmt::Display for SortTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.track_id {
            Some(id) => write!(f, "#{} {} ({:.2})", id, self.class_name, self.confidence),
            None => write!(f, "{} ({:.2})", self.class_name, self.confidence),
        }
    }
}
