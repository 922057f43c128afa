//! Centroid tracker.
//!
//! Keeps a registry of tracked objects keyed by a monotonically increasing
//! track id. Each `update` matches the cycle's detections to existing objects
//! by nearest centroid; unmatched objects age, unmatched detections register.
//!
//! Matching is greedy in ascending track id order: each object claims its
//! nearest unclaimed detection, ties going to the lowest detection index.
//! Results are reproducible and an earlier track always chooses first.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::detect::{BBox, Detection, InvalidDetection};

#[derive(Clone, Debug)]
pub struct TrackerConfig {
    /// Consecutive missed cycles an object survives. Evicted once exceeded.
    pub max_disappeared: u32,
    /// Optional ceiling on match distance, in pixels. `None` matches any
    /// distance, so a stale track can capture a far-away detection.
    pub max_match_distance: Option<f32>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_disappeared: 10,
            max_match_distance: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrackedObject {
    pub track_id: u64,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BBox,
    pub centroid: (f32, f32),
    pub disappeared_count: u32,
}

impl TrackedObject {
    fn from_detection(track_id: u64, detection: &Detection) -> Self {
        Self {
            track_id,
            class_name: detection.class_name.clone(),
            confidence: detection.confidence,
            bbox: detection.bbox,
            centroid: detection.centroid(),
            disappeared_count: 0,
        }
    }

    fn refresh(&mut self, detection: &Detection) {
        self.class_name = detection.class_name.clone();
        self.confidence = detection.confidence;
        self.bbox = detection.bbox;
        self.centroid = detection.centroid();
        self.disappeared_count = 0;
    }

    /// Matched in the most recent cycle.
    pub fn is_visible(&self) -> bool {
        self.disappeared_count == 0
    }
}

/// What changed during one `update`.
#[derive(Clone, Debug, Default)]
pub struct TrackUpdate {
    pub matched: Vec<u64>,
    pub registered: Vec<u64>,
    pub evicted: Vec<u64>,
    /// Detections refused by input validation, by index in the input.
    pub rejected: Vec<(usize, InvalidDetection)>,
}

pub struct ObjectTracker {
    config: TrackerConfig,
    objects: BTreeMap<u64, TrackedObject>,
    next_id: u64,
}

impl ObjectTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            objects: BTreeMap::new(),
            next_id: 0,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn update(&mut self, detections: &[Detection]) -> TrackUpdate {
        let mut update = TrackUpdate::default();

        let mut valid: Vec<&Detection> = Vec::with_capacity(detections.len());
        for (index, detection) in detections.iter().enumerate() {
            match detection.validate() {
                Ok(()) => valid.push(detection),
                Err(err) => update.rejected.push((index, err)),
            }
        }

        let mut detection_used = vec![false; valid.len()];
        let mut object_matched: BTreeMap<u64, usize> = BTreeMap::new();
        for (track_id, object) in &self.objects {
            let mut best: Option<(f32, usize)> = None;
            for (det_index, detection) in valid.iter().enumerate() {
                if detection_used[det_index] {
                    continue;
                }
                let distance = centroid_distance(object.centroid, detection.centroid());
                if let Some(limit) = self.config.max_match_distance {
                    if distance > limit {
                        continue;
                    }
                }
                if best.map_or(true, |(d, _)| distance < d) {
                    best = Some((distance, det_index));
                }
            }
            if let Some((_, det_index)) = best {
                detection_used[det_index] = true;
                object_matched.insert(*track_id, det_index);
            }
        }

        for (track_id, object) in self.objects.iter_mut() {
            match object_matched.get(track_id) {
                Some(det_index) => {
                    object.refresh(valid[*det_index]);
                    update.matched.push(*track_id);
                }
                None => {
                    object.disappeared_count += 1;
                    if object.disappeared_count > self.config.max_disappeared {
                        update.evicted.push(*track_id);
                    }
                }
            }
        }
        for track_id in &update.evicted {
            self.objects.remove(track_id);
        }

        for (det_index, detection) in valid.iter().enumerate() {
            if !detection_used[det_index] {
                update.registered.push(self.register(detection));
            }
        }

        update
    }

    fn register(&mut self, detection: &Detection) -> u64 {
        let track_id = self.next_id;
        self.next_id += 1;
        self.objects
            .insert(track_id, TrackedObject::from_detection(track_id, detection));
        track_id
    }

    pub fn get(&self, track_id: u64) -> Option<&TrackedObject> {
        self.objects.get(&track_id)
    }

    /// All tracked objects in ascending track id order.
    pub fn objects(&self) -> impl Iterator<Item = &TrackedObject> {
        self.objects.values()
    }

    /// Objects matched in the most recent cycle.
    pub fn visible(&self) -> impl Iterator<Item = &TrackedObject> {
        self.objects.values().filter(|o| o.is_visible())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Drop every tracked object. Track ids are never reused.
    pub fn clear(&mut self) {
        self.objects.clear();
    }
}

impl Default for ObjectTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

fn centroid_distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class: &str, bbox: (f32, f32, f32, f32)) -> Detection {
        Detection::new(class, 0.9, bbox).unwrap()
    }

    #[test]
    fn empty_registry_registers_every_detection() {
        let mut tracker = ObjectTracker::default();
        let update = tracker.update(&[
            det("cup", (0.0, 0.0, 10.0, 10.0)),
            det("bottle", (50.0, 50.0, 60.0, 70.0)),
        ]);
        assert_eq!(update.registered, vec![0, 1]);
        assert_eq!(tracker.get(1).unwrap().centroid, (55.0, 60.0));
    }

    #[test]
    fn empty_cycle_ages_everything_and_creates_nothing() {
        let mut tracker = ObjectTracker::default();
        tracker.update(&[det("cup", (0.0, 0.0, 10.0, 10.0))]);
        let update = tracker.update(&[]);
        assert!(update.registered.is_empty());
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.get(0).unwrap().disappeared_count, 1);
        assert_eq!(tracker.visible().count(), 0);
    }

    #[test]
    fn bottle_survives_a_one_cycle_gap() {
        let mut tracker = ObjectTracker::new(TrackerConfig {
            max_disappeared: 10,
            max_match_distance: None,
        });
        let bottle = det("bottle", (10.0, 10.0, 50.0, 50.0));
        let first = tracker.update(&[bottle.clone()]);
        tracker.update(&[]);
        let third = tracker.update(&[bottle]);
        assert_eq!(first.registered, vec![0]);
        assert_eq!(third.matched, vec![0]);
        assert!(third.registered.is_empty());
        assert_eq!(tracker.get(0).unwrap().disappeared_count, 0);
    }

    #[test]
    fn ties_go_to_the_lowest_track_id() {
        let mut tracker = ObjectTracker::default();
        tracker.update(&[
            det("cup", (0.0, 0.0, 10.0, 10.0)),
            det("cup", (20.0, 0.0, 30.0, 10.0)),
        ]);
        // Centroid (15, 5) is 10px from both tracks.
        let update = tracker.update(&[det("cup", (10.0, 0.0, 20.0, 10.0))]);
        assert_eq!(update.matched, vec![0]);
        assert_eq!(tracker.get(1).unwrap().disappeared_count, 1);
    }

    #[test]
    fn well_separated_objects_keep_their_ids() {
        let mut tracker = ObjectTracker::default();
        tracker.update(&[
            det("cup", (0.0, 0.0, 10.0, 10.0)),
            det("cup", (100.0, 0.0, 110.0, 10.0)),
        ]);
        let update = tracker.update(&[
            det("cup", (98.0, 0.0, 108.0, 10.0)),
            det("cup", (3.0, 0.0, 13.0, 10.0)),
        ]);
        assert_eq!(update.matched, vec![0, 1]);
        assert_eq!(tracker.get(0).unwrap().centroid, (8.0, 5.0));
        assert_eq!(tracker.get(1).unwrap().centroid, (103.0, 5.0));
    }

    #[test]
    fn lower_track_id_claims_its_nearest_detection_first() {
        let mut tracker = ObjectTracker::default();
        tracker.update(&[
            det("cup", (0.0, 0.0, 10.0, 10.0)),
            det("cup", (10.0, 0.0, 20.0, 10.0)),
        ]);
        // (13, 5) is nearer to track 1, but track 0 chooses first.
        let update = tracker.update(&[
            det("cup", (8.0, 0.0, 18.0, 10.0)),
            det("cup", (100.0, 0.0, 110.0, 10.0)),
        ]);
        assert_eq!(update.matched, vec![0, 1]);
        assert!(update.registered.is_empty());
        assert_eq!(tracker.get(0).unwrap().centroid, (13.0, 5.0));
        assert_eq!(tracker.get(1).unwrap().centroid, (105.0, 5.0));
    }

    #[test]
    fn equidistant_detections_go_to_the_lowest_index() {
        let mut tracker = ObjectTracker::default();
        tracker.update(&[det("cup", (10.0, 0.0, 20.0, 10.0))]);
        let update = tracker.update(&[
            det("cup", (20.0, 0.0, 30.0, 10.0)),
            det("cup", (0.0, 0.0, 10.0, 10.0)),
        ]);
        assert_eq!(update.matched, vec![0]);
        assert_eq!(tracker.get(0).unwrap().centroid, (25.0, 5.0));
        assert_eq!(update.registered, vec![1]);
        assert_eq!(tracker.get(1).unwrap().centroid, (5.0, 5.0));
    }

    #[test]
    fn invalid_detection_is_rejected_without_failing_cycle() {
        let mut tracker = ObjectTracker::default();
        let bad = Detection {
            class_name: "cup".to_string(),
            confidence: 0.9,
            bbox: BBox::from((10.0, 10.0, 5.0, 20.0)),
        };
        let update = tracker.update(&[bad, det("cup", (0.0, 0.0, 4.0, 4.0))]);
        assert_eq!(update.rejected.len(), 1);
        assert_eq!(update.rejected[0].0, 0);
        assert_eq!(update.registered, vec![0]);
    }

    #[test]
    fn match_distance_ceiling_registers_far_detections() {
        let mut tracker = ObjectTracker::new(TrackerConfig {
            max_disappeared: 3,
            max_match_distance: Some(25.0),
        });
        tracker.update(&[det("cup", (0.0, 0.0, 10.0, 10.0))]);
        let update = tracker.update(&[det("cup", (200.0, 200.0, 210.0, 210.0))]);
        assert!(update.matched.is_empty());
        assert_eq!(update.registered, vec![1]);
        assert_eq!(tracker.get(0).unwrap().disappeared_count, 1);
    }
}
