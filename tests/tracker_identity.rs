use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use robosort::{Detection, ObjectTracker, TrackerConfig};

fn bottle() -> Detection {
    Detection::new("bottle", 0.9, (10.0, 10.0, 50.0, 50.0)).unwrap()
}

fn tracker(max_disappeared: u32) -> ObjectTracker {
    ObjectTracker::new(TrackerConfig {
        max_disappeared,
        max_match_distance: None,
    })
}

#[test]
fn reappearing_within_the_window_keeps_the_id() {
    let mut tracker = tracker(10);
    let first = tracker.update(&[bottle()]);
    tracker.update(&[]);
    let third = tracker.update(&[bottle()]);
    assert_eq!(first.registered, third.matched);
}

#[test]
fn absent_for_exactly_max_disappeared_cycles_is_kept() {
    let mut tracker = tracker(3);
    let id = tracker.update(&[bottle()]).registered[0];
    for _ in 0..3 {
        assert!(tracker.update(&[]).evicted.is_empty());
    }
    let back = tracker.update(&[bottle()]);
    assert_eq!(back.matched, vec![id]);
}

#[test]
fn absent_longer_than_max_disappeared_gets_a_new_id() {
    let mut tracker = tracker(3);
    let id = tracker.update(&[bottle()]).registered[0];
    for _ in 0..3 {
        tracker.update(&[]);
    }
    let gone = tracker.update(&[]);
    assert_eq!(gone.evicted, vec![id]);
    assert!(tracker.is_empty());

    let back = tracker.update(&[bottle()]);
    assert_eq!(back.registered.len(), 1);
    assert_ne!(back.registered[0], id);
}

#[test]
fn ids_are_never_reused_under_random_traffic() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut tracker = tracker(2);
    let mut issued = HashSet::new();

    for _ in 0..300 {
        let count = rng.gen_range(0..5);
        let detections: Vec<Detection> = (0..count)
            .map(|_| {
                let x = rng.gen_range(0.0..300.0f32);
                let y = rng.gen_range(0.0..220.0f32);
                Detection::new("cup", 0.8, (x, y, x + 15.0, y + 15.0)).unwrap()
            })
            .collect();
        let update = tracker.update(&detections);
        for id in update.registered {
            assert!(issued.insert(id), "track id {} issued twice", id);
        }

        let live: Vec<u64> = tracker.objects().map(|o| o.track_id).collect();
        let unique: HashSet<u64> = live.iter().copied().collect();
        assert_eq!(live.len(), unique.len());
        assert!(tracker
            .objects()
            .all(|o| o.disappeared_count <= tracker.config().max_disappeared));
    }
}
