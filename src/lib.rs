//! Perception-to-action sorting kernel.
//!
//! This crate drives a mobile robot that watches a camera stream, detects
//! objects of known classes, tracks them across frames and physically moves
//! each tracked object into a target zone chosen by a sorting strategy.
//!
//! # Architecture
//!
//! Two lanes share exactly one mutable resource:
//!
//! 1. **Producer lane**: `FrameSource` refreshes a single-slot `FrameSlot` from
//!    a `CameraDevice` on a background thread.
//! 2. **Consumer lane**: `SortingPipeline` pulls the newest frame, runs the
//!    `Detector`, updates the `ObjectTracker` and hands one candidate at a time
//!    to the `SortingController` state machine, which drives the `RobotLink`
//!    and records confirmed placements in the `ZoneManager`.
//!
//! # Module Structure
//!
//! - `frame`: frames, the guarded frame slot and the background frame source
//! - `ingest`: camera devices (synthetic `stub://` scenes)
//! - `detect`: detections, detector backends and the backend registry
//! - `tracker`: centroid tracker with stable track ids
//! - `robot`: robot link interface and the simulated robot
//! - `sorting`: zones, strategies and the sort state machine
//! - `pipeline`: the consumer lane and the main run loop

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod robot;
pub mod sorting;
pub mod telemetry;
pub mod tracker;

pub use detect::{BBox, BackendRegistry, Detection, Detector, DetectorBackend, InvalidDetection};
pub use frame::{Frame, FrameSlot, FrameSource, FrameSourceConfig, FrameSourceStats};
pub use ingest::{open_camera, CameraDevice, CameraError, SyntheticCamera, SyntheticObject};
pub use pipeline::{CycleReport, PipelineConfig, RunSummary, SortingPipeline, StopReason};
pub use robot::{open_robot, RobotLink, SimulatedRobot};
pub use sorting::{
    CapacityPolicy, ControllerConfig, FailureReason, Projection, SortOutcome, SortPhase,
    SortStatistics, SortTarget, SortingController, SortingStrategy, StrategyKind, Zone, ZoneError,
    ZoneManager,
};
pub use telemetry::{Telemetry, TelemetrySnapshot};
pub use tracker::{ObjectTracker, TrackUpdate, TrackedObject, TrackerConfig};

// -------------------- World Coordinates --------------------

/// A point on the floor plane, in metres.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub const ORIGIN: Position = Position { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Offset that moves `self` onto `target`.
    pub fn delta_to(&self, target: Position) -> (f32, f32) {
        (target.x - self.x, target.y - self.y)
    }

    pub fn offset(&self, dx: f32, dy: f32) -> Position {
        Position {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

impl From<(f32, f32)> for Position {
    fn from((x, y): (f32, f32)) -> Self {
        Self { x, y }
    }
}

// -------------------- Zone Names --------------------

/// Zone names are short local identifiers.
///
/// Allowed: "A", "zone_a", "Bin-3", "zone_default"
/// Disallowed: empty names, whitespace, control characters, more than 64 chars.
/// Case is preserved.
pub fn validate_zone_name(name: &str) -> Result<()> {
    static ZONE_NAME_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = ZONE_NAME_RE.get_or_init(|| {
        regex::Regex::new(r"^[^\s\p{Cc}]{1,64}$").expect("static zone name pattern")
    });
    if !re.is_match(name) {
        return Err(anyhow!(
            "zone name '{}' must be 1-64 characters without whitespace or control characters",
            name.escape_debug()
        ));
    }
    Ok(())
}
