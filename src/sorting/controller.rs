//! Sort-operation state machine.
//!
//! One `sort_object` call walks a single object through
//! `Resolving -> Navigating -> Gripping -> Transporting -> Placing -> Done`.
//! Any non-terminal phase may end in `Failed`, which records the phase and a
//! `FailureReason`. Nothing is retried inside an attempt.
//!
//! The controller is the only writer of zone occupancy. It owns the
//! `ZoneManager`, so a second controller cannot race it.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::strategy::{SortingStrategy, StrategyKind};
use super::target::SortTarget;
use super::zones::{ZoneError, ZoneManager};
use crate::robot::RobotLink;
use crate::telemetry::Telemetry;
use crate::Position;

// ----------------------------------------------------------------------------
// Phases, reasons, outcomes
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortPhase {
    Resolving,
    Navigating,
    Gripping,
    Transporting,
    Placing,
    Done,
    Failed,
}

impl SortPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortPhase::Resolving => "resolving",
            SortPhase::Navigating => "navigating",
            SortPhase::Gripping => "gripping",
            SortPhase::Transporting => "transporting",
            SortPhase::Placing => "placing",
            SortPhase::Done => "done",
            SortPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SortPhase::Done | SortPhase::Failed)
    }
}

impl std::fmt::Display for SortPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    ZoneNotFound,
    /// Only produced under `CapacityPolicy::RefuseWhenFull`.
    ZoneFull,
    NavigationFailed,
    PickupFailed,
    /// The robot is still holding the object.
    TransportFailed,
    PlacementFailed,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::ZoneNotFound => "zone_not_found",
            FailureReason::ZoneFull => "zone_full",
            FailureReason::NavigationFailed => "navigation_failed",
            FailureReason::PickupFailed => "pickup_failed",
            FailureReason::TransportFailed => "transport_failed",
            FailureReason::PlacementFailed => "placement_failed",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
impl std::error::Error for FailureReason {}

/// What happens when the resolved zone is already at capacity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityPolicy {
    /// Place anyway; occupancy is not incremented and a warning is flagged.
    #[default]
    WarnAfterPlacement,
    /// Fail in `Resolving` before the robot touches the object.
    RefuseWhenFull,
}

impl std::str::FromStr for CapacityPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "warn_after_placement" => Ok(CapacityPolicy::WarnAfterPlacement),
            "refuse_when_full" => Ok(CapacityPolicy::RefuseWhenFull),
            other => Err(anyhow!(
                "unknown capacity policy '{}' (expected warn_after_placement or refuse_when_full)",
                other
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SortOutcome {
    Done {
        zone: String,
        /// Placement happened but the zone was already full.
        capacity_warning: bool,
        phases: Vec<SortPhase>,
    },
    Failed {
        phase: SortPhase,
        reason: FailureReason,
        detail: String,
        phases: Vec<SortPhase>,
    },
}

impl SortOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, SortOutcome::Done { .. })
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            SortOutcome::Done { .. } => None,
            SortOutcome::Failed { reason, .. } => Some(*reason),
        }
    }

    /// Phases entered before the terminal state, in order.
    pub fn phases(&self) -> &[SortPhase] {
        match self {
            SortOutcome::Done { phases, .. } | SortOutcome::Failed { phases, .. } => phases,
        }
    }
}

impl std::fmt::Display for SortOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SortOutcome::Done {
                zone,
                capacity_warning,
                ..
            } => {
                write!(f, "done -> {}", zone)?;
                if *capacity_warning {
                    write!(f, " (capacity exceeded)")?;
                }
                Ok(())
            }
            SortOutcome::Failed {
                phase,
                reason,
                detail,
                ..
            } => write!(f, "failed in {}: {} ({})", phase, reason, detail),
        }
    }
}

/// Read-only snapshot of controller counters and zone occupancy.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SortStatistics {
    pub total_sorted: u64,
    pub strategy_kind: String,
    pub zone_count: usize,
    pub per_zone_occupancy: BTreeMap<String, u32>,
    pub failed: u64,
    pub capacity_warnings: u64,
    pub failures_by_reason: BTreeMap<String, u64>,
}

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Maps a bbox centroid in pixels to a robot-relative offset in metres.
///
/// `dx` grows as the object sits higher in the image (further from the
/// robot), `dy` grows as it sits further left of `origin_px`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    /// Pixel the gripper reaches without moving.
    pub origin_px: (f32, f32),
    pub metres_per_pixel: f32,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            origin_px: (160.0, 240.0),
            metres_per_pixel: 0.002,
        }
    }
}

impl Projection {
    pub fn offset(&self, centroid: (f32, f32)) -> (f32, f32) {
        let dx = (self.origin_px.1 - centroid.1) * self.metres_per_pixel;
        let dy = (self.origin_px.0 - centroid.0) * self.metres_per_pixel;
        (dx, dy)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    pub movement_speed: f32,
    /// Pause between opening the gripper and closing it on the object.
    pub gripper_settle: Duration,
    pub capacity_policy: CapacityPolicy,
    pub projection: Projection,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            movement_speed: 0.5,
            gripper_settle: Duration::from_millis(500),
            capacity_policy: CapacityPolicy::default(),
            projection: Projection::default(),
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.movement_speed) {
            return Err(anyhow!(
                "movement speed {} must be within [0, 1]",
                self.movement_speed
            ));
        }
        if !self.projection.metres_per_pixel.is_finite() || self.projection.metres_per_pixel <= 0.0
        {
            return Err(anyhow!("projection metres_per_pixel must be positive"));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Controller
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Counters {
    total_sorted: u64,
    failed: u64,
    capacity_warnings: u64,
    failures_by_reason: BTreeMap<FailureReason, u64>,
}

struct SortFailure {
    reason: FailureReason,
    detail: String,
}

impl SortFailure {
    fn new(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

/// Per-attempt state. Dropped when the attempt terminates.
struct SortOperation<'a> {
    target: &'a SortTarget,
    zone: Option<(String, Position)>,
    capacity_warning: bool,
}

impl SortOperation<'_> {
    fn zone(&self) -> Result<(String, Position), SortFailure> {
        self.zone.clone().ok_or_else(|| {
            SortFailure::new(FailureReason::ZoneNotFound, "no zone resolved for object")
        })
    }
}

pub struct SortingController<R: RobotLink> {
    robot: R,
    zones: ZoneManager,
    strategy: SortingStrategy,
    config: ControllerConfig,
    telemetry: Telemetry,
    /// Dead-reckoned from successful moves.
    pose: Position,
    /// True from a successful grab until a successful release or open.
    holding: bool,
    counters: Counters,
}

impl<R: RobotLink> SortingController<R> {
    pub fn new(
        robot: R,
        zones: ZoneManager,
        strategy: SortingStrategy,
        config: ControllerConfig,
        telemetry: Telemetry,
    ) -> Result<Self> {
        config.validate()?;
        strategy.validate(&zones)?;
        Ok(Self {
            robot,
            zones,
            strategy,
            config,
            telemetry,
            pose: Position::ORIGIN,
            holding: false,
            counters: Counters::default(),
        })
    }

    /// Run one sort attempt to a terminal phase.
    pub fn sort_object(&mut self, target: &SortTarget) -> SortOutcome {
        self.telemetry.sort_attempt();
        let mut op = SortOperation {
            target,
            zone: None,
            capacity_warning: false,
        };
        let mut phases = Vec::with_capacity(5);
        let mut phase = SortPhase::Resolving;
        let mut failure = None;

        while !phase.is_terminal() {
            phases.push(phase);
            self.telemetry
                .debug(format_args!("sort {}: entering {}", target, phase));
            phase = match self.step(phase, &mut op) {
                Ok(next) => next,
                Err(err) => {
                    failure = Some((phase, err));
                    SortPhase::Failed
                }
            };
        }

        let outcome = match failure {
            None => {
                let zone = op.zone.map(|(name, _)| name).unwrap_or_default();
                SortOutcome::Done {
                    zone,
                    capacity_warning: op.capacity_warning,
                    phases,
                }
            }
            Some((phase, err)) => SortOutcome::Failed {
                phase,
                reason: err.reason,
                detail: err.detail,
                phases,
            },
        };
        self.record(target, &outcome);
        outcome
    }

    /// Sort each target in order and return how many reached `Done`.
    /// A failed object never stops the batch.
    pub fn sort_batch(&mut self, targets: &[SortTarget]) -> usize {
        targets
            .iter()
            .filter(|target| self.sort_object(target).is_done())
            .count()
    }

    pub fn statistics(&self) -> SortStatistics {
        SortStatistics {
            total_sorted: self.counters.total_sorted,
            strategy_kind: self.strategy.kind().as_str().to_string(),
            zone_count: self.zones.len(),
            per_zone_occupancy: self.zones.occupancy_snapshot(),
            failed: self.counters.failed,
            capacity_warnings: self.counters.capacity_warnings,
            failures_by_reason: self
                .counters
                .failures_by_reason
                .iter()
                .map(|(reason, count)| (reason.as_str().to_string(), *count))
                .collect(),
        }
    }

    /// Clear attempt counters. Zone occupancy is physical state and stays.
    pub fn reset_statistics(&mut self) {
        self.counters = Counters::default();
    }

    /// Swap the strategy; refused if it could name an unknown zone.
    pub fn set_strategy(&mut self, strategy: SortingStrategy) -> Result<()> {
        strategy.validate(&self.zones)?;
        self.telemetry.info(format_args!(
            "sorting strategy changed: {} -> {}",
            self.strategy.kind(),
            strategy.kind()
        ));
        self.strategy = strategy;
        Ok(())
    }

    pub fn strategy(&self) -> &SortingStrategy {
        &self.strategy
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    pub fn zone_manager(&self) -> &ZoneManager {
        &self.zones
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn pose(&self) -> Position {
        self.pose
    }

    /// Whether the gripper may still hold an object (after a failed
    /// transport or placement).
    pub fn may_be_holding(&self) -> bool {
        self.holding
    }

    pub fn robot(&self) -> &R {
        &self.robot
    }

    pub fn robot_mut(&mut self) -> &mut R {
        &mut self.robot
    }

    /// Let go of an object left in the gripper by a failed transport or
    /// placement, wherever the robot stands. Returns whether anything was
    /// set down. The object is not counted against any zone.
    pub fn set_down_held(&mut self) -> Result<bool> {
        if !self.holding {
            return Ok(false);
        }
        self.robot.release()?;
        self.holding = false;
        self.telemetry.warn(format_args!(
            "set down held object at ({:.3}, {:.3}) outside any zone",
            self.pose.x, self.pose.y
        ));
        Ok(true)
    }

    /// Halt the chassis and open the gripper if it may hold something.
    pub fn emergency_stop(&mut self) -> Result<()> {
        let stopped = self.robot.stop();
        if self.holding {
            self.telemetry
                .warn(format_args!("emergency stop while holding an object; opening gripper"));
            self.robot.open_gripper()?;
            self.holding = false;
        }
        stopped
    }

    fn step(&mut self, phase: SortPhase, op: &mut SortOperation<'_>) -> Result<SortPhase, SortFailure> {
        match phase {
            SortPhase::Resolving => self.resolve(op),
            SortPhase::Navigating => self.navigate(op),
            SortPhase::Gripping => self.grip(),
            SortPhase::Transporting => self.transport(op),
            SortPhase::Placing => self.place(op),
            SortPhase::Done | SortPhase::Failed => Ok(phase),
        }
    }

    fn resolve(&mut self, op: &mut SortOperation<'_>) -> Result<SortPhase, SortFailure> {
        let name = self.strategy.determine_zone(op.target);
        let zone = self.zones.get_zone(name).ok_or_else(|| {
            SortFailure::new(
                FailureReason::ZoneNotFound,
                format!("strategy resolved unknown zone '{}'", name),
            )
        })?;
        if self.config.capacity_policy == CapacityPolicy::RefuseWhenFull && zone.is_full() {
            return Err(SortFailure::new(
                FailureReason::ZoneFull,
                format!("zone '{}' is full ({})", zone.name(), zone.capacity()),
            ));
        }
        op.zone = Some((zone.name().to_string(), zone.position()));
        Ok(SortPhase::Navigating)
    }

    fn navigate(&mut self, op: &SortOperation<'_>) -> Result<SortPhase, SortFailure> {
        let (dx, dy) = self.config.projection.offset(op.target.centroid());
        self.robot
            .move_by(dx, dy, 0.0, self.config.movement_speed)
            .map_err(|e| SortFailure::new(FailureReason::NavigationFailed, e.to_string()))?;
        self.pose = self.pose.offset(dx, dy);
        Ok(SortPhase::Gripping)
    }

    fn grip(&mut self) -> Result<SortPhase, SortFailure> {
        if let Err(e) = self.robot.open_gripper() {
            return Err(self.recover_gripper(format!("open: {}", e)));
        }
        if !self.config.gripper_settle.is_zero() {
            std::thread::sleep(self.config.gripper_settle);
        }
        if let Err(e) = self.robot.grab() {
            return Err(self.recover_gripper(format!("grab: {}", e)));
        }
        self.holding = true;
        Ok(SortPhase::Transporting)
    }

    /// Reopen the gripper after a failed pickup so it is never left closed
    /// on nothing. The recovery result is folded into the failure detail.
    fn recover_gripper(&mut self, detail: String) -> SortFailure {
        let detail = match self.robot.open_gripper() {
            Ok(()) => format!("{}; gripper reopened", detail),
            Err(e) => {
                self.telemetry
                    .error(format_args!("gripper recovery failed: {}", e));
                format!("{}; gripper recovery failed: {}", detail, e)
            }
        };
        SortFailure::new(FailureReason::PickupFailed, detail)
    }

    fn transport(&mut self, op: &SortOperation<'_>) -> Result<SortPhase, SortFailure> {
        let (zone, position) = op.zone()?;
        let (dx, dy) = self.pose.delta_to(position);
        self.robot
            .move_by(dx, dy, 0.0, self.config.movement_speed)
            .map_err(|e| {
                SortFailure::new(
                    FailureReason::TransportFailed,
                    format!("moving to '{}': {}; object still held", zone, e),
                )
            })?;
        self.pose = position;
        Ok(SortPhase::Placing)
    }

    fn place(&mut self, op: &mut SortOperation<'_>) -> Result<SortPhase, SortFailure> {
        let (zone, _) = op.zone()?;
        self.robot.release().map_err(|e| {
            SortFailure::new(
                FailureReason::PlacementFailed,
                format!("release at '{}': {}", zone, e),
            )
        })?;
        self.holding = false;
        match self.zones.add_object(&zone) {
            Ok(count) => {
                self.telemetry
                    .debug(format_args!("zone '{}' occupancy now {}", zone, count));
            }
            Err(err @ ZoneError::CapacityExceeded { .. }) => {
                op.capacity_warning = true;
                self.telemetry.capacity_warning();
                self.telemetry
                    .warn(format_args!("{}; object placed anyway", err));
            }
            Err(err) => {
                op.capacity_warning = true;
                self.telemetry
                    .error(format_args!("occupancy update for '{}' failed: {}", zone, err));
            }
        }
        Ok(SortPhase::Done)
    }

    fn record(&mut self, target: &SortTarget, outcome: &SortOutcome) {
        match outcome {
            SortOutcome::Done {
                capacity_warning, ..
            } => {
                self.counters.total_sorted += 1;
                if *capacity_warning {
                    self.counters.capacity_warnings += 1;
                }
                self.telemetry.info(format_args!("sorted {}: {}", target, outcome));
            }
            SortOutcome::Failed { reason, .. } => {
                self.counters.failed += 1;
                *self.counters.failures_by_reason.entry(*reason).or_insert(0) += 1;
                self.telemetry.sort_failure();
                self.telemetry.warn(format_args!("sort {}: {}", target, outcome));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BBox;
    use crate::robot::{GripperState, RobotCommand, SimulatedRobot};

    fn zones(capacity: u32) -> ZoneManager {
        let mut zones = ZoneManager::new();
        zones
            .create_zone("zone_a", Position::new(1.0, 0.5), capacity)
            .unwrap();
        zones
            .create_zone("zone_b", Position::new(1.0, 1.5), capacity)
            .unwrap();
        zones
            .create_zone("zone_default", Position::new(0.5, 1.5), capacity)
            .unwrap();
        zones
    }

    fn strategy() -> SortingStrategy {
        let mapping = BTreeMap::from([
            ("cup".to_string(), "zone_a".to_string()),
            ("bottle".to_string(), "zone_b".to_string()),
        ]);
        SortingStrategy::class_based(mapping, "zone_default")
    }

    fn config() -> ControllerConfig {
        ControllerConfig {
            gripper_settle: Duration::ZERO,
            ..ControllerConfig::default()
        }
    }

    fn controller(robot: SimulatedRobot, capacity: u32) -> SortingController<SimulatedRobot> {
        let mut robot = robot;
        robot.connect().unwrap();
        SortingController::new(
            robot,
            zones(capacity),
            strategy(),
            config(),
            Telemetry::new("test"),
        )
        .unwrap()
    }

    fn target(class: &str) -> SortTarget {
        SortTarget {
            track_id: Some(0),
            class_name: class.to_string(),
            confidence: 0.9,
            bbox: BBox::new(140.0, 180.0, 180.0, 220.0).unwrap(),
        }
    }

    #[test]
    fn cup_lands_in_zone_a() {
        let mut ctl = controller(SimulatedRobot::new("sim://"), 10);
        let outcome = ctl.sort_object(&target("cup"));
        assert_eq!(
            outcome,
            SortOutcome::Done {
                zone: "zone_a".to_string(),
                capacity_warning: false,
                phases: vec![
                    SortPhase::Resolving,
                    SortPhase::Navigating,
                    SortPhase::Gripping,
                    SortPhase::Transporting,
                    SortPhase::Placing,
                ],
            }
        );
        let stats = ctl.statistics();
        assert_eq!(stats.total_sorted, 1);
        assert_eq!(stats.per_zone_occupancy["zone_a"], 1);
        assert_eq!(stats.per_zone_occupancy["zone_b"], 0);
        assert_eq!(ctl.pose(), Position::new(1.0, 0.5));
        assert_eq!(ctl.robot().gripper(), GripperState::Open);
    }

    #[test]
    fn unmapped_class_goes_to_default_zone() {
        let mut ctl = controller(SimulatedRobot::new("sim://"), 10);
        let outcome = ctl.sort_object(&target("spoon"));
        assert!(outcome.is_done());
        assert_eq!(ctl.statistics().per_zone_occupancy["zone_default"], 1);
    }

    #[test]
    fn failed_grab_reopens_gripper_before_reporting() {
        let mut ctl = controller(SimulatedRobot::new("sim://").fail_grab_on(1), 10);
        let outcome = ctl.sort_object(&target("cup"));
        assert_eq!(outcome.failure_reason(), Some(FailureReason::PickupFailed));
        match &outcome {
            SortOutcome::Failed { phase, .. } => assert_eq!(*phase, SortPhase::Gripping),
            other => panic!("unexpected outcome {:?}", other),
        }
        let commands = ctl.robot().commands();
        let grab = commands
            .iter()
            .position(|c| *c == RobotCommand::Grab)
            .unwrap();
        assert_eq!(commands.get(grab + 1), Some(&RobotCommand::Open));
        assert_eq!(ctl.robot().gripper(), GripperState::Open);
        assert!(!ctl.may_be_holding());
        assert_eq!(ctl.statistics().total_sorted, 0);
    }

    #[test]
    fn failed_open_also_attempts_recovery() {
        let mut ctl = controller(SimulatedRobot::new("sim://").fail_open_on(1), 10);
        let outcome = ctl.sort_object(&target("cup"));
        assert_eq!(outcome.failure_reason(), Some(FailureReason::PickupFailed));
        let opens = ctl
            .robot()
            .commands()
            .iter()
            .filter(|c| **c == RobotCommand::Open)
            .count();
        assert_eq!(opens, 2);
    }

    #[test]
    fn transport_failure_keeps_object_held() {
        let mut ctl = controller(SimulatedRobot::new("sim://").fail_move_on(2), 10);
        let outcome = ctl.sort_object(&target("bottle"));
        assert_eq!(outcome.failure_reason(), Some(FailureReason::TransportFailed));
        assert!(ctl.may_be_holding());
        assert_eq!(ctl.robot().gripper(), GripperState::Holding);
        ctl.emergency_stop().unwrap();
        assert!(!ctl.may_be_holding());
        assert_eq!(ctl.robot().gripper(), GripperState::Open);
    }

    #[test]
    fn held_object_is_set_down_outside_any_zone() {
        let mut ctl = controller(SimulatedRobot::new("sim://").fail_move_on(2), 10);
        assert!(!ctl.set_down_held().unwrap());
        ctl.sort_object(&target("bottle"));
        assert!(ctl.may_be_holding());

        assert!(ctl.set_down_held().unwrap());
        assert!(!ctl.may_be_holding());
        assert_eq!(ctl.robot().gripper(), GripperState::Open);
        assert!(ctl
            .zone_manager()
            .zones()
            .all(|zone| zone.occupied_count() == 0));
        assert!(!ctl.set_down_held().unwrap());
    }

    #[test]
    fn full_zone_warns_after_placement_by_default() {
        let mut ctl = controller(SimulatedRobot::new("sim://"), 1);
        assert!(ctl.sort_object(&target("cup")).is_done());
        let outcome = ctl.sort_object(&target("cup"));
        match outcome {
            SortOutcome::Done {
                capacity_warning, ..
            } => assert!(capacity_warning),
            other => panic!("unexpected outcome {:?}", other),
        }
        let stats = ctl.statistics();
        assert_eq!(stats.total_sorted, 2);
        assert_eq!(stats.capacity_warnings, 1);
        assert_eq!(stats.per_zone_occupancy["zone_a"], 1);
    }

    #[test]
    fn refuse_when_full_fails_before_moving() {
        let mut robot = SimulatedRobot::new("sim://");
        robot.connect().unwrap();
        let config = ControllerConfig {
            capacity_policy: CapacityPolicy::RefuseWhenFull,
            ..config()
        };
        let mut ctl =
            SortingController::new(robot, zones(1), strategy(), config, Telemetry::default())
                .unwrap();
        assert!(ctl.sort_object(&target("cup")).is_done());
        let commands_before = ctl.robot().commands().len();
        let outcome = ctl.sort_object(&target("cup"));
        assert_eq!(outcome.failure_reason(), Some(FailureReason::ZoneFull));
        assert_eq!(outcome.phases(), &[SortPhase::Resolving]);
        assert_eq!(ctl.robot().commands().len(), commands_before);
    }

    #[test]
    fn batch_counts_only_done_and_continues_past_failures() {
        // Move 1 fails the first object at navigation, move 3 fails the
        // second at transport; the last two objects use moves 4 to 7.
        let robot = SimulatedRobot::new("sim://").fail_move_on(1).fail_move_on(3);
        let mut ctl = controller(robot, 10);
        let batch = vec![target("cup"), target("bottle"), target("cup"), target("spoon")];
        let done = ctl.sort_batch(&batch);
        assert_eq!(done, 2);
        let stats = ctl.statistics();
        assert_eq!(stats.total_sorted, 2);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.failures_by_reason["navigation_failed"], 1);
        assert_eq!(stats.failures_by_reason["transport_failed"], 1);

        assert_eq!(ctl.sort_batch(&[target("cup")]), 1);
        assert_eq!(ctl.statistics().total_sorted, 3);
    }

    #[test]
    fn set_strategy_is_validated() {
        let mut ctl = controller(SimulatedRobot::new("sim://"), 10);
        let bad = SortingStrategy::class_based(BTreeMap::new(), "zone_missing");
        assert!(ctl.set_strategy(bad).is_err());
        assert_eq!(ctl.strategy_kind(), StrategyKind::ClassBased);

        let by_confidence = SortingStrategy::confidence_based(
            vec![crate::sorting::ConfidenceBand {
                min_confidence: 0.8,
                zone: "zone_b".to_string(),
            }],
            "zone_default",
        );
        ctl.set_strategy(by_confidence).unwrap();
        assert_eq!(ctl.statistics().strategy_kind, "confidence_based");
        ctl.sort_object(&target("cup"));
        assert_eq!(ctl.statistics().per_zone_occupancy["zone_b"], 1);
    }

    #[test]
    fn reset_statistics_keeps_occupancy() {
        let mut ctl = controller(SimulatedRobot::new("sim://"), 10);
        ctl.sort_object(&target("cup"));
        ctl.reset_statistics();
        let stats = ctl.statistics();
        assert_eq!(stats.total_sorted, 0);
        assert_eq!(stats.per_zone_occupancy["zone_a"], 1);
    }

    #[test]
    fn projection_maps_origin_to_zero_offset() {
        let projection = Projection::default();
        assert_eq!(projection.offset((160.0, 240.0)), (0.0, 0.0));
        let (dx, dy) = projection.offset((110.0, 140.0));
        assert!((dx - 0.2).abs() < 1e-6);
        assert!((dy - 0.1).abs() < 1e-6);
    }
}
