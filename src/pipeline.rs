//! Consumer lane: frame -> detect -> track -> filter -> sort.
//!
//! `SortingPipeline` owns every stage. One `run_cycle` pulls the newest frame
//! from the `FrameSource`, runs detection on every N-th fresh frame, updates
//! the tracker and hands at most one visible, not-yet-sorted target-class
//! object to the `SortingController`. `run` repeats cycles until the shutdown
//! flag flips or the runtime ceiling is reached.
//!
//! `shutdown` must run on every exit path; `Drop` calls it as a last resort.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::config::SortdConfig;
use crate::detect::{BackendRegistry, Detector};
use crate::frame::{FrameSource, FrameSourceStats};
use crate::ingest::CameraDevice;
use crate::robot::RobotLink;
use crate::sorting::{SortOutcome, SortStatistics, SortTarget, SortingController};
use crate::telemetry::Telemetry;
use crate::tracker::ObjectTracker;

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Only objects of these classes are sorted.
    pub target_classes: Vec<String>,
    /// Run detection on every N-th fresh frame. Values below 1 act as 1.
    pub detection_interval: u32,
    /// Sleep after a cycle that found no fresh frame.
    pub idle_backoff: Duration,
    /// Wall-clock ceiling for `run`. `None` runs until interrupted.
    pub max_runtime: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_classes: vec!["bottle".to_string(), "cup".to_string()],
            detection_interval: 1,
            idle_backoff: Duration::from_millis(100),
            max_runtime: None,
        }
    }
}

/// What one cycle did.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CycleReport {
    /// Sequence of the frame processed; `None` when no fresh frame was ready.
    pub frame_sequence: Option<u64>,
    pub detection_ran: bool,
    pub detections: usize,
    pub tracked: usize,
    pub rejected: usize,
    /// An object left in the gripper by an earlier failure was set down
    /// this cycle instead of starting a new sort.
    pub set_down_held: bool,
    pub target: Option<SortTarget>,
    pub outcome: Option<SortOutcome>,
}

impl CycleReport {
    pub fn frame_absent(&self) -> bool {
        self.frame_sequence.is_none()
    }

    pub fn sorted(&self) -> bool {
        self.outcome.as_ref().is_some_and(SortOutcome::is_done)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Interrupted,
    RuntimeCeiling,
    CycleLimit,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub cycles: u64,
    pub frames_absent: u64,
    pub detections_run: u64,
    pub sort_attempts: u64,
    pub sorted: u64,
    pub failed: u64,
    pub elapsed_ms: u64,
    pub stop_reason: StopReason,
}

impl RunSummary {
    fn new() -> Self {
        Self {
            cycles: 0,
            frames_absent: 0,
            detections_run: 0,
            sort_attempts: 0,
            sorted: 0,
            failed: 0,
            elapsed_ms: 0,
            stop_reason: StopReason::Interrupted,
        }
    }

    fn absorb(&mut self, report: &CycleReport) {
        self.cycles += 1;
        if report.frame_absent() {
            self.frames_absent += 1;
        }
        if report.detection_ran {
            self.detections_run += 1;
        }
        if let Some(outcome) = &report.outcome {
            self.sort_attempts += 1;
            if outcome.is_done() {
                self.sorted += 1;
            } else {
                self.failed += 1;
            }
        }
    }
}

pub struct SortingPipeline<R: RobotLink = Box<dyn RobotLink>> {
    frames: FrameSource,
    detector: Detector,
    tracker: ObjectTracker,
    controller: SortingController<R>,
    config: PipelineConfig,
    telemetry: Telemetry,
    target_classes: HashSet<String>,
    /// Tracks that reached `Done`; never offered again.
    sorted_tracks: HashSet<u64>,
    last_sequence: Option<u64>,
    fresh_frames: u64,
    started: bool,
    shut_down: bool,
}

impl<R: RobotLink> SortingPipeline<R> {
    pub fn new(
        frames: FrameSource,
        detector: Detector,
        tracker: ObjectTracker,
        controller: SortingController<R>,
        config: PipelineConfig,
        telemetry: Telemetry,
    ) -> Self {
        let target_classes = config.target_classes.iter().cloned().collect();
        Self {
            frames,
            detector,
            tracker,
            controller,
            config,
            telemetry,
            target_classes,
            sorted_tracks: HashSet::new(),
            last_sequence: None,
            fresh_frames: 0,
            started: false,
            shut_down: false,
        }
    }

    /// Assemble every stage from a validated configuration.
    pub fn from_config(
        cfg: &SortdConfig,
        camera: Box<dyn CameraDevice>,
        robot: R,
        registry: &BackendRegistry,
        telemetry: Telemetry,
    ) -> Result<Self> {
        let frames = FrameSource::new(camera, cfg.frame_source_config(), telemetry.clone());
        let detector = registry
            .detector(cfg.detection.backend.as_deref(), cfg.detection.confidence)?
            .with_iou_threshold(cfg.detection.iou_threshold)?;
        let tracker = ObjectTracker::new(cfg.tracking.clone());
        let controller = SortingController::new(
            robot,
            cfg.zone_manager()?,
            cfg.strategy(),
            cfg.controller_config(),
            telemetry.clone(),
        )?;
        Ok(Self::new(
            frames,
            detector,
            tracker,
            controller,
            cfg.pipeline_config(),
            telemetry,
        ))
    }

    /// Connect the robot, start frame acquisition and warm up the detector.
    ///
    /// Any error here is a connection/initialization failure and is fatal.
    pub fn start(&mut self) -> Result<()> {
        if self.shut_down {
            return Err(anyhow!("pipeline already shut down"));
        }
        if self.started {
            return Ok(());
        }
        let robot = self.controller.robot_mut();
        let url = robot.url().to_string();
        robot
            .connect()
            .map_err(|e| anyhow!("robot {} connection failed: {}", url, e))?;
        self.frames.start()?;
        self.detector.warm_up()?;
        self.started = true;
        self.telemetry.info(format_args!(
            "pipeline started: robot {}, detector {}, classes [{}]",
            url,
            self.detector.backend_name()?,
            self.config.target_classes.join(", ")
        ));
        Ok(())
    }

    /// One pass through the consumer lane. Never blocks on the camera.
    pub fn run_cycle(&mut self) -> Result<CycleReport> {
        if !self.started {
            return Err(anyhow!("pipeline not started"));
        }
        self.telemetry.cycle();
        let mut report = CycleReport::default();

        let frame = match self.frames.read_newer(self.last_sequence) {
            Some(frame) => frame,
            None => {
                self.telemetry.frame_absent();
                return Ok(report);
            }
        };
        self.telemetry.frame_seen();
        self.last_sequence = Some(frame.sequence);
        report.frame_sequence = Some(frame.sequence);
        self.fresh_frames += 1;

        let interval = u64::from(self.config.detection_interval.max(1));
        if (self.fresh_frames - 1) % interval != 0 {
            return Ok(report);
        }

        let detections = self.detector.detect(&frame)?;
        report.detection_ran = true;
        report.detections = detections.len();

        let update = self.tracker.update(&detections);
        for (index, err) in &update.rejected {
            self.telemetry
                .warn(format_args!("detection {} rejected: {}", index, err));
        }
        for track_id in &update.evicted {
            self.sorted_tracks.remove(track_id);
        }
        report.rejected = update.rejected.len();
        report.tracked = self.tracker.len();

        // Never drive to a new object with the last one still in the gripper.
        if self.controller.may_be_holding() {
            match self.controller.set_down_held() {
                Ok(set_down) => report.set_down_held = set_down,
                Err(err) => self
                    .telemetry
                    .warn(format_args!("could not set down held object: {}", err)),
            }
            return Ok(report);
        }

        let candidate = self
            .tracker
            .visible()
            .find(|object| {
                self.target_classes.contains(&object.class_name)
                    && !self.sorted_tracks.contains(&object.track_id)
            })
            .map(SortTarget::from);

        if let Some(target) = candidate {
            let outcome = self.controller.sort_object(&target);
            if outcome.is_done() {
                if let Some(track_id) = target.track_id {
                    self.sorted_tracks.insert(track_id);
                }
            }
            report.target = Some(target);
            report.outcome = Some(outcome);
        }
        Ok(report)
    }

    /// Run until `shutdown` is set or the runtime ceiling is reached.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<RunSummary> {
        self.run_until(shutdown, None)
    }

    /// Run at most `cycles` cycles.
    pub fn run_cycles(&mut self, cycles: u64, shutdown: &AtomicBool) -> Result<RunSummary> {
        self.run_until(shutdown, Some(cycles))
    }

    fn run_until(&mut self, shutdown: &AtomicBool, max_cycles: Option<u64>) -> Result<RunSummary> {
        let started_at = Instant::now();
        let mut summary = RunSummary::new();
        summary.stop_reason = loop {
            if shutdown.load(Ordering::SeqCst) {
                break StopReason::Interrupted;
            }
            if let Some(limit) = self.config.max_runtime {
                if started_at.elapsed() >= limit {
                    break StopReason::RuntimeCeiling;
                }
            }
            if let Some(max) = max_cycles {
                if summary.cycles >= max {
                    break StopReason::CycleLimit;
                }
            }
            let report = self.run_cycle()?;
            summary.absorb(&report);
            if report.frame_absent() {
                std::thread::sleep(self.config.idle_backoff);
            }
        };
        summary.elapsed_ms = started_at.elapsed().as_millis() as u64;
        self.telemetry.info(format_args!(
            "run finished ({:?}): {} cycles, {} sorted, {} failed",
            summary.stop_reason, summary.cycles, summary.sorted, summary.failed
        ));
        Ok(summary)
    }

    /// Halt the robot, open the gripper if it may hold something, stop the
    /// frame source and disconnect. Idempotent; every step is attempted and
    /// the first error is returned.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        let mut first_err = None;

        if self.controller.robot().is_connected() {
            if let Err(err) = self.controller.emergency_stop() {
                self.telemetry
                    .error(format_args!("robot emergency stop failed: {}", err));
                first_err.get_or_insert(err);
            }
        }
        if let Err(err) = self.frames.stop() {
            self.telemetry
                .error(format_args!("frame source stop failed: {}", err));
            first_err.get_or_insert(err);
        }
        if self.controller.robot().is_connected() {
            if let Err(err) = self.controller.robot_mut().disconnect() {
                self.telemetry
                    .error(format_args!("robot disconnect failed: {}", err));
                first_err.get_or_insert(err);
            }
        }
        self.telemetry.info(format_args!("pipeline shut down"));
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn statistics(&self) -> SortStatistics {
        self.controller.statistics()
    }

    pub fn frame_stats(&self) -> FrameSourceStats {
        self.frames.stats()
    }

    pub fn controller(&self) -> &SortingController<R> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut SortingController<R> {
        &mut self.controller
    }

    pub fn tracker(&self) -> &ObjectTracker {
        &self.tracker
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn is_sorted(&self, track_id: u64) -> bool {
        self.sorted_tracks.contains(&track_id)
    }
}

impl<R: RobotLink> Drop for SortingPipeline<R> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            self.telemetry
                .warn(format_args!("pipeline shutdown on drop failed: {}", err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::ScriptedBackend;
    use crate::detect::Detection;
    use crate::frame::{Frame, FrameSourceConfig};
    use crate::ingest::CameraError;
    use crate::robot::{GripperState, SimulatedRobot};
    use crate::sorting::{ControllerConfig, SortingStrategy, ZoneManager};
    use crate::tracker::TrackerConfig;
    use crate::Position;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    /// Emits a blank frame on every read and flags when it is stopped.
    #[derive(Default)]
    struct BlankCamera {
        stopped: Arc<AtomicBool>,
    }

    impl CameraDevice for BlankCamera {
        fn url(&self) -> &str {
            "stub://blank"
        }

        fn start(&mut self) -> Result<(), CameraError> {
            Ok(())
        }

        fn read_frame(&mut self) -> Result<Option<Frame>, CameraError> {
            Frame::new(vec![0; 8 * 8 * 3], 8, 8)
                .map(Some)
                .map_err(|e| CameraError::Unavailable(e.to_string()))
        }

        fn stop(&mut self) -> Result<(), CameraError> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn pipeline(
        script: Vec<Vec<Detection>>,
        robot: SimulatedRobot,
    ) -> SortingPipeline<SimulatedRobot> {
        pipeline_with(
            BlankCamera::default(),
            ScriptedBackend::new(script),
            robot,
            1,
        )
    }

    fn pipeline_with(
        camera: BlankCamera,
        backend: ScriptedBackend,
        robot: SimulatedRobot,
        detection_interval: u32,
    ) -> SortingPipeline<SimulatedRobot> {
        let telemetry = Telemetry::new("pipeline-test");
        let frames = FrameSource::new(
            Box::new(camera),
            FrameSourceConfig {
                poll_interval: Duration::from_millis(1),
                max_frame_age: Duration::from_secs(5),
            },
            telemetry.clone(),
        );
        let detector = Detector::new(backend, 0.5).unwrap();
        let mut zones = ZoneManager::new();
        zones
            .create_zone("zone_a", Position::new(1.0, 0.5), 10)
            .unwrap();
        zones
            .create_zone("zone_default", Position::new(0.5, 1.5), 10)
            .unwrap();
        let strategy = SortingStrategy::class_based(
            BTreeMap::from([("cup".to_string(), "zone_a".to_string())]),
            "zone_default",
        );
        let controller = SortingController::new(
            robot,
            zones,
            strategy,
            ControllerConfig {
                gripper_settle: Duration::ZERO,
                ..ControllerConfig::default()
            },
            telemetry.clone(),
        )
        .unwrap();
        SortingPipeline::new(
            frames,
            detector,
            ObjectTracker::new(TrackerConfig::default()),
            controller,
            PipelineConfig {
                target_classes: vec!["cup".to_string(), "bottle".to_string()],
                detection_interval,
                idle_backoff: Duration::from_millis(1),
                ..PipelineConfig::default()
            },
            telemetry,
        )
    }

    fn cup() -> Detection {
        Detection::new("cup", 0.9, (10.0, 10.0, 50.0, 50.0)).unwrap()
    }

    fn next_fresh(pipeline: &mut SortingPipeline<SimulatedRobot>) -> CycleReport {
        for _ in 0..2_000 {
            let report = pipeline.run_cycle().unwrap();
            if !report.frame_absent() {
                return report;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("no fresh frame arrived");
    }

    #[test]
    fn run_cycle_requires_start() {
        let mut pipeline = pipeline(vec![], SimulatedRobot::new("sim://"));
        assert!(pipeline.run_cycle().is_err());
    }

    #[test]
    fn a_track_is_sorted_once() {
        let script = vec![vec![cup()], vec![cup()], vec![cup()]];
        let mut pipeline = pipeline(script, SimulatedRobot::new("sim://"));
        pipeline.start().unwrap();

        let first = next_fresh(&mut pipeline);
        assert!(first.sorted());
        let track_id = first.target.as_ref().and_then(|t| t.track_id).unwrap();
        assert!(pipeline.is_sorted(track_id));

        let second = next_fresh(&mut pipeline);
        assert!(second.detection_ran);
        assert!(second.outcome.is_none());
        assert_eq!(pipeline.statistics().total_sorted, 1);
        pipeline.shutdown().unwrap();
    }

    #[test]
    fn non_target_classes_are_ignored() {
        let spoon = Detection::new("spoon", 0.9, (10.0, 10.0, 50.0, 50.0)).unwrap();
        let mut pipeline = pipeline(vec![vec![spoon]], SimulatedRobot::new("sim://"));
        pipeline.start().unwrap();
        let report = next_fresh(&mut pipeline);
        assert_eq!(report.tracked, 1);
        assert!(report.target.is_none());
        pipeline.shutdown().unwrap();
    }

    #[test]
    fn failed_attempts_are_retried_on_later_cycles() {
        let script = vec![vec![cup()], vec![cup()]];
        let robot = SimulatedRobot::new("sim://").fail_move_on(1);
        let mut pipeline = pipeline(script, robot);
        pipeline.start().unwrap();
        assert!(!next_fresh(&mut pipeline).sorted());
        assert!(next_fresh(&mut pipeline).sorted());
        let stats = pipeline.statistics();
        assert_eq!(stats.total_sorted, 1);
        assert_eq!(stats.failed, 1);
        pipeline.shutdown().unwrap();
    }

    #[test]
    fn unreachable_robot_is_fatal_at_start() {
        let mut pipeline = pipeline(vec![], SimulatedRobot::unreachable("sim://down"));
        let err = pipeline.start().unwrap_err();
        assert!(err.to_string().contains("connection failed"));
        pipeline.shutdown().unwrap();
    }

    #[test]
    fn shutdown_releases_held_object_and_disconnects() {
        let robot = SimulatedRobot::new("sim://").fail_move_on(2);
        let mut pipeline = pipeline(vec![vec![cup()]], robot);
        pipeline.start().unwrap();
        let report = next_fresh(&mut pipeline);
        assert_eq!(
            report.outcome.and_then(|o| o.failure_reason()),
            Some(crate::sorting::FailureReason::TransportFailed)
        );
        assert!(pipeline.controller().may_be_holding());

        pipeline.shutdown().unwrap();
        let robot = pipeline.controller().robot();
        assert_eq!(robot.gripper(), GripperState::Open);
        assert!(!robot.is_connected());
        assert!(pipeline.shutdown().is_ok());
    }

    #[test]
    fn run_stops_on_flag_and_cycle_limit() {
        let mut pipeline = pipeline(vec![], SimulatedRobot::new("sim://"));
        pipeline.start().unwrap();
        let stop = AtomicBool::new(true);
        let summary = pipeline.run(&stop).unwrap();
        assert_eq!(summary.stop_reason, StopReason::Interrupted);
        assert_eq!(summary.cycles, 0);

        let go = AtomicBool::new(false);
        let summary = pipeline.run_cycles(5, &go).unwrap();
        assert_eq!(summary.stop_reason, StopReason::CycleLimit);
        assert_eq!(summary.cycles, 5);
        pipeline.shutdown().unwrap();
    }

    #[test]
    fn run_honours_runtime_ceiling() {
        let mut pipeline = pipeline(vec![], SimulatedRobot::new("sim://"));
        pipeline.config.max_runtime = Some(Duration::from_millis(30));
        pipeline.start().unwrap();
        let go = AtomicBool::new(false);
        let summary = pipeline.run(&go).unwrap();
        assert_eq!(summary.stop_reason, StopReason::RuntimeCeiling);
        pipeline.shutdown().unwrap();
    }

    #[test]
    fn detection_runs_on_every_third_fresh_frame() {
        let mut pipeline = pipeline_with(
            BlankCamera::default(),
            ScriptedBackend::new(vec![]),
            SimulatedRobot::new("sim://"),
            3,
        );
        pipeline.start().unwrap();
        let ran: Vec<bool> = (0..7)
            .map(|_| next_fresh(&mut pipeline).detection_ran)
            .collect();
        assert_eq!(ran, vec![true, false, false, true, false, false, true]);
        pipeline.shutdown().unwrap();
    }

    #[test]
    fn detector_error_ends_run_and_shutdown_still_cleans_up() {
        let mut pipeline = pipeline_with(
            BlankCamera::default(),
            ScriptedBackend::looping(vec![vec![]]).fail_on(3),
            SimulatedRobot::new("sim://"),
            1,
        );
        pipeline.start().unwrap();
        let go = AtomicBool::new(false);
        let err = pipeline.run(&go).unwrap_err();
        assert!(err.to_string().contains("scripted inference failure"));
        assert!(pipeline.frames.is_running());

        pipeline.shutdown().unwrap();
        assert!(!pipeline.frames.is_running());
        assert!(!pipeline.controller().robot().is_connected());
        assert!(pipeline.frame_stats().frames_captured >= 3);
        assert!(pipeline.frames.read().is_none());
    }

    #[test]
    fn dropping_after_a_failed_run_stops_the_camera() {
        let camera = BlankCamera::default();
        let stopped = camera.stopped.clone();
        let mut pipeline = pipeline_with(
            camera,
            ScriptedBackend::new(vec![]).fail_on(1),
            SimulatedRobot::new("sim://"),
            1,
        );
        pipeline.start().unwrap();
        let go = AtomicBool::new(false);
        assert!(pipeline.run(&go).is_err());
        assert!(!stopped.load(Ordering::SeqCst));

        drop(pipeline);
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn held_object_is_set_down_before_the_next_sort() {
        let script = vec![vec![cup()], vec![cup()], vec![cup()]];
        let robot = SimulatedRobot::new("sim://").fail_move_on(2);
        let mut pipeline = pipeline(script, robot);
        pipeline.start().unwrap();

        let first = next_fresh(&mut pipeline);
        assert_eq!(
            first.outcome.and_then(|o| o.failure_reason()),
            Some(crate::sorting::FailureReason::TransportFailed)
        );
        assert!(pipeline.controller().may_be_holding());

        let second = next_fresh(&mut pipeline);
        assert!(second.set_down_held);
        assert!(second.outcome.is_none());
        assert!(!pipeline.controller().may_be_holding());
        assert_eq!(pipeline.controller().robot().gripper(), GripperState::Open);
        let moves = pipeline
            .controller()
            .robot()
            .commands()
            .iter()
            .filter(|c| matches!(c, crate::robot::RobotCommand::Move { .. }))
            .count();
        assert_eq!(moves, 2);

        let third = next_fresh(&mut pipeline);
        assert!(!third.set_down_held);
        assert!(third.sorted());
        pipeline.shutdown().unwrap();
    }
}
