use std::collections::BTreeMap;
use std::time::Duration;

use robosort::robot::{GripperState, RobotCommand};
use robosort::{
    BBox, ControllerConfig, FailureReason, Position, RobotLink, SimulatedRobot, SortOutcome,
    SortPhase, SortTarget, SortingController, SortingStrategy, Telemetry, ZoneManager,
};

fn two_zone_manager() -> ZoneManager {
    let mut zones = ZoneManager::new();
    zones.create_zone("A", Position::new(1.0, 0.5), 10).unwrap();
    zones.create_zone("B", Position::new(1.0, 1.5), 10).unwrap();
    zones
        .create_zone("fallback", Position::new(0.5, 1.5), 20)
        .unwrap();
    zones
}

fn controller(robot: SimulatedRobot) -> SortingController<SimulatedRobot> {
    let mut robot = robot;
    robot.connect().unwrap();
    let strategy = SortingStrategy::class_based(
        BTreeMap::from([
            ("cup".to_string(), "A".to_string()),
            ("bottle".to_string(), "B".to_string()),
        ]),
        "fallback",
    );
    SortingController::new(
        robot,
        two_zone_manager(),
        strategy,
        ControllerConfig {
            gripper_settle: Duration::ZERO,
            ..ControllerConfig::default()
        },
        Telemetry::new("scenario"),
    )
    .unwrap()
}

fn object(class: &str) -> SortTarget {
    SortTarget {
        track_id: None,
        class_name: class.to_string(),
        confidence: 0.8,
        bbox: BBox::new(120.0, 150.0, 160.0, 190.0).unwrap(),
    }
}

#[test]
fn sorting_one_cup_fills_zone_upper_a_only() {
    let mut ctl = controller(SimulatedRobot::new("sim://"));
    assert!(ctl.sort_object(&object("cup")).is_done());

    let zones = ctl.zone_manager();
    assert_eq!(zones.get_zone("A").unwrap().occupied_count(), 1);
    assert_eq!(zones.get_zone("B").unwrap().occupied_count(), 0);

    let stats = ctl.statistics();
    assert_eq!(stats.total_sorted, 1);
    assert_eq!(stats.strategy_kind, "class_based");
    assert_eq!(stats.zone_count, 3);
}

#[test]
fn unmapped_spoon_is_not_a_zone_lookup_failure() {
    let mut ctl = controller(SimulatedRobot::new("sim://"));
    match ctl.sort_object(&object("spoon")) {
        SortOutcome::Done { zone, .. } => assert_eq!(zone, "fallback"),
        other => panic!("spoon should be sorted, got {:?}", other),
    }
}

#[test]
fn batch_returns_successes_and_totals_accumulate() {
    // Move 1 fails the first object at navigation, move 3 fails the second
    // in transport and the second grab fails the third at pickup.
    let robot = SimulatedRobot::new("sim://")
        .fail_move_on(1)
        .fail_move_on(3)
        .fail_grab_on(2);
    let mut ctl = controller(robot);
    let batch: Vec<SortTarget> = ["cup", "bottle", "cup", "spoon", "bottle", "cup"]
        .iter()
        .map(|c| object(c))
        .collect();

    let done = ctl.sort_batch(&batch);
    assert_eq!(done, 3);
    let stats = ctl.statistics();
    assert_eq!(stats.total_sorted, 3);
    assert_eq!(stats.failed, 3);
    assert_eq!(stats.failures_by_reason["navigation_failed"], 1);
    assert_eq!(stats.failures_by_reason["transport_failed"], 1);
    assert_eq!(stats.failures_by_reason["pickup_failed"], 1);

    let second = ctl.sort_batch(&[object("bottle"), object("cup")]);
    assert_eq!(second, 2);
    assert_eq!(ctl.statistics().total_sorted, 5);
}

#[test]
fn occupancy_never_decreases() {
    let robot = SimulatedRobot::new("sim://").fail_every_nth_move(3);
    let mut ctl = controller(robot);
    let mut previous = ctl.zone_manager().occupancy_snapshot();
    for class in ["cup", "bottle", "spoon", "cup", "cup", "bottle", "spoon", "cup"] {
        ctl.sort_object(&object(class));
        let current = ctl.zone_manager().occupancy_snapshot();
        for (zone, count) in &current {
            assert!(count >= &previous[zone], "zone {} went backwards", zone);
        }
        previous = current;
    }
}

#[test]
fn failed_grab_never_leaves_gripper_closed_on_nothing() {
    let robot = SimulatedRobot::new("sim://").fail_grab_on(1);
    let mut ctl = controller(robot);
    let outcome = ctl.sort_object(&object("cup"));

    match outcome {
        SortOutcome::Failed {
            phase,
            reason,
            ref detail,
            ..
        } => {
            assert_eq!(phase, SortPhase::Gripping);
            assert_eq!(reason, FailureReason::PickupFailed);
            assert!(detail.contains("reopened"));
        }
        other => panic!("expected pickup failure, got {:?}", other),
    }
    assert_eq!(ctl.robot().gripper(), GripperState::Open);
    assert_eq!(
        ctl.robot().commands().last(),
        Some(&RobotCommand::Open),
        "corrective open must be the last command"
    );
}
