//! In-process robot used for `sim://` links, tests and the demo.
//!
//! Keeps a dead-reckoned pose, a gripper state and a command log. Faults are
//! injected per call number (1-based) for each primitive.

use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::time::Duration;

use super::RobotLink;
use crate::Position;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GripperState {
    Open,
    /// Closed with nothing inside.
    ClosedEmpty,
    Holding,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RobotCommand {
    Connect,
    Disconnect,
    Move {
        dx: f32,
        dy: f32,
        rotation: f32,
        speed: f32,
    },
    Stop,
    Open,
    Grab,
    Release,
}

#[derive(Default)]
struct Faults {
    connect: bool,
    moves: HashSet<u64>,
    every_nth_move: Option<u64>,
    opens: HashSet<u64>,
    grabs: HashSet<u64>,
    releases: HashSet<u64>,
}

#[derive(Default)]
struct CallCounts {
    moves: u64,
    opens: u64,
    grabs: u64,
    releases: u64,
}

pub struct SimulatedRobot {
    url: String,
    connected: bool,
    pose: Position,
    gripper: GripperState,
    /// Simulated actuator time per primitive.
    actuation_delay: Duration,
    faults: Faults,
    calls: CallCounts,
    log: Vec<RobotCommand>,
}

impl SimulatedRobot {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            connected: false,
            pose: Position::ORIGIN,
            gripper: GripperState::Open,
            actuation_delay: Duration::ZERO,
            faults: Faults::default(),
            calls: CallCounts::default(),
            log: Vec::new(),
        }
    }

    /// A robot that refuses every connection attempt.
    pub fn unreachable(url: &str) -> Self {
        let mut robot = Self::new(url);
        robot.faults.connect = true;
        robot
    }

    pub fn with_actuation_delay(mut self, delay: Duration) -> Self {
        self.actuation_delay = delay;
        self
    }

    pub fn fail_move_on(mut self, call: u64) -> Self {
        self.faults.moves.insert(call);
        self
    }

    pub fn fail_every_nth_move(mut self, n: u64) -> Self {
        self.faults.every_nth_move = Some(n.max(1));
        self
    }

    pub fn fail_open_on(mut self, call: u64) -> Self {
        self.faults.opens.insert(call);
        self
    }

    pub fn fail_grab_on(mut self, call: u64) -> Self {
        self.faults.grabs.insert(call);
        self
    }

    pub fn fail_release_on(mut self, call: u64) -> Self {
        self.faults.releases.insert(call);
        self
    }

    pub fn pose(&self) -> Position {
        self.pose
    }

    pub fn gripper(&self) -> GripperState {
        self.gripper
    }

    pub fn commands(&self) -> &[RobotCommand] {
        &self.log
    }

    fn actuate(&self) {
        if !self.actuation_delay.is_zero() {
            std::thread::sleep(self.actuation_delay);
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if !self.connected {
            return Err(anyhow!("robot {} is not connected", self.url));
        }
        Ok(())
    }
}

impl RobotLink for SimulatedRobot {
    fn url(&self) -> &str {
        &self.url
    }

    fn connect(&mut self) -> Result<()> {
        self.log.push(RobotCommand::Connect);
        if self.faults.connect {
            return Err(anyhow!("robot {} unreachable", self.url));
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.log.push(RobotCommand::Disconnect);
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn move_by(&mut self, dx: f32, dy: f32, rotation: f32, speed: f32) -> Result<()> {
        self.ensure_connected()?;
        self.calls.moves += 1;
        let call = self.calls.moves;
        self.log.push(RobotCommand::Move {
            dx,
            dy,
            rotation,
            speed,
        });
        if !(0.0..=1.0).contains(&speed) {
            return Err(anyhow!("speed {} outside [0, 1]", speed));
        }
        let nth = self
            .faults
            .every_nth_move
            .is_some_and(|n| call % n == 0);
        if self.faults.moves.contains(&call) || nth {
            return Err(anyhow!("chassis move #{} blocked", call));
        }
        self.actuate();
        self.pose = self.pose.offset(dx, dy);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.log.push(RobotCommand::Stop);
        Ok(())
    }

    fn open_gripper(&mut self) -> Result<()> {
        self.ensure_connected()?;
        self.calls.opens += 1;
        self.log.push(RobotCommand::Open);
        if self.faults.opens.contains(&self.calls.opens) {
            return Err(anyhow!("gripper open #{} jammed", self.calls.opens));
        }
        self.actuate();
        self.gripper = GripperState::Open;
        Ok(())
    }

    fn grab(&mut self) -> Result<()> {
        self.ensure_connected()?;
        self.calls.grabs += 1;
        self.log.push(RobotCommand::Grab);
        self.actuate();
        if self.faults.grabs.contains(&self.calls.grabs) {
            self.gripper = GripperState::ClosedEmpty;
            return Err(anyhow!("grab #{} closed on nothing", self.calls.grabs));
        }
        self.gripper = GripperState::Holding;
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.ensure_connected()?;
        self.calls.releases += 1;
        self.log.push(RobotCommand::Release);
        if self.faults.releases.contains(&self.calls.releases) {
            return Err(anyhow!("release #{} jammed", self.calls.releases));
        }
        self.actuate();
        self.gripper = GripperState::Open;
        Ok(())
    }
}
