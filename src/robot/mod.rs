//! Robot link.
//!
//! `RobotLink` is the boundary to the physical robot: connection management,
//! point-to-point chassis moves and gripper primitives. Every primitive blocks
//! until the actuator reports completion and returns an error on failure.
//!
//! Built-in links:
//! - `sim://`: in-process `SimulatedRobot` with fault injection

pub mod sim;

use anyhow::{anyhow, Result};

pub use sim::{GripperState, RobotCommand, SimulatedRobot};

pub trait RobotLink: Send {
    fn url(&self) -> &str;

    /// Connection failures are fatal to startup.
    fn connect(&mut self) -> Result<()>;

    fn disconnect(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Relative chassis move in metres (`dx` forward, `dy` left), rotation in
    /// degrees, speed in `[0, 1]`.
    fn move_by(&mut self, dx: f32, dy: f32, rotation: f32, speed: f32) -> Result<()>;

    /// Halt all chassis motion.
    fn stop(&mut self) -> Result<()>;

    fn open_gripper(&mut self) -> Result<()>;

    /// Close on an object.
    fn grab(&mut self) -> Result<()>;

    /// Open to let go of the held object.
    fn release(&mut self) -> Result<()>;
}

impl<R: RobotLink + ?Sized> RobotLink for Box<R> {
    fn url(&self) -> &str {
        (**self).url()
    }

    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn disconnect(&mut self) -> Result<()> {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn move_by(&mut self, dx: f32, dy: f32, rotation: f32, speed: f32) -> Result<()> {
        (**self).move_by(dx, dy, rotation, speed)
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn open_gripper(&mut self) -> Result<()> {
        (**self).open_gripper()
    }

    fn grab(&mut self) -> Result<()> {
        (**self).grab()
    }

    fn release(&mut self) -> Result<()> {
        (**self).release()
    }
}

/// Open a robot link by URL.
pub fn open_robot(url: &str) -> Result<Box<dyn RobotLink>> {
    if url.starts_with("sim://") {
        return Ok(Box::new(SimulatedRobot::new(url)));
    }
    Err(anyhow!(
        "robot url '{}' is not supported (built-in schemes: sim://)",
        url
    ))
}
