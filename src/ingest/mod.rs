//! Camera devices.
//!
//! A `CameraDevice` is the blocking, possibly slow device behind the
//! `FrameSource`. Only the frame source calls it, from its background thread.
//!
//! Built-in devices:
//! - `stub://<name>`: synthetic scene of coloured objects (`SyntheticCamera`)
//!
//! Physical camera links are external collaborators and plug in by
//! implementing `CameraDevice`.

pub mod synthetic;

use anyhow::{anyhow, Result};

use crate::frame::Frame;

pub use synthetic::{SceneHandle, SyntheticCamera, SyntheticConfig, SyntheticObject};

/// Camera failure classes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CameraError {
    /// Device or link unavailable. Fatal at startup.
    Connection(String),
    /// No frame right now (warm-up, dropped frame). Transient.
    Unavailable(String),
}

impl std::fmt::Display for CameraError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraError::Connection(msg) => write!(f, "camera connection error: {}", msg),
            CameraError::Unavailable(msg) => write!(f, "frame unavailable: {}", msg),
        }
    }
}
impl std::error::Error for CameraError {}

pub trait CameraDevice: Send {
    fn url(&self) -> &str;

    fn start(&mut self) -> Result<(), CameraError>;

    /// Blocking read of the next frame. `Ok(None)` means nothing yet.
    fn read_frame(&mut self) -> Result<Option<Frame>, CameraError>;

    fn stop(&mut self) -> Result<(), CameraError>;
}

/// Open a camera by URL.
pub fn open_camera(url: &str, width: u32, height: u32) -> Result<Box<dyn CameraDevice>> {
    if url.starts_with("stub://") {
        let config = SyntheticConfig {
            url: url.to_string(),
            width,
            height,
            ..SyntheticConfig::default()
        };
        return Ok(Box::new(SyntheticCamera::workbench(config)));
    }
    Err(anyhow!(
        "camera url '{}' is not supported (built-in schemes: stub://)",
        url
    ))
}
