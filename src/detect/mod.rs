mod backend;
pub mod backends;
mod registry;
mod result;

pub use backend::{Detector, DetectorBackend};
pub use backends::{ColorBlobBackend, ScriptedBackend};
pub use registry::BackendRegistry;
pub use result::{BBox, Detection, InvalidDetection};
