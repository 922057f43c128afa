pub mod color_blob;
pub mod scripted;

pub use color_blob::{ColorBlobBackend, ColorClass};
pub use scripted::ScriptedBackend;
