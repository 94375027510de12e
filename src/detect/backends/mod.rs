pub mod motion;
pub mod scripted;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use motion::{MotionBackend, MOTION_CLASS};
pub use scripted::ScriptedBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
