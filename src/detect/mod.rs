mod backend;
mod backends;
mod result;
mod selector;

pub use backend::DetectorBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use backends::{MotionBackend, ScriptedBackend, MOTION_CLASS};
pub use result::{BoundingBox, Detection};
pub use selector::{Detector, DetectorKind};
