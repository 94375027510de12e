use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Object detector backend.
///
/// Backends report every candidate they find. The configured confidence
/// threshold is applied once, downstream, by `DetectionPipeline`; a backend may
/// only apply its own fixed candidate floor where its algorithm needs one.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// Implementations must treat the pixels as read-only and must not retain the
    /// frame beyond the call.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
