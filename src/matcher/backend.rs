use anyhow::Result;

use crate::frame::Frame;
use crate::matcher::result::Detection;

/// Face-matching capability.
///
/// Localization, embedding and comparison against enrolled occupants all
/// happen behind this trait. The pipeline only sees identities, confidences
/// and boxes.
///
/// An `Err` is a capability failure: the pipeline logs it and skips the
/// recognition cycle. It never stops the loop.
pub trait FaceMatcher: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Find and label every face in `frame`.
    fn match_faces(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
