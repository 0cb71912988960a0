use std::sync::Arc;

use crate::capture::Frame;
use crate::geometry::Rect;

/// Invoked on the source's own thread whenever a frame is ready
pub type FrameCallback = Arc<dyn Fn(Frame) + Send + Sync>;

/// Asynchronous camera frame producer.
///
/// Sources keep "latest frame" semantics: an unconsumed frame is replaced
/// by a newer one. Frames handed out still belong to the source's buffer
/// pool until the consumer releases them.
pub trait FrameSource: Send + Sync {
    /// Installs (or clears) the frame-available callback
    fn set_frame_callback(&self, callback: Option<FrameCallback>);

    /// Takes the newest unconsumed frame, if any buffer is free
    fn acquire_latest(&self) -> Option<Frame>;

    /// Starts delivering frames
    fn enable(&self);

    /// Stops delivering frames and drops anything not yet acquired
    fn disable(&self);

    /// Restricts capture to part of the active array (digital zoom)
    fn set_crop_region(&self, _region: Rect) {}
}
