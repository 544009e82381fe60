//! Per-frame bridge logic.
//!
//! One dispatcher per direction. Each is built with the writer it feeds
//! and whatever addressing it needs, then invoked once per captured frame
//! by the capture session's run loop.

mod lan;
mod requester;
mod tap;

pub use lan::LanDispatcher;
pub use requester::RequesterAddress;
pub use tap::TapDispatcher;

/// Handles one captured frame.
///
/// Implementations must not fail: per-frame problems are logged and the
/// frame dropped.
pub trait FrameHandler: Send {
    fn handle(&self, frame: &[u8]);
}
