// Frame sources
//
// A FrameSource delivers raw frames on its own single delivery context,
// in capture order. The camera implementation lives in `camera`; the
// recorder only ever sees the trait.

pub mod camera;

use crate::frame::RawFrame;

pub use camera::CameraSource;

/// Error type for capture operations
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("GStreamer error: {0}")]
    Gst(#[from] gstreamer::glib::Error),

    #[error("GStreamer state error: {0}")]
    StateChange(#[from] gstreamer::StateChangeError),

    #[error("Capture pipeline error: {0}")]
    Pipeline(String),
}

pub type Result<T> = std::result::Result<T, CaptureError>;

/// Invoked once per captured frame, from the source's delivery context.
pub type FrameCallback = Box<dyn FnMut(RawFrame) + Send + 'static>;

/// A running-order frame producer with a single delivery context.
///
/// Implementations must install the callback before `start` and invoke it
/// from exactly one thread for the lifetime of the source.
pub trait FrameSource: Send {
    fn set_callback(&mut self, callback: FrameCallback);
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self);
}
