// camrec - Camera capture-to-file recording pipeline
// Main library entry point

pub mod assembler;
pub mod cache;
pub mod capture;
pub mod config;
pub mod encoding;
pub mod frame;
pub mod gst_env;
pub mod library;
pub mod pipeline;
pub mod recorder;
pub mod writer;

pub use cache::{CachePolicy, FrameCache};
pub use capture::{CameraSource, FrameSource};
pub use config::{Config, FallbackPolicy};
pub use frame::{CachedImage, PixelFormat, RawFrame};
pub use library::{ArtifactOrigin, ArtifactRecord, LocalLibrary, MediaLibrary};
pub use recorder::{Recorder, RecorderEvent};
pub use writer::gst_sink::GstSinkFactory;
pub use writer::WriterStatus;
