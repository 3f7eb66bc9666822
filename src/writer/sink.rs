// Sink seam between the write session and the container machinery
//
// The state machine talks to a trait object so recording logic stays
// deterministic under test; the production implementation lives in
// `gst_sink`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::Result;
use crate::encoding::SinkConfig;
use crate::frame::RawFrame;

/// A finished, finalized container file
#[derive(Debug, Clone)]
pub struct FinalizedArtifact {
    /// Location of the produced file
    pub path: PathBuf,
    /// Content duration spanned by the written frames
    pub duration: Duration,
    /// File size in bytes
    pub bytes: u64,
}

/// Completion notification for an asynchronous finalize
pub type FinalizeCallback = Box<dyn FnOnce(Result<FinalizedArtifact>) + Send + 'static>;

/// Consumer side of the recording pipeline.
///
/// `append` receives session-relative timestamps (the write session rebases
/// them to the session origin). Implementations must never block the
/// caller beyond a bounded enqueue; back-pressure is expressed through
/// `is_ready_for_more`.
pub trait VideoSink: Send {
    /// Whether the sink can accept another frame without blocking
    fn is_ready_for_more(&self) -> bool;

    /// Enqueue one frame for encoding/writing
    fn append(&mut self, frame: &RawFrame) -> Result<()>;

    /// Mark the input finished and finalize the container.
    ///
    /// Asynchronous: returns immediately, `on_done` fires once the
    /// container is committed or the finalize has failed. An in-flight
    /// finalize cannot be cancelled, only awaited.
    fn finalize(self: Box<Self>, on_done: FinalizeCallback);
}

/// Opens sinks for new write sessions. Injected into the recorder so tests
/// can substitute a scripted sink.
pub trait SinkFactory: Send + Sync {
    fn open(&self, path: &Path, config: &SinkConfig) -> Result<Box<dyn VideoSink>>;
}
