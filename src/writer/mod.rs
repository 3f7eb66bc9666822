// Write session state machine
//
// One WriteSession represents one recording attempt against one sink.
// The delivery pipeline is the only caller of `append`; construction and
// `start` are a single step so a session never exists half-configured.

pub mod gst_sink;
pub mod sink;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::encoding::SinkConfig;
use crate::frame::RawFrame;

pub use sink::{FinalizeCallback, FinalizedArtifact, SinkFactory, VideoSink};

/// Error type for writer operations
#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("GStreamer error: {0}")]
    Gst(#[from] gstreamer::glib::Error),

    #[error("GStreamer state error: {0}")]
    StateChange(#[from] gstreamer::StateChangeError),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WriterError>;

/// Lifecycle of the encode/write session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriterStatus {
    /// No session active
    Idle,
    /// Session open, accepting frames
    Writing,
    /// Input marked finished, container finalizing asynchronously
    Finishing,
    /// Container finalized, artifact eligible for publication
    Completed,
    /// Finalize failed; the partial file is not authoritative
    Failed,
}

impl Default for WriterStatus {
    fn default() -> Self {
        WriterStatus::Idle
    }
}

/// Per-frame result of an append attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Frame handed to the sink
    Appended,
    /// Sink reported not ready; frame dropped, no retry
    DroppedNotReady,
    /// Frame predates the session origin
    RejectedBeforeOrigin,
    /// Frame older than the last accepted timestamp
    RejectedOutOfOrder,
    /// The sink returned a hard error for this frame
    SinkError,
}

/// One bounded start-to-stop recording attempt and its sink.
///
/// The session clock starts at `origin_pts` (the pipeline's last-observed
/// presentation timestamp when recording was toggled on); appended frames
/// are rebased to that origin before reaching the sink.
pub struct WriteSession {
    sink: Box<dyn VideoSink>,
    origin_pts: u64,
    /// Session-relative timestamp of the last accepted frame
    watermark_pts: Option<u64>,
    frames_appended: u64,
    frames_dropped: u64,
}

impl WriteSession {
    /// Open the sink and begin a session.
    ///
    /// Any pre-existing file at `path` is deleted first, best effort; a
    /// failed delete is logged and the sink open decides the outcome.
    pub fn start(
        factory: &dyn SinkFactory,
        path: &Path,
        config: &SinkConfig,
        origin_pts: u64,
    ) -> Result<Self> {
        if path.exists() {
            log::warn!(
                "Output file {} already exists, deleting before reuse",
                path.display()
            );
            if let Err(e) = std::fs::remove_file(path) {
                log::warn!("Cannot delete existing file {}: {}", path.display(), e);
            }
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let sink = factory.open(path, config)?;
        log::info!(
            "Write session started, {}x{} {} at source time {} ns",
            config.width,
            config.height,
            config.codec.display_name(),
            origin_pts
        );

        Ok(Self {
            sink,
            origin_pts,
            watermark_pts: None,
            frames_appended: 0,
            frames_dropped: 0,
        })
    }

    pub fn origin_pts(&self) -> u64 {
        self.origin_pts
    }

    pub fn frames_appended(&self) -> u64 {
        self.frames_appended
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Offer one frame to the sink.
    ///
    /// Bounded check-and-enqueue only: when the sink is not ready the frame
    /// is dropped for the streaming path, never queued. Timestamps must be
    /// monotonically non-decreasing; violations are rejected, not reordered.
    pub fn append(&mut self, frame: &RawFrame) -> AppendOutcome {
        if frame.pts < self.origin_pts {
            log::warn!(
                "Rejecting frame before session origin ({} < {})",
                frame.pts,
                self.origin_pts
            );
            self.frames_dropped += 1;
            return AppendOutcome::RejectedBeforeOrigin;
        }

        let rel_pts = frame.pts - self.origin_pts;
        if let Some(watermark) = self.watermark_pts {
            if rel_pts < watermark {
                log::warn!(
                    "Rejecting out-of-order frame ({} ns < watermark {} ns)",
                    rel_pts,
                    watermark
                );
                self.frames_dropped += 1;
                return AppendOutcome::RejectedOutOfOrder;
            }
        }

        if !self.sink.is_ready_for_more() {
            self.frames_dropped += 1;
            log::debug!("Sink not ready, dropping frame at {} ns", rel_pts);
            return AppendOutcome::DroppedNotReady;
        }

        let mut rebased = frame.clone();
        rebased.pts = rel_pts;
        match self.sink.append(&rebased) {
            Ok(()) => {
                self.watermark_pts = Some(rel_pts);
                self.frames_appended += 1;
                AppendOutcome::Appended
            }
            Err(e) => {
                log::error!("Sink append failed at {} ns: {}", rel_pts, e);
                self.frames_dropped += 1;
                AppendOutcome::SinkError
            }
        }
    }

    /// Mark the input finished and finalize the container asynchronously.
    ///
    /// Returns immediately; `on_done` fires from the finalize context with
    /// either the finished artifact or the failure.
    pub fn finish(self, on_done: FinalizeCallback) {
        log::info!(
            "Finishing write session ({} frames appended, {} dropped)",
            self.frames_appended,
            self.frames_dropped
        );
        self.sink.finalize(on_done);
    }
}
