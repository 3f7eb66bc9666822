// Frame buffer cache for the fallback assembly path
//
// Pure accumulation: an ordered, append-only sequence of decoded images,
// no deduplication and no bound. The delivery pipeline is the single
// mutator; the assembler consumes snapshots.

use serde::{Deserialize, Serialize};

use crate::frame::CachedImage;

/// What happens to cached images when a new recording starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    /// Clear the cache at each recording start (bounded memory per attempt)
    ResetPerRecording,
    /// Keep accumulating across recordings; the fallback reel then covers
    /// everything captured since the process started
    RetainAcrossRecordings,
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy::ResetPerRecording
    }
}

/// Ordered in-memory sequence of displayable frames
pub struct FrameCache {
    images: Vec<CachedImage>,
    current_bytes: usize,
    policy: CachePolicy,
}

impl FrameCache {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            images: Vec::new(),
            current_bytes: 0,
            policy,
        }
    }

    /// Append an image at the tail
    pub fn append(&mut self, image: CachedImage) {
        self.current_bytes += image.byte_len();
        self.images.push(image);
    }

    /// Full ordered copy of the cached sequence
    pub fn snapshot(&self) -> Vec<CachedImage> {
        self.images.clone()
    }

    /// Apply the configured policy at a recording start boundary
    pub fn on_recording_start(&mut self) {
        match self.policy {
            CachePolicy::ResetPerRecording => {
                if !self.images.is_empty() {
                    log::debug!(
                        "Clearing frame cache ({} images, {} bytes)",
                        self.images.len(),
                        self.current_bytes
                    );
                }
                self.clear();
            }
            CachePolicy::RetainAcrossRecordings => {}
        }
    }

    pub fn clear(&mut self) {
        self.images.clear();
        self.current_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Total bytes held, for memory diagnostics
    pub fn current_bytes(&self) -> usize {
        self.current_bytes
    }
}
