// Durable media library
//
// Publication moves a finished artifact out of the working area into a
// user-visible collection. Everything the rest of the crate touches goes
// through the MediaLibrary trait so tests can substitute their own.

pub mod local;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use local::LocalLibrary;

/// Outcome of asking the library whether publication is permitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Granted,
    Denied,
}

/// Which path produced the artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactOrigin {
    /// Encoded live during capture
    Streaming,
    /// Assembled afterward from cached still frames
    Fallback,
}

impl ArtifactOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactOrigin::Streaming => "streaming",
            ArtifactOrigin::Fallback => "fallback",
        }
    }
}

/// One published video and its index entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: Uuid,
    /// Location inside the library, after the move
    pub path: PathBuf,
    pub origin: ArtifactOrigin,
    pub added_at: DateTime<Utc>,
    pub duration_secs: Option<f64>,
    pub size_bytes: u64,
}

pub trait MediaLibrary: Send + Sync {
    /// Check (and where applicable, request) permission to publish.
    fn request_authorization(&self) -> AuthorizationStatus;

    /// Move the file at `path` into the library and index it.
    ///
    /// `duration` is used when the producer already knows it; when `None`
    /// the library probes the file itself.
    fn add_video(
        &self,
        path: &Path,
        origin: ArtifactOrigin,
        duration: Option<Duration>,
    ) -> anyhow::Result<ArtifactRecord>;

    /// All indexed artifacts, newest first.
    fn artifacts(&self) -> anyhow::Result<Vec<ArtifactRecord>>;
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use parking_lot::Mutex;

    /// In-memory library for tests; records what was added.
    #[derive(Default)]
    pub struct MockLibrary {
        added: Mutex<Vec<ArtifactRecord>>,
        pub deny: std::sync::atomic::AtomicBool,
    }

    impl MockLibrary {
        pub fn added(&self) -> Vec<ArtifactRecord> {
            self.added.lock().clone()
        }
    }

    impl MediaLibrary for MockLibrary {
        fn request_authorization(&self) -> AuthorizationStatus {
            if self.deny.load(std::sync::atomic::Ordering::Relaxed) {
                AuthorizationStatus::Denied
            } else {
                AuthorizationStatus::Granted
            }
        }

        fn add_video(
            &self,
            path: &Path,
            origin: ArtifactOrigin,
            duration: Option<Duration>,
        ) -> anyhow::Result<ArtifactRecord> {
            let record = ArtifactRecord {
                id: Uuid::new_v4(),
                path: path.to_path_buf(),
                origin,
                added_at: Utc::now(),
                duration_secs: duration.map(|d| d.as_secs_f64()),
                size_bytes: 0,
            };
            self.added.lock().push(record.clone());
            Ok(record)
        }

        fn artifacts(&self) -> anyhow::Result<Vec<ArtifactRecord>> {
            Ok(self.added())
        }
    }
}
