// Filesystem + SQLite media library
//
// Published videos live under a library root, indexed by a small SQLite
// database alongside them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{ArtifactOrigin, ArtifactRecord, AuthorizationStatus, MediaLibrary};

/// Media library rooted at a directory on the local filesystem.
///
/// Wraps Connection in a parking_lot::Mutex since rusqlite::Connection is
/// not Sync, and parking_lot mutexes do not poison on panic.
pub struct LocalLibrary {
    root: PathBuf,
    conn: Mutex<Connection>,
}

impl LocalLibrary {
    /// Open or create a library at `root`.
    pub fn open(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let conn = Connection::open(root.join("library.db"))?;

        let library = Self {
            root,
            conn: Mutex::new(conn),
        };
        library.init_schema()?;
        Ok(library)
    }

    /// Library whose index does not persist (fallback when the file
    /// database cannot be opened).
    pub fn open_in_memory(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let conn = Connection::open_in_memory()?;

        let library = Self {
            root,
            conn: Mutex::new(conn),
        };
        library.init_schema()?;

        log::warn!("Using in-memory library index - entries will not persist across restarts");

        Ok(library)
    }

    fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS artifacts (
                id TEXT PRIMARY KEY,
                added_at TEXT NOT NULL,
                path TEXT NOT NULL,
                origin TEXT NOT NULL,
                duration_secs REAL,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                metadata TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_artifacts_added_at ON artifacts(added_at DESC);
            "#,
        )?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn destination_for(&self, id: Uuid, origin: ArtifactOrigin, source: &Path) -> PathBuf {
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4");
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let short_id = id.simple().to_string();
        self.root.join(format!(
            "{}-{}-{}.{}",
            stamp,
            origin.as_str(),
            &short_id[..8],
            ext
        ))
    }
}

/// Move `source` to `dest`, copying across filesystems when rename fails.
fn move_file(source: &Path, dest: &Path) -> std::io::Result<()> {
    match std::fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(source, dest)?;
            std::fs::remove_file(source)
        }
    }
}

/// Read media duration using the GStreamer Discoverer.
fn probe_duration(path: &Path) -> anyhow::Result<f64> {
    crate::gst_env::init();
    let discoverer = gstreamer_pbutils::Discoverer::new(gstreamer::ClockTime::from_seconds(10))
        .map_err(|e| anyhow::anyhow!("Failed to create discoverer: {}", e))?;

    let uri = format!("file:///{}", path.to_string_lossy().replace('\\', "/"));
    let info = discoverer
        .discover_uri(&uri)
        .map_err(|e| anyhow::anyhow!("Discovery failed: {}", e))?;
    let duration = info
        .duration()
        .ok_or_else(|| anyhow::anyhow!("No duration found"))?;

    Ok(duration.nseconds() as f64 / 1_000_000_000.0)
}

impl MediaLibrary for LocalLibrary {
    fn request_authorization(&self) -> AuthorizationStatus {
        if std::fs::create_dir_all(&self.root).is_err() {
            return AuthorizationStatus::Denied;
        }
        match std::fs::metadata(&self.root) {
            Ok(meta) if !meta.permissions().readonly() => AuthorizationStatus::Granted,
            _ => AuthorizationStatus::Denied,
        }
    }

    fn add_video(
        &self,
        path: &Path,
        origin: ArtifactOrigin,
        duration: Option<Duration>,
    ) -> anyhow::Result<ArtifactRecord> {
        let size_bytes = std::fs::metadata(path)?.len();

        let id = Uuid::new_v4();
        let dest = self.destination_for(id, origin, path);
        move_file(path, &dest)?;

        let duration_secs = match duration {
            Some(d) => Some(d.as_secs_f64()),
            None => match probe_duration(&dest) {
                Ok(secs) => Some(secs),
                Err(e) => {
                    log::warn!("Cannot probe duration of {}: {}", dest.display(), e);
                    None
                }
            },
        };

        let added_at = Utc::now();
        let metadata = serde_json::json!({
            "source_path": path.to_string_lossy(),
        });

        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO artifacts (id, added_at, path, origin, duration_secs, size_bytes, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                id.to_string(),
                added_at.to_rfc3339(),
                dest.to_string_lossy().to_string(),
                origin.as_str(),
                duration_secs,
                size_bytes,
                metadata.to_string(),
            ],
        )?;

        log::info!(
            "Published {} artifact to {} ({} bytes)",
            origin.as_str(),
            dest.display(),
            size_bytes
        );

        Ok(ArtifactRecord {
            id,
            path: dest,
            origin,
            added_at,
            duration_secs,
            size_bytes,
        })
    }

    fn artifacts(&self) -> anyhow::Result<Vec<ArtifactRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, added_at, path, origin, duration_secs, size_bytes
             FROM artifacts ORDER BY added_at DESC",
        )?;

        let mut records = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let added_at: String = row.get(1)?;
            let path: String = row.get(2)?;
            let origin: String = row.get(3)?;

            records.push(ArtifactRecord {
                id: id.parse()?,
                added_at: added_at.parse::<DateTime<Utc>>()?,
                path: PathBuf::from(path),
                origin: match origin.as_str() {
                    "fallback" => ArtifactOrigin::Fallback,
                    _ => ArtifactOrigin::Streaming,
                },
                duration_secs: row.get(4)?,
                size_bytes: row.get(5)?,
            });
        }
        Ok(records)
    }
}
