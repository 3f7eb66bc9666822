// Recording controller
//
// Owns the frame source, the delivery pipeline, and the publication
// wiring. start/stop requests from any thread are queued toward the
// delivery context; outcomes come back on the event channel.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;

use crate::assembler::{self, AssembleCallback};
use crate::cache::FrameCache;
use crate::capture::{self, FrameSource};
use crate::config::{Config, FallbackPolicy};
use crate::encoding::SinkConfig;
use crate::frame::CachedImage;
use crate::library::{ArtifactOrigin, AuthorizationStatus, MediaLibrary};
use crate::pipeline::{Command, DeliveryPipeline};
use crate::writer::{FinalizeCallback, SinkFactory, WriterStatus};

/// Notifications emitted across a recording's lifecycle
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    /// Recording began; frames rebase to this source timestamp
    Started { origin_pts: u64 },
    StartFailed { reason: String },
    /// The streamed container finalized successfully
    StreamingCompleted { path: PathBuf, duration: Duration },
    StreamingFailed { reason: String },
    /// The fallback movie was assembled from cached frames
    FallbackCompleted { path: PathBuf },
    FallbackFailed { reason: String },
    /// An artifact landed in the media library
    Published { path: PathBuf, origin: ArtifactOrigin },
    PublishFailed { path: PathBuf, reason: String },
}

/// Everything the finalize and assembly contexts need to carry a finished
/// artifact through fallback and publication. Cloned into callbacks.
#[derive(Clone)]
pub(crate) struct PublishWiring {
    pub(crate) library: Arc<dyn MediaLibrary>,
    pub(crate) events: Sender<RecorderEvent>,
    pub(crate) status: Arc<RwLock<WriterStatus>>,
    pub(crate) fallback_policy: FallbackPolicy,
    pub(crate) fallback_path: PathBuf,
    pub(crate) sink_config: SinkConfig,
    /// Shared with the controller's toggle; the delivery context clears it
    /// when a start request is refused so the toggle stays in step with
    /// the state machine
    pub(crate) recording_requested: Arc<AtomicBool>,
}

impl PublishWiring {
    /// Build the finalize callback for one stopped session, capturing the
    /// cache snapshot taken at the stop boundary.
    pub(crate) fn into_stop_handler(self, snapshot: Vec<CachedImage>) -> FinalizeCallback {
        Box::new(move |outcome| match outcome {
            Ok(artifact) => {
                *self.status.write() = WriterStatus::Completed;
                let _ = self.events.send(RecorderEvent::StreamingCompleted {
                    path: artifact.path.clone(),
                    duration: artifact.duration,
                });
                publish(
                    self.library.as_ref(),
                    &artifact.path,
                    ArtifactOrigin::Streaming,
                    Some(artifact.duration),
                    &self.events,
                );
                if self.fallback_policy == FallbackPolicy::Always {
                    self.run_fallback(snapshot);
                }
            }
            Err(e) => {
                *self.status.write() = WriterStatus::Failed;
                log::error!("Streaming write failed: {}", e);
                let _ = self.events.send(RecorderEvent::StreamingFailed {
                    reason: e.to_string(),
                });
                self.run_fallback(snapshot);
            }
        })
    }

    fn run_fallback(&self, images: Vec<CachedImage>) {
        let library = self.library.clone();
        let events = self.events.clone();

        let on_done: AssembleCallback = Box::new(move |outcome| match outcome {
            Ok(movie) => {
                let _ = events.send(RecorderEvent::FallbackCompleted {
                    path: movie.path.clone(),
                });
                publish(
                    library.as_ref(),
                    &movie.path,
                    ArtifactOrigin::Fallback,
                    Some(movie.duration),
                    &events,
                );
            }
            Err(e) => {
                log::error!("Fallback assembly failed: {}", e);
                let _ = events.send(RecorderEvent::FallbackFailed {
                    reason: e.to_string(),
                });
            }
        });

        // Usage errors (an empty snapshot) surface here synchronously.
        if let Err(e) = assembler::assemble(
            images,
            &self.sink_config,
            self.fallback_path.clone(),
            on_done,
        ) {
            log::error!("Fallback assembly rejected: {}", e);
            let _ = self.events.send(RecorderEvent::FallbackFailed {
                reason: e.to_string(),
            });
        }
    }
}

/// Publish one finished artifact into the library.
///
/// A denied authorization or a failed add is reported and logged, never
/// retried; the file stays where the producer left it.
fn publish(
    library: &dyn MediaLibrary,
    path: &Path,
    origin: ArtifactOrigin,
    duration: Option<Duration>,
    events: &Sender<RecorderEvent>,
) {
    match library.request_authorization() {
        AuthorizationStatus::Granted => match library.add_video(path, origin, duration) {
            Ok(record) => {
                let _ = events.send(RecorderEvent::Published {
                    path: record.path,
                    origin,
                });
            }
            Err(e) => {
                log::error!("Failed to publish {}: {}", path.display(), e);
                let _ = events.send(RecorderEvent::PublishFailed {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        },
        AuthorizationStatus::Denied => {
            log::error!("Library authorization denied for {}", path.display());
            let _ = events.send(RecorderEvent::PublishFailed {
                path: path.to_path_buf(),
                reason: "library authorization denied".into(),
            });
        }
    }
}

pub struct Recorder {
    source: Box<dyn FrameSource>,
    commands: Sender<Command>,
    events_tx: Sender<RecorderEvent>,
    events_rx: Receiver<RecorderEvent>,
    status: Arc<RwLock<WriterStatus>>,
    recording_requested: Arc<AtomicBool>,
    config: Config,
}

impl Recorder {
    pub fn new(
        mut source: Box<dyn FrameSource>,
        factory: Arc<dyn SinkFactory>,
        library: Arc<dyn MediaLibrary>,
        config: Config,
    ) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.storage_path)?;

        let (commands, command_rx) = unbounded();
        let (events_tx, events_rx) = unbounded();
        let status = Arc::new(RwLock::new(WriterStatus::Idle));
        let recording_requested = Arc::new(AtomicBool::new(false));

        let wiring = PublishWiring {
            library,
            events: events_tx.clone(),
            status: status.clone(),
            fallback_policy: config.fallback_policy,
            fallback_path: config.fallback_output_path(),
            sink_config: config.sink.clone(),
            recording_requested: recording_requested.clone(),
        };

        let mut pipeline = DeliveryPipeline::new(
            factory,
            config.streaming_output_path(),
            config.sink.clone(),
            FrameCache::new(config.cache_policy),
            command_rx,
            status.clone(),
            wiring,
        );
        source.set_callback(Box::new(move |frame| pipeline.on_frame(frame)));

        Ok(Self {
            source,
            commands,
            events_tx,
            events_rx,
            status,
            recording_requested,
            config,
        })
    }

    /// Begin delivering frames. Idempotent at the source's discretion.
    pub fn start_capture(&mut self) -> capture::Result<()> {
        self.source.start()
    }

    pub fn stop_capture(&mut self) {
        self.source.stop();
    }

    /// Flip between requesting recording and requesting stop.
    ///
    /// The request takes effect at the next frame boundary on the delivery
    /// context; a start is refused up front when the storage volume is
    /// below the free-space floor.
    pub fn toggle(&mut self) {
        if self.recording_requested.load(Ordering::SeqCst) {
            self.recording_requested.store(false, Ordering::SeqCst);
            let _ = self.commands.send(Command::Stop);
        } else {
            let available = available_space_for(&self.config.storage_path);
            if !has_sufficient_space(available, self.config.min_free_bytes) {
                let reason = format!(
                    "less than {} bytes free on the storage volume",
                    self.config.min_free_bytes
                );
                log::error!("Refusing to start recording: {}", reason);
                let _ = self.events_tx.send(RecorderEvent::StartFailed { reason });
                return;
            }
            self.recording_requested.store(true, Ordering::SeqCst);
            let _ = self.commands.send(Command::Start);
        }
    }

    pub fn is_recording_requested(&self) -> bool {
        self.recording_requested.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> WriterStatus {
        *self.status.read()
    }

    /// Receiver for lifecycle notifications; each caller gets the shared
    /// stream, so fan-out consumers should drain from one place.
    pub fn events(&self) -> Receiver<RecorderEvent> {
        self.events_rx.clone()
    }
}

/// Available bytes on the disk holding `path`, by longest mount-point match.
fn available_space_for(path: &Path) -> Option<u64> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let mut best: Option<(usize, u64)> = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if path.starts_with(mount) {
            let len = mount.as_os_str().len();
            if best.map_or(true, |(best_len, _)| len > best_len) {
                best = Some((len, disk.available_space()));
            }
        }
    }
    best.map(|(_, space)| space)
}

/// Unknown capacity does not block recording; only a confirmed shortfall does.
fn has_sufficient_space(available: Option<u64>, min_free_bytes: u64) -> bool {
    match available {
        Some(space) => space >= min_free_bytes,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameCallback;
    use crate::frame::{PixelFormat, RawFrame};
    use crate::library::mock::MockLibrary;
    use crate::writer::mock::MockSinkFactory;
    use parking_lot::Mutex;
    use std::time::Instant;

    /// Source driven by the test instead of a device.
    struct ManualSource {
        slot: Arc<Mutex<Option<FrameCallback>>>,
        started: Arc<std::sync::atomic::AtomicBool>,
    }

    impl ManualSource {
        fn new() -> (
            Self,
            Arc<Mutex<Option<FrameCallback>>>,
            Arc<std::sync::atomic::AtomicBool>,
        ) {
            let slot = Arc::new(Mutex::new(None));
            let started = Arc::new(std::sync::atomic::AtomicBool::new(false));
            (
                Self {
                    slot: slot.clone(),
                    started: started.clone(),
                },
                slot,
                started,
            )
        }
    }

    impl FrameSource for ManualSource {
        fn set_callback(&mut self, callback: FrameCallback) {
            *self.slot.lock() = Some(callback);
        }

        fn start(&mut self) -> capture::Result<()> {
            self.started.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }

        fn stop(&mut self) {
            self.started
                .store(false, std::sync::atomic::Ordering::SeqCst);
        }
    }

    fn frame(pts: u64) -> RawFrame {
        RawFrame {
            data: vec![0; 12],
            pts,
            duration: 33_000_000,
            width: 2,
            height: 2,
            format: PixelFormat::Rgb,
            capture_time: Instant::now(),
        }
    }

    fn push(slot: &Arc<Mutex<Option<FrameCallback>>>, pts: u64) {
        let mut guard = slot.lock();
        (guard.as_mut().unwrap())(frame(pts));
    }

    struct Setup {
        recorder: Recorder,
        slot: Arc<Mutex<Option<FrameCallback>>>,
        started: Arc<std::sync::atomic::AtomicBool>,
        library: Arc<MockLibrary>,
        _dir: tempfile::TempDir,
    }

    fn setup() -> Setup {
        let dir = tempfile::tempdir().unwrap();
        let (source, slot, started) = ManualSource::new();
        let (factory, _state) = MockSinkFactory::new();
        let library = Arc::new(MockLibrary::default());

        let config = Config {
            storage_path: dir.path().to_path_buf(),
            ..Config::default()
        };
        let recorder = Recorder::new(
            Box::new(source),
            Arc::new(factory),
            library.clone(),
            config,
        )
        .unwrap();

        Setup {
            recorder,
            slot,
            started,
            library,
            _dir: dir,
        }
    }

    #[test]
    fn capture_starts_and_stops_the_source() {
        let mut s = setup();
        s.recorder.start_capture().unwrap();
        assert!(s.started.load(std::sync::atomic::Ordering::SeqCst));
        s.recorder.stop_capture();
        assert!(!s.started.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn toggle_records_then_finishes_and_publishes() {
        let mut s = setup();
        let events = s.recorder.events();
        s.recorder.start_capture().unwrap();

        push(&s.slot, 0);
        s.recorder.toggle();
        assert!(s.recorder.is_recording_requested());

        for ms in [33u64, 66, 100] {
            push(&s.slot, ms * 1_000_000);
        }
        assert_eq!(s.recorder.status(), WriterStatus::Writing);

        s.recorder.toggle();
        assert!(!s.recorder.is_recording_requested());
        push(&s.slot, 133_000_000);

        // Mock finalize is synchronous, so the outcome is already in.
        assert_eq!(s.recorder.status(), WriterStatus::Completed);
        assert_eq!(s.library.added().len(), 1);
        assert_eq!(s.library.added()[0].origin, ArtifactOrigin::Streaming);

        let seen: Vec<_> = events.try_iter().collect();
        assert!(seen
            .iter()
            .any(|e| matches!(e, RecorderEvent::Started { origin_pts: 0 })));
        assert!(seen
            .iter()
            .any(|e| matches!(e, RecorderEvent::Published { .. })));
    }

    #[test]
    fn denied_authorization_reports_publish_failure() {
        let mut s = setup();
        let events = s.recorder.events();
        s.library
            .deny
            .store(true, std::sync::atomic::Ordering::Relaxed);

        s.recorder.toggle();
        push(&s.slot, 0);
        s.recorder.toggle();
        push(&s.slot, 33_000_000);

        assert!(s.library.added().is_empty());
        assert!(events
            .try_iter()
            .any(|e| matches!(e, RecorderEvent::PublishFailed { .. })));
    }

    #[test]
    fn failed_start_resets_the_toggle() {
        let dir = tempfile::tempdir().unwrap();
        let (source, slot, _started) = ManualSource::new();
        let (mut factory, _state) = MockSinkFactory::new();
        factory.fail_open = true;
        let config = Config {
            storage_path: dir.path().to_path_buf(),
            ..Config::default()
        };
        let mut recorder = Recorder::new(
            Box::new(source),
            Arc::new(factory),
            Arc::new(MockLibrary::default()),
            config,
        )
        .unwrap();
        let events = recorder.events();

        recorder.toggle();
        assert!(recorder.is_recording_requested());
        push(&slot, 0);

        // The open failed on the delivery context; the toggle follows.
        assert!(!recorder.is_recording_requested());
        assert_eq!(recorder.status(), WriterStatus::Idle);

        // The next toggle asks to start again instead of sending a dead stop.
        recorder.toggle();
        assert!(recorder.is_recording_requested());
        push(&slot, 33_000_000);

        let failures = events
            .try_iter()
            .filter(|e| matches!(e, RecorderEvent::StartFailed { .. }))
            .count();
        assert_eq!(failures, 2);
    }

    #[test]
    fn space_floor_logic_blocks_only_confirmed_shortfall() {
        assert!(has_sufficient_space(None, u64::MAX));
        assert!(has_sufficient_space(Some(100), 100));
        assert!(!has_sufficient_space(Some(99), 100));
    }
}
