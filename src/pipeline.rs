// Frame delivery pipeline — the per-frame hot path
//
// `on_frame` runs on the frame source's single dedicated context and is
// the only mutator of the write session and the frame cache. Control
// requests from other contexts are queued and take effect at the next
// frame boundary, so the session origin is always the pipeline's
// last-observed timestamp.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::RwLock;

use crate::cache::FrameCache;
use crate::encoding::SinkConfig;
use crate::frame::{CachedImage, RawFrame};
use crate::recorder::{PublishWiring, RecorderEvent};
use crate::writer::{AppendOutcome, SinkFactory, WriteSession, WriterStatus};

/// Control requests applied at frame boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
}

pub struct DeliveryPipeline {
    factory: Arc<dyn SinkFactory>,
    output_path: PathBuf,
    sink_config: SinkConfig,
    cache: FrameCache,
    session: Option<WriteSession>,
    /// Presentation timestamp of the most recently observed frame; becomes
    /// the session origin when recording starts
    last_pts: Option<u64>,
    commands: Receiver<Command>,
    status: Arc<RwLock<WriterStatus>>,
    wiring: PublishWiring,
}

impl DeliveryPipeline {
    pub(crate) fn new(
        factory: Arc<dyn SinkFactory>,
        output_path: PathBuf,
        sink_config: SinkConfig,
        cache: FrameCache,
        commands: Receiver<Command>,
        status: Arc<RwLock<WriterStatus>>,
        wiring: PublishWiring,
    ) -> Self {
        Self {
            factory,
            output_path,
            sink_config,
            cache,
            session: None,
            last_pts: None,
            commands,
            status,
            wiring,
        }
    }

    /// Handle one captured frame, in capture order.
    ///
    /// Never blocks beyond a bounded readiness check; when the sink cannot
    /// keep pace the frame is dropped for the streaming path. The frame
    /// always feeds the cache so the fallback path has material afterward.
    pub fn on_frame(&mut self, frame: RawFrame) {
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
        }

        self.last_pts = Some(frame.pts);

        if let Some(session) = self.session.as_mut() {
            if session.append(&frame) == AppendOutcome::SinkError {
                log::error!("Sink rejected frame at pts {}", frame.pts);
            }
        }

        match CachedImage::from_raw(&frame) {
            Ok(image) => self.cache.append(image),
            Err(e) => log::warn!("Skipping frame for cache: {}", e),
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Start => self.handle_start(),
            Command::Stop => self.handle_stop(),
        }
    }

    fn handle_start(&mut self) {
        if self.session.is_some() {
            // Idempotent: a second start while writing changes nothing.
            log::warn!("Recording already active, ignoring start request");
            return;
        }

        // The previous container is still flushing to the shared output
        // path; opening a new session now would delete the file out from
        // under it and let the stale finalize clobber the new state.
        if *self.status.read() == WriterStatus::Finishing {
            log::warn!("Previous session still finalizing, refusing start request");
            self.wiring
                .recording_requested
                .store(false, Ordering::SeqCst);
            let _ = self.wiring.events.send(RecorderEvent::StartFailed {
                reason: "previous recording is still finalizing".into(),
            });
            return;
        }

        self.cache.on_recording_start();

        let origin = self.last_pts.unwrap_or(0);
        match WriteSession::start(
            self.factory.as_ref(),
            &self.output_path,
            &self.sink_config,
            origin,
        ) {
            Ok(session) => {
                self.session = Some(session);
                *self.status.write() = WriterStatus::Writing;
                let _ = self
                    .wiring
                    .events
                    .send(RecorderEvent::Started { origin_pts: origin });
            }
            Err(e) => {
                // Remains Idle; recording does not start.
                log::error!("Failed to start write session: {}", e);
                self.wiring
                    .recording_requested
                    .store(false, Ordering::SeqCst);
                let _ = self.wiring.events.send(RecorderEvent::StartFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn handle_stop(&mut self) {
        let Some(session) = self.session.take() else {
            log::debug!("Stop requested while idle, nothing to do");
            return;
        };

        *self.status.write() = WriterStatus::Finishing;

        // Snapshot now, on the delivery context, so the fallback material
        // is fixed at the stop boundary regardless of what arrives later.
        let snapshot = self.cache.snapshot();
        let on_done = self.wiring.clone().into_stop_handler(snapshot);
        session.finish(on_done);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachePolicy;
    use crate::config::FallbackPolicy;
    use crate::frame::PixelFormat;
    use crate::library::mock::MockLibrary;
    use crate::writer::mock::MockSinkFactory;
    use crossbeam_channel::{unbounded, Sender};
    use std::time::Instant;

    struct Fixture {
        pipeline: DeliveryPipeline,
        commands: Sender<Command>,
        events: Receiver<RecorderEvent>,
        status: Arc<RwLock<WriterStatus>>,
        sink_state: Arc<parking_lot::Mutex<crate::writer::mock::MockSinkState>>,
        library: Arc<MockLibrary>,
        _dir: tempfile::TempDir,
    }

    fn fixture(fallback_policy: FallbackPolicy) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let (factory, sink_state) = MockSinkFactory::new();
        let (cmd_tx, cmd_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        let status = Arc::new(RwLock::new(WriterStatus::Idle));
        let library = Arc::new(MockLibrary::default());

        let wiring = PublishWiring {
            library: library.clone(),
            events: event_tx,
            status: status.clone(),
            fallback_policy,
            fallback_path: dir.path().join("video-fallback.mp4"),
            sink_config: SinkConfig::default(),
            recording_requested: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        };

        let pipeline = DeliveryPipeline::new(
            Arc::new(factory),
            dir.path().join("video.mp4"),
            SinkConfig::default(),
            FrameCache::new(CachePolicy::ResetPerRecording),
            cmd_rx,
            status.clone(),
            wiring,
        );

        Fixture {
            pipeline,
            commands: cmd_tx,
            events: event_rx,
            status,
            sink_state,
            library,
            _dir: dir,
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

    fn bad_frame(pts: u64) -> RawFrame {
        let mut f = frame(pts);
        f.data = vec![0; 5];
        f
    }

    #[test]
    fn commands_take_effect_at_the_next_frame_boundary() {
        let mut fx = fixture(FallbackPolicy::OnStreamingFailure);

        fx.pipeline.on_frame(frame(1_000_000));
        fx.commands.send(Command::Start).unwrap();
        // Nothing happens until a frame arrives.
        assert_eq!(*fx.status.read(), WriterStatus::Idle);

        fx.pipeline.on_frame(frame(34_000_000));
        assert_eq!(*fx.status.read(), WriterStatus::Writing);

        // The session origin is the last timestamp observed before start.
        match fx.events.try_recv().unwrap() {
            RecorderEvent::Started { origin_pts } => assert_eq!(origin_pts, 1_000_000),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn frames_feed_the_cache_regardless_of_recording_state() {
        let mut fx = fixture(FallbackPolicy::OnStreamingFailure);

        fx.pipeline.on_frame(frame(0));
        assert_eq!(fx.pipeline.cache_len(), 1);

        fx.commands.send(Command::Start).unwrap();
        fx.pipeline.on_frame(frame(33_000_000));
        fx.pipeline.on_frame(frame(66_000_000));
        // Start reset the cache, then both frames landed in it.
        assert_eq!(fx.pipeline.cache_len(), 2);
    }

    #[test]
    fn conversion_failure_skips_cache_but_not_the_stream() {
        let mut fx = fixture(FallbackPolicy::OnStreamingFailure);

        fx.pipeline.on_frame(frame(0));
        fx.commands.send(Command::Start).unwrap();
        fx.pipeline.on_frame(bad_frame(33_000_000));

        assert_eq!(fx.pipeline.cache_len(), 0);
        // Mock sinks accept any payload, so the stream still got the frame.
        assert_eq!(fx.sink_state.lock().appended_pts.len(), 1);
    }

    #[test]
    fn start_is_idempotent_while_writing() {
        let mut fx = fixture(FallbackPolicy::OnStreamingFailure);

        fx.commands.send(Command::Start).unwrap();
        fx.pipeline.on_frame(frame(0));
        fx.commands.send(Command::Start).unwrap();
        fx.pipeline.on_frame(frame(33_000_000));

        assert_eq!(*fx.status.read(), WriterStatus::Writing);
        // Only one Started event: the second start was a no-op.
        let started: Vec<_> = fx
            .events
            .try_iter()
            .filter(|e| matches!(e, RecorderEvent::Started { .. }))
            .collect();
        assert_eq!(started.len(), 1);
    }

    #[test]
    fn stop_while_idle_is_a_no_op() {
        let mut fx = fixture(FallbackPolicy::OnStreamingFailure);

        fx.commands.send(Command::Stop).unwrap();
        fx.pipeline.on_frame(frame(0));

        assert_eq!(*fx.status.read(), WriterStatus::Idle);
        assert!(!fx.sink_state.lock().finalized);
    }

    #[test]
    fn full_recording_cycle_reaches_completed_and_publishes() {
        let mut fx = fixture(FallbackPolicy::OnStreamingFailure);

        fx.pipeline.on_frame(frame(0));
        fx.commands.send(Command::Start).unwrap();
        for ms in [33u64, 66, 100, 133] {
            fx.pipeline.on_frame(frame(ms * 1_000_000));
        }
        fx.commands.send(Command::Stop).unwrap();
        fx.pipeline.on_frame(frame(166_000_000));

        // Mock finalize completes synchronously.
        assert_eq!(*fx.status.read(), WriterStatus::Completed);
        assert!(fx.sink_state.lock().finalized);
        assert_eq!(fx.sink_state.lock().appended_pts.len(), 4);
        // Streaming artifact was published; fallback stayed quiet.
        assert_eq!(fx.library.added().len(), 1);

        let events: Vec<_> = fx.events.try_iter().collect();
        assert!(events
            .iter()
            .any(|e| matches!(e, RecorderEvent::StreamingCompleted { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, RecorderEvent::Published { .. })));
        assert!(!events
            .iter()
            .any(|e| matches!(e, RecorderEvent::FallbackCompleted { .. })));
    }

    #[test]
    fn streaming_failure_with_empty_cache_reports_fallback_error() {
        let mut fx = fixture(FallbackPolicy::OnStreamingFailure);
        fx.sink_state.lock().fail_finalize = true;

        // The only delivered frame has an unconvertible payload, so the
        // cache stays empty and the fallback has nothing to work with.
        fx.commands.send(Command::Start).unwrap();
        fx.pipeline.on_frame(bad_frame(0));
        fx.commands.send(Command::Stop).unwrap();
        fx.pipeline.on_frame(bad_frame(33_000_000));

        assert_eq!(*fx.status.read(), WriterStatus::Failed);
        assert!(fx.library.added().is_empty());

        let events: Vec<_> = fx.events.try_iter().collect();
        assert!(events
            .iter()
            .any(|e| matches!(e, RecorderEvent::StreamingFailed { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, RecorderEvent::FallbackFailed { .. })));
    }

    #[test]
    fn open_failure_leaves_the_pipeline_idle() {
        let dir = tempfile::tempdir().unwrap();
        let (mut factory, _state) = MockSinkFactory::new();
        factory.fail_open = true;
        let (cmd_tx, cmd_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        let status = Arc::new(RwLock::new(WriterStatus::Idle));

        let requested = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let wiring = PublishWiring {
            library: Arc::new(MockLibrary::default()),
            events: event_tx,
            status: status.clone(),
            fallback_policy: FallbackPolicy::OnStreamingFailure,
            fallback_path: dir.path().join("video-fallback.mp4"),
            sink_config: SinkConfig::default(),
            recording_requested: requested.clone(),
        };
        let mut pipeline = DeliveryPipeline::new(
            Arc::new(factory),
            dir.path().join("video.mp4"),
            SinkConfig::default(),
            FrameCache::new(CachePolicy::ResetPerRecording),
            cmd_rx,
            status.clone(),
            wiring,
        );

        cmd_tx.send(Command::Start).unwrap();
        pipeline.on_frame(frame(0));

        assert_eq!(*status.read(), WriterStatus::Idle);
        assert!(matches!(
            event_rx.try_recv().unwrap(),
            RecorderEvent::StartFailed { .. }
        ));
        // The refusal also resets the controller's toggle tracking.
        assert!(!requested.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn start_is_refused_until_the_previous_finalize_completes() {
        let mut fx = fixture(FallbackPolicy::OnStreamingFailure);
        fx.sink_state.lock().defer_finalize = true;

        fx.commands.send(Command::Start).unwrap();
        fx.pipeline.on_frame(frame(0));
        fx.commands.send(Command::Stop).unwrap();
        fx.pipeline.on_frame(frame(33_000_000));
        assert_eq!(*fx.status.read(), WriterStatus::Finishing);

        // Frames keep flowing while the container flushes; the state holds.
        fx.pipeline.on_frame(frame(66_000_000));
        assert_eq!(*fx.status.read(), WriterStatus::Finishing);

        // A start in this window must not open a second sink: the old
        // pipeline is still flushing to the shared output path.
        fx.commands.send(Command::Start).unwrap();
        fx.pipeline.on_frame(frame(100_000_000));
        assert_eq!(*fx.status.read(), WriterStatus::Finishing);
        assert_eq!(fx.sink_state.lock().open_count, 1);
        assert!(fx
            .events
            .try_iter()
            .any(|e| matches!(e, RecorderEvent::StartFailed { .. })));

        crate::writer::mock::complete_deferred(&fx.sink_state);
        assert_eq!(*fx.status.read(), WriterStatus::Completed);
        assert_eq!(fx.library.added().len(), 1);

        // With the flush committed, a fresh session opens normally.
        fx.commands.send(Command::Start).unwrap();
        fx.pipeline.on_frame(frame(133_000_000));
        assert_eq!(*fx.status.read(), WriterStatus::Writing);
        assert_eq!(fx.sink_state.lock().open_count, 2);
    }
}
