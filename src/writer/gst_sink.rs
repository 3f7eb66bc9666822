// Fragmented MP4 sink backed by a GStreamer pipeline
//
// Pipeline: appsrc ! videoconvert ! x264enc ! h264parse ! mp4mux ! filesink
//
// The muxer writes a fragment every `fragment_interval_ms`, so an abrupt
// termination mid-recording loses at most the last uncommitted fragment.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;

use super::sink::{FinalizeCallback, FinalizedArtifact, SinkFactory, VideoSink};
use super::{Result, WriterError};
use crate::encoding::SinkConfig;
use crate::frame::{PixelFormat, RawFrame};

/// How many frames worth of data the appsrc queue may hold before the sink
/// reports not-ready. Small on purpose: the delivery pipeline drops rather
/// than queues when the encoder falls behind.
const READINESS_WINDOW_FRAMES: u64 = 4;

pub struct GstFileSink {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    output_path: PathBuf,
    /// End of the last written frame (pts + duration, ns) for duration reporting
    last_pts_end_ns: u64,
}

impl GstFileSink {
    pub fn open(path: &Path, config: &SinkConfig) -> Result<Self> {
        crate::gst_env::init();

        let pipeline = gst::Pipeline::new();
        let codec = config.codec;

        // The capture adapter normalizes frames to packed RGB.
        let video_info = gst_video::VideoInfo::builder(
            gst_video::VideoFormat::Rgb,
            config.width,
            config.height,
        )
        .fps(gst::Fraction::new(config.fps.max(1) as i32, 1))
        .build()
        .map_err(|e| WriterError::Pipeline(format!("Invalid video parameters: {}", e)))?;
        let caps = video_info
            .to_caps()
            .map_err(|e| WriterError::Pipeline(format!("Failed to build caps: {}", e)))?;

        let appsrc = gst_app::AppSrc::builder()
            .name("src")
            .caps(&caps)
            .format(gst::Format::Time)
            .is_live(true)
            .build();
        let frame_bytes = PixelFormat::Rgb.frame_size(config.width, config.height) as u64;
        appsrc.set_max_bytes(READINESS_WINDOW_FRAMES * frame_bytes);

        let videoconvert = gst::ElementFactory::make("videoconvert")
            .build()
            .map_err(|e| WriterError::Pipeline(format!("Failed to create videoconvert: {}", e)))?;

        let encoder = gst::ElementFactory::make(codec.gst_encoder())
            .property("bitrate", config.bitrate_kbps())
            .property("key-int-max", config.fps.max(1) * 2)
            .property_from_str("tune", "zerolatency")
            .property_from_str("speed-preset", "veryfast")
            .build()
            .map_err(|e| {
                WriterError::Pipeline(format!("Failed to create {}: {}", codec.gst_encoder(), e))
            })?;

        let parser = gst::ElementFactory::make(codec.gst_parser())
            .build()
            .map_err(|e| {
                WriterError::Pipeline(format!("Failed to create {}: {}", codec.gst_parser(), e))
            })?;

        let muxer = gst::ElementFactory::make(codec.container().gst_muxer())
            .property("fragment-duration", config.fragment_interval_ms)
            .build()
            .map_err(|e| {
                WriterError::Pipeline(format!(
                    "Failed to create {}: {}",
                    codec.container().gst_muxer(),
                    e
                ))
            })?;

        let filesink = gst::ElementFactory::make("filesink")
            .property("location", path.to_string_lossy().to_string())
            .property("async", false)
            .build()
            .map_err(|e| WriterError::Pipeline(format!("Failed to create filesink: {}", e)))?;

        pipeline
            .add_many([
                appsrc.upcast_ref(),
                &videoconvert,
                &encoder,
                &parser,
                &muxer,
                &filesink,
            ])
            .map_err(|e| WriterError::Pipeline(format!("Failed to add elements: {}", e)))?;
        gst::Element::link_many([
            appsrc.upcast_ref(),
            &videoconvert,
            &encoder,
            &parser,
            &muxer,
            &filesink,
        ])
        .map_err(|e| WriterError::Pipeline(format!("Failed to link pipeline: {}", e)))?;

        // appsrc with is_live does not need preroll; the pipeline reaches
        // PLAYING when the first buffer arrives.
        pipeline.set_state(gst::State::Playing)?;

        log::info!(
            "Opened {} sink at {} ({} kbit/s, fragment every {} ms)",
            codec.display_name(),
            path.display(),
            config.bitrate_kbps(),
            config.fragment_interval_ms
        );

        Ok(Self {
            pipeline,
            appsrc,
            output_path: path.to_path_buf(),
            last_pts_end_ns: 0,
        })
    }

    fn wait_for_eos(&self) -> Result<()> {
        if let Err(e) = self.appsrc.end_of_stream() {
            log::warn!("Failed to send EOS: {:?}", e);
        }

        // A bus timeout without EOS means the container never committed
        // its trailing data; the file must not be treated as authoritative.
        let mut outcome: Result<()> = Err(WriterError::Pipeline(
            "No EOS within 30 seconds, container may be truncated".into(),
        ));
        if let Some(bus) = self.pipeline.bus() {
            for msg in bus.iter_timed(gst::ClockTime::from_seconds(30)) {
                match msg.view() {
                    gst::MessageView::Eos(..) => {
                        outcome = Ok(());
                        break;
                    }
                    gst::MessageView::Error(err) => {
                        outcome = Err(WriterError::Pipeline(format!(
                            "Pipeline error: {} ({:?})",
                            err.error(),
                            err.debug()
                        )));
                        break;
                    }
                    _ => {}
                }
            }
        }

        let _ = self.pipeline.set_state(gst::State::Null);

        outcome
    }

    fn run_finalize(&self) -> Result<FinalizedArtifact> {
        let content_duration = Duration::from_nanos(self.last_pts_end_ns);
        self.wait_for_eos()?;

        let bytes = std::fs::metadata(&self.output_path)
            .map_err(|e| {
                WriterError::Pipeline(format!(
                    "No output file at {}: {}",
                    self.output_path.display(),
                    e
                ))
            })?
            .len();

        Ok(FinalizedArtifact {
            path: self.output_path.clone(),
            duration: content_duration,
            bytes,
        })
    }
}

impl VideoSink for GstFileSink {
    fn is_ready_for_more(&self) -> bool {
        let max = self.appsrc.max_bytes();
        max == 0 || self.appsrc.current_level_bytes() < max
    }

    fn append(&mut self, frame: &RawFrame) -> Result<()> {
        if frame.format != PixelFormat::Rgb {
            return Err(WriterError::Pipeline(format!(
                "Unexpected pixel format {:?}, sink negotiated RGB",
                frame.format
            )));
        }

        let mut buffer = gst::Buffer::from_slice(frame.data.clone());
        {
            let buffer_ref = buffer
                .get_mut()
                .ok_or_else(|| WriterError::Pipeline("Buffer not writable".into()))?;
            buffer_ref.set_pts(gst::ClockTime::from_nseconds(frame.pts));
            buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame.duration));
        }

        let pts_end = frame.pts + frame.duration;
        if pts_end > self.last_pts_end_ns {
            self.last_pts_end_ns = pts_end;
        }

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| WriterError::Pipeline(format!("Failed to push buffer: {:?}", e)))?;

        Ok(())
    }

    fn finalize(self: Box<Self>, on_done: FinalizeCallback) {
        // The callback lives in a shared slot so it still fires when the
        // thread cannot be spawned; the session must never be left in
        // Finishing with no completion.
        let slot = Arc::new(Mutex::new(Some(on_done)));
        let thread_slot = slot.clone();

        let spawned = std::thread::Builder::new()
            .name("camrec-finalize".into())
            .spawn(move || {
                let result = self.run_finalize();
                match &result {
                    Ok(artifact) => log::info!(
                        "Container finalized: {} ({} bytes, {:.2}s)",
                        artifact.path.display(),
                        artifact.bytes,
                        artifact.duration.as_secs_f64()
                    ),
                    Err(e) => log::error!("Container finalize failed: {}", e),
                }
                if let Some(on_done) = thread_slot.lock().take() {
                    on_done(result);
                }
            });

        if let Err(e) = spawned {
            log::error!("Failed to spawn finalize thread: {}", e);
            if let Some(on_done) = slot.lock().take() {
                on_done(Err(WriterError::Pipeline(format!(
                    "Failed to spawn finalize thread: {}",
                    e
                ))));
            }
        }
    }
}

impl Drop for GstFileSink {
    fn drop(&mut self) {
        // Covers error paths where finalize never ran.
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

/// Production factory producing fragmented MP4 file sinks
pub struct GstSinkFactory;

impl SinkFactory for GstSinkFactory {
    fn open(&self, path: &Path, config: &SinkConfig) -> Result<Box<dyn VideoSink>> {
        Ok(Box::new(GstFileSink::open(path, config)?))
    }
}
