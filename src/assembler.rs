// Fallback movie assembler
//
// Synthesizes a container file from an ordered sequence of cached images,
// pacing them at the configured nominal rate. Used when the streaming
// writer fails (or unconditionally, depending on policy), so it must not
// assume anything about the streaming pipeline's state.

use std::path::PathBuf;
use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;

use crate::encoding::SinkConfig;
use crate::frame::CachedImage;

/// Error type for fallback assembly
#[derive(Debug, thiserror::Error)]
pub enum AssemblerError {
    #[error("cannot assemble a movie from an empty frame sequence")]
    EmptySequence,

    #[error("GStreamer state error: {0}")]
    StateChange(#[from] gst::StateChangeError),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AssemblerError>;

/// The assembled movie file
#[derive(Debug, Clone)]
pub struct AssembledMovie {
    pub path: PathBuf,
    /// Nominal duration (frame count over the configured rate)
    pub duration: Duration,
    pub frames: u64,
    pub bytes: u64,
}

/// Completion notification; fires from the assembly thread
pub type AssembleCallback = Box<dyn FnOnce(Result<AssembledMovie>) + Send + 'static>;

/// Assemble a movie from `images`, writing to `output`.
///
/// Encoding parameters derive from `base` with dimensions taken from the
/// first image. Usage errors (empty sequence) surface synchronously;
/// everything else is asynchronous and reported through `on_done`. The
/// caller is never blocked on encoding.
pub fn assemble(
    images: Vec<CachedImage>,
    base: &SinkConfig,
    output: PathBuf,
    on_done: AssembleCallback,
) -> Result<()> {
    let first = images.first().ok_or(AssemblerError::EmptySequence)?;
    let config = base.for_images(first.width, first.height);

    log::info!(
        "Assembling fallback movie from {} images at {} fps -> {}",
        images.len(),
        config.fps,
        output.display()
    );

    std::thread::Builder::new()
        .name("camrec-assembler".into())
        .spawn(move || {
            let result = run_assembly(&images, &config, &output);
            match &result {
                Ok(movie) => log::info!(
                    "Fallback movie ready: {} ({} frames, {} bytes)",
                    movie.path.display(),
                    movie.frames,
                    movie.bytes
                ),
                Err(e) => log::error!("Fallback assembly failed: {}", e),
            }
            on_done(result);
        })
        .map_err(|e| AssemblerError::Pipeline(format!("Failed to spawn assembly thread: {}", e)))?;

    Ok(())
}

/// Build the encode pipeline, push every image in sequence order, finalize.
fn run_assembly(
    images: &[CachedImage],
    config: &SinkConfig,
    output: &PathBuf,
) -> Result<AssembledMovie> {
    crate::gst_env::init();

    if output.exists() {
        if let Err(e) = std::fs::remove_file(output) {
            log::warn!(
                "Cannot delete existing file {}: {}",
                output.display(),
                e
            );
        }
    }

    let pipeline = gst::Pipeline::new();
    let codec = config.codec;

    let video_info =
        gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, config.width, config.height)
            .fps(gst::Fraction::new(config.fps.max(1) as i32, 1))
            .build()
            .map_err(|e| AssemblerError::Pipeline(format!("Invalid video parameters: {}", e)))?;
    let caps = video_info
        .to_caps()
        .map_err(|e| AssemblerError::Pipeline(format!("Failed to build caps: {}", e)))?;

    let appsrc = gst_app::AppSrc::builder()
        .name("src")
        .caps(&caps)
        .format(gst::Format::Time)
        .build();

    let videoconvert = gst::ElementFactory::make("videoconvert")
        .build()
        .map_err(|e| AssemblerError::Pipeline(format!("Failed to create videoconvert: {}", e)))?;

    let encoder = gst::ElementFactory::make(codec.gst_encoder())
        .property("bitrate", config.bitrate_kbps())
        .property("key-int-max", config.fps.max(1) * 2)
        .property_from_str("speed-preset", "veryfast")
        .build()
        .map_err(|e| {
            AssemblerError::Pipeline(format!("Failed to create {}: {}", codec.gst_encoder(), e))
        })?;

    let parser = gst::ElementFactory::make(codec.gst_parser())
        .build()
        .map_err(|e| {
            AssemblerError::Pipeline(format!("Failed to create {}: {}", codec.gst_parser(), e))
        })?;

    let muxer = gst::ElementFactory::make(codec.container().gst_muxer())
        .build()
        .map_err(|e| {
            AssemblerError::Pipeline(format!(
                "Failed to create {}: {}",
                codec.container().gst_muxer(),
                e
            ))
        })?;

    let filesink = gst::ElementFactory::make("filesink")
        .property("location", output.to_string_lossy().to_string())
        .property("async", false)
        .build()
        .map_err(|e| AssemblerError::Pipeline(format!("Failed to create filesink: {}", e)))?;

    pipeline
        .add_many([
            appsrc.upcast_ref(),
            &videoconvert,
            &encoder,
            &parser,
            &muxer,
            &filesink,
        ])
        .map_err(|e| AssemblerError::Pipeline(format!("Failed to add elements: {}", e)))?;
    gst::Element::link_many([
        appsrc.upcast_ref(),
        &videoconvert,
        &encoder,
        &parser,
        &muxer,
        &filesink,
    ])
    .map_err(|e| AssemblerError::Pipeline(format!("Failed to link pipeline: {}", e)))?;

    pipeline.set_state(gst::State::Playing)?;

    let frame_duration = config.frame_duration_ns();
    let mut frames_written = 0u64;
    for (index, image) in images.iter().enumerate() {
        if image.width != config.width || image.height != config.height {
            log::warn!(
                "Skipping image {} with mismatched dimensions {}x{}",
                index,
                image.width,
                image.height
            );
            continue;
        }

        let mut buffer = gst::Buffer::from_slice(image.data.clone());
        {
            let buffer_ref = buffer
                .get_mut()
                .ok_or_else(|| AssemblerError::Pipeline("Buffer not writable".into()))?;
            buffer_ref.set_pts(gst::ClockTime::from_nseconds(frames_written * frame_duration));
            buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_duration));
        }

        appsrc
            .push_buffer(buffer)
            .map_err(|e| AssemblerError::Pipeline(format!("Failed to push buffer: {:?}", e)))?;
        frames_written += 1;
    }

    if let Err(e) = appsrc.end_of_stream() {
        log::warn!("Failed to send EOS: {:?}", e);
    }

    let mut committed = false;
    let mut pipeline_error: Option<String> = None;
    if let Some(bus) = pipeline.bus() {
        for msg in bus.iter_timed(gst::ClockTime::from_seconds(30)) {
            match msg.view() {
                gst::MessageView::Eos(..) => {
                    committed = true;
                    break;
                }
                gst::MessageView::Error(err) => {
                    pipeline_error =
                        Some(format!("Pipeline error: {} ({:?})", err.error(), err.debug()));
                    break;
                }
                _ => {}
            }
        }
    }

    let _ = pipeline.set_state(gst::State::Null);

    if let Some(err) = pipeline_error {
        return Err(AssemblerError::Pipeline(err));
    }
    if !committed {
        // Timed out without EOS; whatever reached disk is not trustworthy.
        return Err(AssemblerError::Pipeline(
            "No EOS within 30 seconds, output may be truncated".into(),
        ));
    }

    let bytes = std::fs::metadata(output)
        .map_err(|e| AssemblerError::Pipeline(format!("No output file: {}", e)))?
        .len();

    Ok(AssembledMovie {
        path: output.clone(),
        duration: Duration::from_nanos(frames_written * frame_duration),
        frames: frames_written,
        bytes,
    })
}
