// Camera frame source
//
// Platform camera -> videoconvert -> capsfilter -> queue -> appsink, with
// the queue leaky so a stalled consumer sheds old frames instead of
// backing up into the driver. The appsink streaming thread is the single
// delivery context all frames arrive on.

use std::sync::Arc;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use parking_lot::Mutex;

use super::{CaptureError, FrameCallback, FrameSource, Result};
use crate::frame::{PixelFormat, RawFrame};

pub struct CameraSource {
    device_index: usize,
    width: u32,
    height: u32,
    fps: u32,
    callback: Arc<Mutex<Option<FrameCallback>>>,
    pipeline: Option<gst::Pipeline>,
}

impl CameraSource {
    pub fn new(device_index: usize, width: u32, height: u32, fps: u32) -> Self {
        Self {
            device_index,
            width,
            height,
            fps,
            callback: Arc::new(Mutex::new(None)),
            pipeline: None,
        }
    }

    fn create_source_element(&self) -> Result<gst::Element> {
        #[cfg(target_os = "linux")]
        let source = gst::ElementFactory::make("v4l2src")
            .property("device", format!("/dev/video{}", self.device_index))
            .build()
            .map_err(|e| CaptureError::Pipeline(format!("Failed to create v4l2src: {}", e)))?;

        #[cfg(target_os = "windows")]
        let source = gst::ElementFactory::make("mfvideosrc")
            .property("device-index", self.device_index as u32)
            .build()
            .map_err(|e| CaptureError::Pipeline(format!("Failed to create mfvideosrc: {}", e)))?;

        #[cfg(target_os = "macos")]
        let source = gst::ElementFactory::make("avfvideosrc")
            .property("device-index", self.device_index as i32)
            .build()
            .map_err(|e| CaptureError::Pipeline(format!("Failed to create avfvideosrc: {}", e)))?;

        Ok(source)
    }

    fn build_pipeline(&self) -> Result<gst::Pipeline> {
        crate::gst_env::init();

        let pipeline = gst::Pipeline::new();
        let source = self.create_source_element()?;

        let videoconvert = gst::ElementFactory::make("videoconvert")
            .build()
            .map_err(|e| CaptureError::Pipeline(format!("Failed to create videoconvert: {}", e)))?;

        let caps = gst::Caps::builder("video/x-raw")
            .field("format", PixelFormat::Rgb.gst_name())
            .field("width", self.width as i32)
            .field("height", self.height as i32)
            .field("framerate", gst::Fraction::new(self.fps as i32, 1))
            .build();
        let capsfilter = gst::ElementFactory::make("capsfilter")
            .property("caps", &caps)
            .build()
            .map_err(|e| CaptureError::Pipeline(format!("Failed to create capsfilter: {}", e)))?;

        // Shed frames here rather than stalling the camera driver.
        let queue = gst::ElementFactory::make("queue")
            .property("max-size-buffers", 4u32)
            .property_from_str("leaky", "downstream")
            .build()
            .map_err(|e| CaptureError::Pipeline(format!("Failed to create queue: {}", e)))?;

        let appsink = gst_app::AppSink::builder()
            .name("camera-sink")
            .caps(&caps)
            .max_buffers(2)
            .drop(true)
            .sync(false)
            .build();

        pipeline
            .add_many([
                &source,
                &videoconvert,
                &capsfilter,
                &queue,
                appsink.upcast_ref(),
            ])
            .map_err(|e| CaptureError::Pipeline(format!("Failed to add elements: {}", e)))?;
        gst::Element::link_many([
            &source,
            &videoconvert,
            &capsfilter,
            &queue,
            appsink.upcast_ref(),
        ])
        .map_err(|e| CaptureError::Pipeline(format!("Failed to link pipeline: {}", e)))?;

        let callback = self.callback.clone();
        let width = self.width;
        let height = self.height;
        // Fallback when buffer metadata lacks a duration
        let default_duration_ns = 1_000_000_000u64 / u64::from(self.fps.max(1));

        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    if let Some(buffer) = sample.buffer() {
                        let pts = buffer.pts().map(|t| t.nseconds()).unwrap_or(0);
                        let duration = buffer
                            .duration()
                            .map(|t| t.nseconds())
                            .unwrap_or(default_duration_ns);

                        if let Ok(map) = buffer.map_readable() {
                            let frame = RawFrame {
                                data: map.as_slice().to_vec(),
                                pts,
                                duration,
                                width,
                                height,
                                format: PixelFormat::Rgb,
                                capture_time: std::time::Instant::now(),
                            };
                            if let Some(cb) = callback.lock().as_mut() {
                                cb(frame);
                            }
                        }
                    }
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        Ok(pipeline)
    }
}

impl FrameSource for CameraSource {
    fn set_callback(&mut self, callback: FrameCallback) {
        *self.callback.lock() = Some(callback);
    }

    fn start(&mut self) -> Result<()> {
        if self.pipeline.is_some() {
            log::warn!("Camera source already running");
            return Ok(());
        }

        let pipeline = self.build_pipeline()?;
        pipeline.set_state(gst::State::Playing)?;
        log::info!(
            "Camera {} capturing {}x{} @ {}fps",
            self.device_index,
            self.width,
            self.height,
            self.fps
        );
        self.pipeline = Some(pipeline);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gst::State::Null) {
                log::warn!("Failed to stop camera pipeline: {}", e);
            }
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.stop();
    }
}
