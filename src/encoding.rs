// Output codec, container and sink parameter definitions
//
// The streaming writer and the fallback assembler share one parameter
// block. Bitrate is derived from frame area times a quality factor, the
// same computation the recorder applies to its preview bounds.

use serde::{Deserialize, Serialize};

/// Quality factor applied to `width * height` to derive the target bitrate
/// in bits per second. 10.1 corresponds to a high capture preset.
pub const DEFAULT_QUALITY_FACTOR: f64 = 10.1;

/// Fragment interval for the streaming container, in milliseconds. A crash
/// mid-recording loses at most the last uncommitted fragment.
pub const DEFAULT_FRAGMENT_INTERVAL_MS: u32 = 1_000;

/// Supported video codecs for the output container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// H.264/AVC - widely supported, hardware friendly
    H264,
}

impl Default for VideoCodec {
    fn default() -> Self {
        VideoCodec::H264
    }
}

impl VideoCodec {
    /// GStreamer caps name for the encoded stream
    pub fn gst_caps_name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/x-h264",
        }
    }

    /// GStreamer encoder element name
    pub fn gst_encoder(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "x264enc",
        }
    }

    /// GStreamer parser element name
    pub fn gst_parser(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264parse",
        }
    }

    /// The container format this codec is written into
    pub fn container(&self) -> ContainerFormat {
        match self {
            VideoCodec::H264 => ContainerFormat::Mp4,
        }
    }

    /// Human-readable display name
    pub fn display_name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "H.264",
        }
    }
}

/// Supported container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    /// MP4, written fragmented so partial files stay playable
    Mp4,
}

impl ContainerFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
        }
    }

    pub fn gst_muxer(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4mux",
        }
    }
}

/// Encoding parameters for one output container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Output width in pixels (taken from the preview surface bounds)
    pub width: u32,
    /// Output height in pixels
    pub height: u32,
    /// Nominal frame rate; the streaming path carries real timestamps, the
    /// fallback assembler paces images at exactly this rate
    pub fps: u32,
    /// Codec for the encoded stream
    #[serde(default)]
    pub codec: VideoCodec,
    /// Bitrate quality factor (bits per pixel per second)
    #[serde(default = "default_quality_factor")]
    pub quality_factor: f64,
    /// Fragment interval in milliseconds
    #[serde(default = "default_fragment_interval_ms")]
    pub fragment_interval_ms: u32,
}

fn default_quality_factor() -> f64 {
    DEFAULT_QUALITY_FACTOR
}

fn default_fragment_interval_ms() -> u32 {
    DEFAULT_FRAGMENT_INTERVAL_MS
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            codec: VideoCodec::default(),
            quality_factor: DEFAULT_QUALITY_FACTOR,
            fragment_interval_ms: DEFAULT_FRAGMENT_INTERVAL_MS,
        }
    }
}

impl SinkConfig {
    /// Target bitrate in bits per second: frame area times the quality factor
    pub fn bitrate(&self) -> u32 {
        (self.width as f64 * self.height as f64 * self.quality_factor).round() as u32
    }

    /// Target bitrate in kilobits per second (what x264enc expects)
    pub fn bitrate_kbps(&self) -> u32 {
        (self.bitrate() / 1_000).max(1)
    }

    /// Nominal duration of one frame in nanoseconds
    pub fn frame_duration_ns(&self) -> u64 {
        1_000_000_000 / self.fps.max(1) as u64
    }

    /// Parameters for a sink fed from discrete images, dimensions taken
    /// from the first image in the sequence
    pub fn for_images(&self, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitrate_is_area_times_quality_factor() {
        let config = SinkConfig::default();
        assert_eq!(config.bitrate(), (1280.0_f64 * 720.0 * 10.1).round() as u32);
        assert_eq!(config.bitrate_kbps(), config.bitrate() / 1_000);
    }

    #[test]
    fn frame_duration_matches_fps() {
        let config = SinkConfig {
            fps: 30,
            ..SinkConfig::default()
        };
        assert_eq!(config.frame_duration_ns(), 33_333_333);
    }

    #[test]
    fn codec_maps_to_fragmented_mp4() {
        let codec = VideoCodec::H264;
        assert_eq!(codec.container().extension(), "mp4");
        assert_eq!(codec.container().gst_muxer(), "mp4mux");
        assert_eq!(codec.gst_caps_name(), "video/x-h264");
    }

    #[test]
    fn for_images_overrides_dimensions_only() {
        let config = SinkConfig::default().for_images(640, 480);
        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.fps, 30);
    }
}
