// Frame types shared by the capture, writer and cache paths

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Pixel layout of a raw frame payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    /// Packed 24-bit RGB
    Rgb,
    /// Packed 24-bit BGR
    Bgr,
    /// Packed 32-bit RGBA
    Rgba,
    /// Packed 32-bit BGRA
    Bgra,
    /// Planar 4:2:0 YUV with interleaved chroma
    Nv12,
}

impl PixelFormat {
    /// GStreamer `video/x-raw` format string
    pub fn gst_name(&self) -> &'static str {
        match self {
            PixelFormat::Rgb => "RGB",
            PixelFormat::Bgr => "BGR",
            PixelFormat::Rgba => "RGBA",
            PixelFormat::Bgra => "BGRA",
            PixelFormat::Nv12 => "NV12",
        }
    }

    /// Expected payload size in bytes for a frame of the given dimensions
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Rgb | PixelFormat::Bgr => pixels * 3,
            PixelFormat::Rgba | PixelFormat::Bgra => pixels * 4,
            PixelFormat::Nv12 => pixels * 3 / 2,
        }
    }
}

/// One timestamped unit of captured image data.
///
/// Immutable after creation; the presentation timestamp comes from the
/// capture pipeline and is monotonically non-decreasing within one source.
#[derive(Clone)]
pub struct RawFrame {
    /// Raw pixel payload in `format` layout
    pub data: Vec<u8>,
    /// Presentation timestamp in nanoseconds
    pub pts: u64,
    /// Duration in nanoseconds
    pub duration: u64,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel layout of `data`
    pub format: PixelFormat,
    /// Wall-clock time when the frame was captured
    pub capture_time: Instant,
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("pts", &self.pts)
            .field("duration", &self.duration)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Error type for payload-to-image conversion
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("payload is {actual} bytes, expected {expected} for {width}x{height} {format:?}")]
    SizeMismatch {
        actual: usize,
        expected: usize,
        width: u32,
        height: u32,
        format: PixelFormat,
    },

    #[error("cannot convert {0:?} payloads to a displayable image")]
    Unsupported(PixelFormat),
}

/// A displayable image held by the frame buffer cache.
///
/// Always tightly packed RGB, independent of the source pixel layout, so
/// the fallback assembler can feed every cached image through one set of
/// caps.
#[derive(Clone, Debug)]
pub struct CachedImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl CachedImage {
    /// Convert a raw frame payload into a packed RGB image.
    ///
    /// Rejects payloads whose length does not match the declared caps and
    /// formats that need a real colorspace conversion (NV12); those frames
    /// are skipped for the cache only, the pipeline keeps running.
    pub fn from_raw(frame: &RawFrame) -> Result<Self, ConvertError> {
        let expected = frame.format.frame_size(frame.width, frame.height);
        if frame.data.len() != expected {
            return Err(ConvertError::SizeMismatch {
                actual: frame.data.len(),
                expected,
                width: frame.width,
                height: frame.height,
                format: frame.format,
            });
        }

        let data = match frame.format {
            PixelFormat::Rgb => frame.data.clone(),
            PixelFormat::Bgr => swizzle(&frame.data, 3, [2, 1, 0]),
            PixelFormat::Rgba => swizzle(&frame.data, 4, [0, 1, 2]),
            PixelFormat::Bgra => swizzle(&frame.data, 4, [2, 1, 0]),
            PixelFormat::Nv12 => return Err(ConvertError::Unsupported(frame.format)),
        };

        Ok(Self {
            data,
            width: frame.width,
            height: frame.height,
        })
    }

    /// Size of the packed RGB payload in bytes
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

/// Repack `src` from `stride`-byte pixels into RGB, picking channels by index.
fn swizzle(src: &[u8], stride: usize, order: [usize; 3]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len() / stride * 3);
    for px in src.chunks_exact(stride) {
        out.push(px[order[0]]);
        out.push(px[order[1]]);
        out.push(px[order[2]]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(format: PixelFormat, data: Vec<u8>) -> RawFrame {
        RawFrame {
            data,
            pts: 0,
            duration: 33_333_333,
            width: 2,
            height: 1,
            format,
            capture_time: Instant::now(),
        }
    }

    #[test]
    fn rgb_passes_through() {
        let img = CachedImage::from_raw(&frame(PixelFormat::Rgb, vec![1, 2, 3, 4, 5, 6])).unwrap();
        assert_eq!(img.data, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!((img.width, img.height), (2, 1));
    }

    #[test]
    fn bgra_swizzles_and_drops_alpha() {
        let img = CachedImage::from_raw(&frame(
            PixelFormat::Bgra,
            vec![10, 20, 30, 255, 40, 50, 60, 255],
        ))
        .unwrap();
        assert_eq!(img.data, vec![30, 20, 10, 60, 50, 40]);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let err = CachedImage::from_raw(&frame(PixelFormat::Rgb, vec![0; 5])).unwrap_err();
        assert!(matches!(err, ConvertError::SizeMismatch { expected: 6, .. }));
    }

    #[test]
    fn nv12_is_unsupported() {
        let err = CachedImage::from_raw(&frame(PixelFormat::Nv12, vec![0; 3])).unwrap_err();
        assert!(matches!(err, ConvertError::Unsupported(PixelFormat::Nv12)));
    }
}
