//! Capture source abstraction and device negotiation policy

mod v4l2;

pub use v4l2::V4l2Source;

use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("device i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out waiting for frame")]
    Timeout,

    #[error("frame read failed: {0}")]
    Read(std::io::Error),

    #[error("device advertises no supported pixel format")]
    NoSupportedFormat,

    #[error("requested format {0:?} not offered by device")]
    FormatNotAdvertised(String),

    #[error("format {0} is not supported")]
    UnsupportedFormat(String),

    #[error("device advertises no frame sizes")]
    NoFrameSizes,

    #[error("no frame size matching {0}x{1}")]
    NoMatchingFrameSize(u32, u32),
}

/// Pixel formats the encode path can handle.
///
/// Negotiation only ever selects one of these, so an unsupported format
/// cannot reach the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Motion-JPEG, frames are complete JPEG images
    Mjpg,
    /// Progressive/partial JPEG variant, also complete JPEG images
    Pjpg,
    /// Packed 4:2:2 YUV, two pixels per four bytes
    Yuyv,
}

impl PixelFormat {
    /// Maps a fourcc string to a supported format
    pub fn from_fourcc(fourcc: &str) -> Option<Self> {
        match fourcc {
            "MJPG" => Some(Self::Mjpg),
            "PJPG" => Some(Self::Pjpg),
            "YUYV" => Some(Self::Yuyv),
            _ => None,
        }
    }

    /// The fourcc bytes for this format
    pub fn fourcc(&self) -> &'static [u8; 4] {
        match self {
            Self::Mjpg => b"MJPG",
            Self::Pjpg => b"PJPG",
            Self::Yuyv => b"YUYV",
        }
    }

    /// Whether frames already arrive as compressed JPEG images
    pub fn is_jpeg(&self) -> bool {
        matches!(self, Self::Mjpg | Self::Pjpg)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // fourcc bytes are ASCII
        f.write_str(std::str::from_utf8(self.fourcc()).unwrap_or("????"))
    }
}

/// One pixel format advertised by a device
#[derive(Debug, Clone)]
pub struct AdvertisedFormat {
    /// Fourcc rendered as a string, e.g. "YUYV"
    pub fourcc: String,
    /// Driver description, e.g. "YUYV 4:2:2"
    pub description: String,
}

/// Selects the pixel format to capture with.
///
/// A requested format (matched against fourcc or driver description) must be
/// advertised and supported. Without a request, the first supported format in
/// enumeration order wins.
pub fn select_format(
    advertised: &[AdvertisedFormat],
    requested: Option<&str>,
) -> Result<PixelFormat, CaptureError> {
    match requested {
        Some(wanted) => {
            let found = advertised
                .iter()
                .find(|f| f.fourcc == wanted || f.description == wanted)
                .ok_or_else(|| CaptureError::FormatNotAdvertised(wanted.to_string()))?;
            PixelFormat::from_fourcc(&found.fourcc)
                .ok_or_else(|| CaptureError::UnsupportedFormat(found.fourcc.clone()))
        }
        None => advertised
            .iter()
            .find_map(|f| PixelFormat::from_fourcc(&f.fourcc))
            .ok_or(CaptureError::NoSupportedFormat),
    }
}

/// Selects the frame size to capture at.
///
/// A requested size must match an advertised size exactly. Without a request,
/// the largest advertised size by pixel area wins.
pub fn select_size(
    advertised: &[(u32, u32)],
    requested: Option<(u32, u32)>,
) -> Result<(u32, u32), CaptureError> {
    match requested {
        Some((w, h)) => advertised
            .iter()
            .find(|&&s| s == (w, h))
            .copied()
            .ok_or(CaptureError::NoMatchingFrameSize(w, h)),
        None => advertised
            .iter()
            .max_by_key(|&&(w, h)| w as u64 * h as u64)
            .copied()
            .ok_or(CaptureError::NoFrameSizes),
    }
}

/// A capture device producing raw frame buffers.
///
/// Pixel format and dimensions are fixed once the device is negotiated; only
/// the frame payload varies per cycle.
pub trait FrameSource: Send {
    /// Negotiated pixel format
    fn pixel_format(&self) -> PixelFormat;

    /// Negotiated frame dimensions
    fn dimensions(&self) -> (u32, u32);

    /// Blocks until a frame is ready or the timeout elapses.
    ///
    /// Returns `CaptureError::Timeout` when no frame arrived in time; any
    /// other error means the device is unusable.
    fn wait_frame(&mut self, timeout: Duration) -> Result<(), CaptureError>;

    /// Dequeues the ready frame, copied out of the driver's buffer.
    ///
    /// The driver reuses its buffer across reads, so the returned `Vec` is
    /// the caller's only safe handle on the frame. A zero-length frame is a
    /// transient driver hiccup, not an error.
    fn read_frame(&mut self) -> Result<Vec<u8>, CaptureError>;
}
