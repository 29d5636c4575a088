//! Raw frame to JPEG encoding

use bytes::Bytes;
use jpeg_encoder::{ColorType, Encoder, SamplingFactor};
use thiserror::Error;

use crate::capture::PixelFormat;

/// JPEG quality for frames compressed from raw capture formats
const JPEG_QUALITY: u8 = 75;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("frame truncated: got {got} bytes, expected {expected} for {width}x{height} YUYV")]
    Truncated {
        got: usize,
        expected: usize,
        width: u32,
        height: u32,
    },

    #[error("frame dimensions {0}x{1} exceed JPEG limits")]
    Oversize(u32, u32),

    #[error("jpeg encoding failed: {0}")]
    Jpeg(#[from] jpeg_encoder::EncodingError),
}

/// Turns one raw capture buffer into one JPEG image.
///
/// JPEG-family input passes through byte-identical; packed YUYV is
/// de-interleaved into planes at its native 4:2:2 subsampling and
/// compressed. Plane scratch is reused across frames, the output
/// allocation is fresh per frame so clients can hold it indefinitely.
pub struct FrameEncoder {
    format: PixelFormat,
    width: u32,
    height: u32,

    // YUYV scratch, unused for pass-through formats
    y: Vec<u8>,
    cb: Vec<u8>,
    cr: Vec<u8>,
    interleaved: Vec<u8>,
}

impl FrameEncoder {
    /// Creates an encoder for the negotiated capture format
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            y: Vec::new(),
            cb: Vec::new(),
            cr: Vec::new(),
            interleaved: Vec::new(),
        }
    }

    /// Encodes one raw frame into a shareable JPEG image.
    ///
    /// The input buffer is not referenced past return.
    pub fn encode(&mut self, raw: &[u8]) -> Result<Bytes, EncodeError> {
        if self.format.is_jpeg() {
            return Ok(Bytes::copy_from_slice(raw));
        }

        self.encode_yuyv(raw)
    }

    fn encode_yuyv(&mut self, raw: &[u8]) -> Result<Bytes, EncodeError> {
        let expected = self.width as usize * self.height as usize * 2;
        if raw.len() < expected {
            return Err(EncodeError::Truncated {
                got: raw.len(),
                expected,
                width: self.width,
                height: self.height,
            });
        }

        let width =
            u16::try_from(self.width).map_err(|_| EncodeError::Oversize(self.width, self.height))?;
        let height = u16::try_from(self.height)
            .map_err(|_| EncodeError::Oversize(self.width, self.height))?;

        yuyv_to_planar(&raw[..expected], &mut self.y, &mut self.cb, &mut self.cr);
        planar_to_interleaved(&self.y, &self.cb, &self.cr, &mut self.interleaved);

        let mut out = Vec::with_capacity(expected / 4);
        let mut encoder = Encoder::new(&mut out, JPEG_QUALITY);
        encoder.set_sampling_factor(SamplingFactor::F_2_1);
        encoder.encode(&self.interleaved, width, height, ColorType::Ycbcr)?;

        Ok(Bytes::from(out))
    }
}

/// De-interleaves packed YUYV into planar Y/Cb/Cr at native 4:2:2
/// subsampling: each four-byte group carries Y0 Cb Y1 Cr.
fn yuyv_to_planar(raw: &[u8], y: &mut Vec<u8>, cb: &mut Vec<u8>, cr: &mut Vec<u8>) {
    y.clear();
    cb.clear();
    cr.clear();
    y.reserve(raw.len() / 2);
    cb.reserve(raw.len() / 4);
    cr.reserve(raw.len() / 4);

    for group in raw.chunks_exact(4) {
        y.push(group[0]);
        y.push(group[2]);
        cb.push(group[1]);
        cr.push(group[3]);
    }
}

/// Expands 4:2:2 planes into the interleaved YCbCr layout the compressor
/// takes. Each chroma sample is repeated for its pixel pair, which the
/// compressor's 2x1 subsampling collapses back to the native samples.
fn planar_to_interleaved(y: &[u8], cb: &[u8], cr: &[u8], out: &mut Vec<u8>) {
    out.clear();
    out.reserve(y.len() * 3);

    for (i, &luma) in y.iter().enumerate() {
        let c = i / 2;
        out.push(luma);
        out.push(cb[c]);
        out.push(cr[c]);
    }
}
