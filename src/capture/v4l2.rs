//! V4L2 capture device

use std::time::Duration;

use tracing::info;
use v4l::{
    buffer::Type,
    framesize::FrameSizeEnum,
    io::{
        mmap::Stream as MmapStream,
        traits::{CaptureStream, Stream},
    },
    video::Capture,
    Device, Format, FourCC,
};

use super::{
    select_format, select_size, AdvertisedFormat, CaptureError, FrameSource, PixelFormat,
};
use crate::config::Config;

/// A negotiated V4L2 capture device with a running mmap stream
pub struct V4l2Source {
    fd: std::os::raw::c_int,
    stream: MmapStream<'static>,
    format: PixelFormat,
    width: u32,
    height: u32,
}

impl V4l2Source {
    /// Opens the device and negotiates format and frame size.
    ///
    /// Capability diagnostics (formats, sizes, frame intervals) are printed
    /// to stderr before streaming begins. Any negotiation failure is a
    /// startup error; the device is unusable without operator intervention.
    pub fn open(config: &Config) -> Result<Self, CaptureError> {
        let mut device = Device::with_path(&config.device)?;

        let descriptions = device.enum_formats()?;
        eprintln!("Available formats:");
        for desc in &descriptions {
            eprintln!("{} ({})", desc.fourcc, desc.description);
        }

        let advertised: Vec<AdvertisedFormat> = descriptions
            .iter()
            .map(|d| AdvertisedFormat {
                fourcc: d.fourcc.to_string(),
                description: d.description.clone(),
            })
            .collect();
        let format = select_format(&advertised, config.format.as_deref())?;

        let sizes = enum_discrete_sizes(&device, FourCC::new(format.fourcc()))?;
        eprintln!("Supported frame sizes for format {}:", format);
        for (w, h) in &sizes {
            eprintln!("{}x{}", w, h);
        }
        let (width, height) = select_size(&sizes, config.requested_size())?;

        eprintln!("Requesting {} {}x{}", format, width, height);
        let fmt = device.set_format(&Format::new(width, height, FourCC::new(format.fourcc())))?;

        // The driver may substitute its own format; re-validate the reply.
        let format = PixelFormat::from_fourcc(&fmt.fourcc.to_string())
            .ok_or_else(|| CaptureError::UnsupportedFormat(fmt.fourcc.to_string()))?;
        eprintln!(
            "Resulting image format: {} {}x{}",
            format, fmt.width, fmt.height
        );

        if let Ok(intervals) = device.enum_frameintervals(fmt.fourcc, fmt.width, fmt.height) {
            eprintln!(
                "Supported frame intervals for {} {}x{}:",
                format, fmt.width, fmt.height
            );
            for interval in intervals {
                eprintln!("{:?}", interval.interval);
            }
        }

        let fd = device.handle().fd();

        // Leak device to static for MmapStream
        let device: &'static Device = Box::leak(Box::new(device));
        let mut stream = MmapStream::new(device, Type::VideoCapture)?;
        stream.start()?;

        info!(
            device = %config.device,
            format = %format,
            width = fmt.width,
            height = fmt.height,
            "capture stream started"
        );

        Ok(Self {
            fd,
            stream,
            format,
            width: fmt.width,
            height: fmt.height,
        })
    }
}

impl FrameSource for V4l2Source {
    fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn wait_frame(&mut self, timeout: Duration) -> Result<(), CaptureError> {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = timeout.as_millis().min(i32::MAX as u128) as i32;

        match unsafe { libc::poll(&mut pfd, 1, millis) } {
            -1 => Err(CaptureError::Io(std::io::Error::last_os_error())),
            0 => Err(CaptureError::Timeout),
            _ => Ok(()),
        }
    }

    fn read_frame(&mut self) -> Result<Vec<u8>, CaptureError> {
        let (buf, meta) = self.stream.next().map_err(CaptureError::Read)?;
        let used = (meta.bytesused as usize).min(buf.len());
        Ok(buf[..used].to_vec())
    }
}

/// Enumerates a format's frame sizes as discrete dimensions. Stepwise ranges
/// collapse to their maximum.
fn enum_discrete_sizes(device: &Device, fourcc: FourCC) -> Result<Vec<(u32, u32)>, CaptureError> {
    let mut sizes = Vec::new();
    for framesize in device.enum_framesizes(fourcc)? {
        match framesize.size {
            FrameSizeEnum::Discrete(d) => sizes.push((d.width, d.height)),
            FrameSizeEnum::Stepwise(s) => sizes.push((s.max_width, s.max_height)),
        }
    }
    Ok(sizes)
}
