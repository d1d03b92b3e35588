//! V4L2 webcam capture, repacked from YUYV into planar 4:2:0

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{info, instrument};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::frame::{chroma_size, Frame, FrameMetadata, Plane};
use super::{CaptureError, FrameSource};
use crate::CaptureConfig;

/// V4L2 capture producing planar frames
pub struct V4l2Capture {
    device: Box<Device>,
    stream: Option<MmapStream<'static>>,
    config: CaptureConfig,
    sequence: u64,
}

impl V4l2Capture {
    /// Open the device and negotiate YUYV at the configured size
    pub fn new(mut config: CaptureConfig) -> Result<Self, CaptureError> {
        info!("Initializing V4L2 capture: {}", config.device);

        let device = Device::with_path(&config.device)?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::Format(format!(
                "{} doesn't support video capture",
                config.device
            )));
        }

        let mut fmt = device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = FourCC::new(b"YUYV");
        let fmt = device.set_format(&fmt)?;

        if fmt.fourcc != FourCC::new(b"YUYV") {
            return Err(CaptureError::Format(format!(
                "device negotiated {} instead of YUYV",
                fmt.fourcc
            )));
        }

        // The driver may round the requested size
        config.width = fmt.width;
        config.height = fmt.height;

        Ok(Self {
            device: Box::new(device),
            stream: None,
            config,
            sequence: 0,
        })
    }

    /// Start streaming with memory-mapped buffers
    pub fn start_stream(&mut self) -> Result<(), CaptureError> {
        let stream =
            MmapStream::with_buffers(&self.device, Type::VideoCapture, self.config.buffer_count)?;

        self.stream = Some(stream);
        info!(
            "Capture stream started with {} buffers",
            self.config.buffer_count
        );
        Ok(())
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }
}

impl FrameSource for V4l2Capture {
    #[instrument(skip(self))]
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let stream = self.stream.as_mut().ok_or(CaptureError::NotStarted)?;

        let (buf, meta) = stream.next()?;
        let timestamp = Instant::now();

        let planes = yuyv_to_planar(buf, self.config.width, self.config.height)?;
        self.sequence += 1;

        let frame_meta = FrameMetadata {
            sequence: self.sequence,
            width: self.config.width,
            height: self.config.height,
            device_timestamp: Some(
                Duration::from_secs(meta.timestamp.sec as u64)
                    + Duration::from_micros(meta.timestamp.usec as u64),
            ),
        };

        // The mmap buffer is requeued on the next dequeue, planes are owned copies
        Ok(Some(Frame::new(frame_meta, planes, timestamp)))
    }
}

/// Split packed YUYV into Y, U and V planes, averaging chroma over row pairs
pub fn yuyv_to_planar(buf: &[u8], width: u32, height: u32) -> Result<[Plane; 3], CaptureError> {
    let (w, h) = (width as usize, height as usize);
    let stride = w * 2;
    if w % 2 != 0 || buf.len() < stride * h {
        return Err(CaptureError::Format(format!(
            "YUYV buffer of {} bytes does not hold {}x{}",
            buf.len(),
            width,
            height
        )));
    }

    let (cw, ch) = chroma_size(width, height);
    let mut y = Vec::with_capacity(w * h);
    let mut u = vec![0u8; cw * ch];
    let mut v = vec![0u8; cw * ch];

    for row in buf[..stride * h].chunks_exact(stride) {
        y.extend(row.iter().step_by(2));
    }

    for cy in 0..ch {
        let top = &buf[cy * 2 * stride..][..stride];
        let bottom_row = (cy * 2 + 1).min(h - 1);
        let bottom = &buf[bottom_row * stride..][..stride];
        for cx in 0..cw {
            let avg = |offset: usize| {
                ((u16::from(top[cx * 4 + offset]) + u16::from(bottom[cx * 4 + offset]) + 1) / 2) as u8
            };
            u[cy * cw + cx] = avg(1);
            v[cy * cw + cx] = avg(3);
        }
    }

    Ok([
        Plane::packed(y, w),
        Plane::packed(u, cw),
        Plane::packed(v, cw),
    ])
}

/// Find the first capture device offering YUYV
pub fn auto_detect_device() -> Option<String> {
    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            continue;
        }
        if let Ok(formats) = dev.enum_formats() {
            if formats.iter().any(|fmt| fmt.fourcc == FourCC::new(b"YUYV")) {
                info!("Found YUYV device: {} - {}", path, caps.card);
                return Some(path);
            }
        }
    }

    None
}
