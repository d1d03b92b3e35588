use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;

/// One plane of a planar YUV 4:2:0 frame
#[derive(Debug, Clone)]
pub struct Plane {
    /// Immutable plane data - can be shared across threads without copying
    pub data: Bytes,
    /// Bytes between the starts of two consecutive rows
    pub row_stride: usize,
    /// Bytes between two horizontally adjacent samples (2 for interleaved chroma)
    pub pixel_stride: usize,
}

impl Plane {
    /// Tightly packed plane, one byte per sample
    pub fn packed(data: impl Into<Bytes>, width: usize) -> Self {
        Self {
            data: data.into(),
            row_stride: width,
            pixel_stride: 1,
        }
    }

    /// Sample at column `x` of row `y`. Bounds are checked by the encoder beforehand.
    #[inline]
    pub(crate) fn sample(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.row_stride + x * self.pixel_stride]
    }
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Raw captured frame: luma plane followed by the two chroma planes in
/// source order (U/Cb, then V/Cr).
///
/// The frame owns a release hook that runs exactly once when the frame is
/// dropped, handing the underlying capture buffer back to its source.
pub struct Frame {
    pub meta: FrameMetadata,
    pub planes: [Plane; 3],
    /// Arrival time, used for admission decisions
    pub timestamp: Instant,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Frame {
    pub fn new(meta: FrameMetadata, planes: [Plane; 3], timestamp: Instant) -> Self {
        Self {
            meta,
            planes,
            timestamp,
            release: None,
        }
    }

    /// Attach the callback that returns this frame's buffer to the source
    pub fn with_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn luma(&self) -> &Plane {
        &self.planes[0]
    }

    pub fn chroma_u(&self) -> &Plane {
        &self.planes[1]
    }

    pub fn chroma_v(&self) -> &Plane {
        &self.planes[2]
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("meta", &self.meta)
            .field("planes", &self.planes)
            .field("timestamp", &self.timestamp)
            .field("releasable", &self.release.is_some())
            .finish()
    }
}

/// Dimensions of each chroma plane for 4:2:0 subsampling
pub fn chroma_size(width: u32, height: u32) -> (usize, usize) {
    (width.div_ceil(2) as usize, height.div_ceil(2) as usize)
}
