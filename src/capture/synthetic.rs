//! Synthetic colour-bar source for running the pipeline without a camera

use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::info;

use super::frame::{chroma_size, Frame, FrameMetadata, Plane};
use super::{CaptureError, FrameSource};

const BARS: [[u8; 3]; 8] = [
    [255, 255, 255],
    [255, 255, 0],
    [0, 255, 255],
    [0, 255, 0],
    [255, 0, 255],
    [255, 0, 0],
    [0, 0, 255],
    [0, 0, 0],
];

/// Full-range BT.601 RGB to YUV
pub fn rgb_to_yuv(rgb: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = rgb.map(f32::from);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let u = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
    let v = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
    [y, u, v].map(|c| c.round().clamp(0.0, 255.0) as u8)
}

/// Produces scrolling colour bars at a fixed cadence
pub struct TestPatternSource {
    width: u32,
    height: u32,
    interval: Duration,
    next_due: Option<Instant>,
    sequence: u64,
    limit: Option<u64>,
    interleaved_chroma: bool,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        info!(width, height, fps, "Starting test pattern source");
        Self {
            width,
            height,
            interval: Duration::from_secs(1) / fps.max(1),
            next_due: None,
            sequence: 0,
            limit: None,
            interleaved_chroma: false,
        }
    }

    /// End the stream after `frames` frames
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    /// Deliver chroma as one interleaved U/V buffer (pixel stride 2), the way
    /// most mobile camera stacks hand out 4:2:0 frames
    pub fn with_interleaved_chroma(mut self) -> Self {
        self.interleaved_chroma = true;
        self
    }

    /// Produce frames back to back, without pacing
    pub fn unpaced(mut self) -> Self {
        self.interval = Duration::ZERO;
        self
    }

    fn render(&self) -> [Plane; 3] {
        let (w, h) = (self.width as usize, self.height as usize);
        let (cw, ch) = chroma_size(self.width, self.height);
        let shift = self.sequence as usize;
        let bar = |x: usize| rgb_to_yuv(BARS[((x + shift) * BARS.len() / w.max(1)) % BARS.len()]);

        let mut y_plane = Vec::with_capacity(w * h);
        for _ in 0..h {
            y_plane.extend((0..w).map(|x| bar(x)[0]));
        }

        let chroma_row = |idx: usize| -> Vec<u8> { (0..cw).map(|cx| bar(cx * 2)[idx]).collect() };
        let u_row = chroma_row(1);
        let v_row = chroma_row(2);

        if self.interleaved_chroma {
            let mut uv = Vec::with_capacity(cw * ch * 2);
            for _ in 0..ch {
                for (u, v) in u_row.iter().zip(&v_row) {
                    uv.push(*u);
                    uv.push(*v);
                }
            }
            let uv = Bytes::from(uv);
            let len = uv.len();
            let chroma = |data: Bytes| Plane {
                data,
                row_stride: cw * 2,
                pixel_stride: 2,
            };
            [
                Plane::packed(y_plane, w),
                chroma(uv.slice(0..len - 1)),
                chroma(uv.slice(1..len)),
            ]
        } else {
            [
                Plane::packed(y_plane, w),
                Plane::packed(u_row.repeat(ch), cw),
                Plane::packed(v_row.repeat(ch), cw),
            ]
        }
    }
}

impl FrameSource for TestPatternSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.limit.is_some_and(|limit| self.sequence >= limit) {
            return Ok(None);
        }

        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        let timestamp = Instant::now();
        self.next_due = Some(timestamp + self.interval);

        let planes = self.render();
        self.sequence += 1;

        Ok(Some(Frame::new(
            FrameMetadata {
                sequence: self.sequence,
                width: self.width,
                height: self.height,
                device_timestamp: None,
            },
            planes,
            timestamp,
        )))
    }
}
