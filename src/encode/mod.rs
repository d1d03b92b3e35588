//! Planar YUV 4:2:0 to JPEG, wrapped for transport

pub mod envelope;

use std::time::Instant;

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::capture::frame::{chroma_size, Frame, Plane};
use crate::EncodeConfig;

pub use envelope::{EncodedPayload, Envelope, CONTENT_TYPE};

#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("frame has zero area ({width}x{height})")]
    Empty { width: u32, height: u32 },
    #[error("{plane} plane: {reason}")]
    Geometry { plane: &'static str, reason: String },
    #[error("jpeg compression failed: {0}")]
    Jpeg(#[from] image::ImageError),
    #[error("envelope serialization failed: {0}")]
    Envelope(#[from] serde_json::Error),
}

/// Converts raw frames into transport payloads
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    quality: u8,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new(&EncodeConfig::default())
    }
}

impl FrameEncoder {
    pub fn new(config: &EncodeConfig) -> Self {
        Self {
            quality: config.quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Compress one frame. The frame is left untouched; releasing it is up to the caller.
    #[instrument(skip_all, fields(sequence = frame.meta.sequence))]
    pub fn encode(&self, frame: &Frame) -> Result<EncodedPayload, EncodingError> {
        let start = Instant::now();
        let (width, height) = (frame.width(), frame.height());

        let yvu = pack_yvu(frame)?;
        let rgb = yvu_to_rgb(&yvu, width, height);

        let mut jpeg = Vec::with_capacity(rgb.len() / 8);
        JpegEncoder::new_with_quality(&mut jpeg, self.quality).encode(
            &rgb,
            width,
            height,
            ExtendedColorType::Rgb8,
        )?;

        let payload = EncodedPayload::wrap(jpeg, width, height)?;

        let elapsed = start.elapsed();
        metrics::histogram!("encode_time_us").record(elapsed.as_micros() as f64);
        debug!(
            jpeg_bytes = payload.jpeg_len(),
            elapsed_us = elapsed.as_micros() as u64,
            "Frame encoded"
        );

        Ok(payload)
    }
}

/// Check that `plane` holds exactly a `cols` x `rows` sample grid with its strides
fn check_plane(name: &'static str, plane: &Plane, cols: usize, rows: usize) -> Result<(), EncodingError> {
    let fail = |reason: String| Err(EncodingError::Geometry { plane: name, reason });

    if plane.pixel_stride == 0 {
        return fail("pixel stride is zero".into());
    }
    let Some(row_span) = (cols - 1)
        .checked_mul(plane.pixel_stride)
        .and_then(|span| span.checked_add(1))
    else {
        return fail(format!("pixel stride {} overflows a {}-sample row", plane.pixel_stride, cols));
    };
    if plane.row_stride < row_span {
        return fail(format!(
            "row stride {} shorter than a {}-sample row",
            plane.row_stride, cols
        ));
    }

    let bounds = plane
        .row_stride
        .checked_mul(rows - 1)
        .and_then(|head| head.checked_add(row_span))
        .zip(plane.row_stride.checked_mul(rows));
    let Some((min, max)) = bounds else {
        return fail(format!("row stride {} overflows {} rows", plane.row_stride, rows));
    };
    let len = plane.data.len();
    if len < min {
        return fail(format!("{len} bytes, expected at least {min} for {cols}x{rows}"));
    }
    if len > max {
        return fail(format!("{len} bytes, expected at most {max} for {cols}x{rows}"));
    }
    Ok(())
}

/// Gather the planes into one tight buffer: Y, then V, then U.
///
/// Source frames carry chroma as U then V; the packed layout read by
/// [`yvu_to_rgb`] puts V first.
fn pack_yvu(frame: &Frame) -> Result<Vec<u8>, EncodingError> {
    let (width, height) = (frame.width(), frame.height());
    if width == 0 || height == 0 {
        return Err(EncodingError::Empty { width, height });
    }
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = chroma_size(width, height);

    check_plane("luma", frame.luma(), w, h)?;
    check_plane("chroma-u", frame.chroma_u(), cw, ch)?;
    check_plane("chroma-v", frame.chroma_v(), cw, ch)?;

    let mut out = Vec::with_capacity(w * h + 2 * cw * ch);
    for (plane, cols, rows) in [
        (frame.luma(), w, h),
        (frame.chroma_v(), cw, ch),
        (frame.chroma_u(), cw, ch),
    ] {
        for y in 0..rows {
            if plane.pixel_stride == 1 {
                let start = y * plane.row_stride;
                out.extend_from_slice(&plane.data[start..start + cols]);
            } else {
                out.extend((0..cols).map(|x| plane.sample(x, y)));
            }
        }
    }
    Ok(out)
}

/// Full-range BT.601 (JFIF) conversion of a packed Y-V-U buffer to RGB24
fn yvu_to_rgb(yvu: &[u8], width: u32, height: u32) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = chroma_size(width, height);
    let (luma, chroma) = yvu.split_at(w * h);
    let (v_plane, u_plane) = chroma.split_at(cw * ch);

    let mut rgb = Vec::with_capacity(w * h * 3);
    for y in 0..h {
        for x in 0..w {
            let c = (y / 2) * cw + x / 2;
            let lum = f32::from(luma[y * w + x]);
            let cb = f32::from(u_plane[c]) - 128.0;
            let cr = f32::from(v_plane[c]) - 128.0;

            let r = lum + 1.402 * cr;
            let g = lum - 0.344_136 * cb - 0.714_136 * cr;
            let b = lum + 1.772 * cb;
            rgb.extend([r, g, b].map(|c| c.round().clamp(0.0, 255.0) as u8));
        }
    }
    rgb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::FrameMetadata;
    use crate::capture::synthetic::{rgb_to_yuv, TestPatternSource};
    use crate::capture::FrameSource;
    use bytes::Bytes;
    use image::GenericImageView;

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        let [y, u, v] = rgb_to_yuv(rgb);
        let (cw, ch) = chroma_size(width, height);
        let (w, h) = (width as usize, height as usize);
        Frame::new(
            FrameMetadata {
                sequence: 1,
                width,
                height,
                device_timestamp: None,
            },
            [
                Plane::packed(vec![y; w * h], w),
                Plane::packed(vec![u; cw * ch], cw),
                Plane::packed(vec![v; cw * ch], cw),
            ],
            Instant::now(),
        )
    }

    fn decode(payload: &EncodedPayload) -> image::DynamicImage {
        let envelope = payload.envelope().unwrap();
        image::load_from_memory_with_format(&envelope.image, image::ImageFormat::Jpeg).unwrap()
    }

    #[test]
    fn solid_frame_round_trips_with_exact_dimensions() {
        let encoder = FrameEncoder::default();
        let payload = encoder.encode(&solid(64, 48, [40, 160, 90])).unwrap();

        let image = decode(&payload);
        assert_eq!(image.dimensions(), (64, 48));
        assert_eq!(payload.dimensions(), (64, 48));
    }

    #[test]
    fn odd_dimensions_round_trip() {
        let payload = FrameEncoder::default().encode(&solid(33, 17, [200, 200, 200])).unwrap();
        assert_eq!(decode(&payload).dimensions(), (33, 17));
    }

    #[test]
    fn chroma_order_survives_encoding() {
        // Red has Cr far above Cb; a swapped pipeline would come out blue.
        let payload = FrameEncoder::default().encode(&solid(32, 32, [255, 0, 0])).unwrap();
        let pixel = decode(&payload).to_rgb8().get_pixel(16, 16).0;
        assert!(pixel[0] > 200, "{pixel:?}");
        assert!(pixel[2] < 60, "{pixel:?}");

        let payload = FrameEncoder::default().encode(&solid(32, 32, [0, 0, 255])).unwrap();
        let pixel = decode(&payload).to_rgb8().get_pixel(16, 16).0;
        assert!(pixel[2] > 200, "{pixel:?}");
        assert!(pixel[0] < 60, "{pixel:?}");
    }

    #[test]
    fn interleaved_chroma_is_accepted() {
        let mut source = TestPatternSource::new(48, 32, 30)
            .unpaced()
            .with_interleaved_chroma();
        let frame = source.next_frame().unwrap().unwrap();
        let payload = FrameEncoder::default().encode(&frame).unwrap();
        assert_eq!(decode(&payload).dimensions(), (48, 32));
    }

    #[test]
    fn body_is_base64_json_without_wrapping() {
        let payload = FrameEncoder::default().encode(&solid(16, 16, [0, 0, 0])).unwrap();
        let body = payload.body();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let object = json.as_object().unwrap();
        assert_eq!(object.len(), 1);
        let text = object["image"].as_str().unwrap();
        assert!(!text.contains('\n'));
        assert_eq!(payload.content_type(), "application/json; charset=utf-8");
    }

    #[test]
    fn undersized_planes_are_rejected() {
        let encoder = FrameEncoder::default();

        let mut frame = solid(8, 8, [10, 20, 30]);
        frame.planes[0].data = Bytes::from(vec![0u8; 63]);
        assert!(matches!(
            encoder.encode(&frame),
            Err(EncodingError::Geometry { plane: "luma", .. })
        ));

        let mut frame = solid(8, 8, [10, 20, 30]);
        frame.planes[2].data = Bytes::from(vec![0u8; 15]);
        assert!(matches!(
            encoder.encode(&frame),
            Err(EncodingError::Geometry { plane: "chroma-v", .. })
        ));
    }

    #[test]
    fn oversized_planes_are_rejected() {
        let encoder = FrameEncoder::default();

        let mut frame = solid(8, 8, [10, 20, 30]);
        frame.planes[0].data = Bytes::from(vec![0u8; 65]);
        assert!(matches!(
            encoder.encode(&frame),
            Err(EncodingError::Geometry { plane: "luma", .. })
        ));

        let mut frame = solid(8, 8, [10, 20, 30]);
        frame.planes[1].data = Bytes::from(vec![0u8; 17]);
        assert!(matches!(
            encoder.encode(&frame),
            Err(EncodingError::Geometry { plane: "chroma-u", .. })
        ));
    }

    #[test]
    fn narrow_row_stride_is_rejected() {
        let mut frame = solid(8, 8, [10, 20, 30]);
        frame.planes[0].row_stride = 7;
        assert!(encoder_err(&frame));
    }

    #[test]
    fn huge_row_stride_is_rejected() {
        let mut frame = solid(4, 3, [10, 20, 30]);
        frame.planes[0].row_stride = usize::MAX / 2 + 1;
        assert!(matches!(
            FrameEncoder::default().encode(&frame),
            Err(EncodingError::Geometry { plane: "luma", .. })
        ));
    }

    #[test]
    fn huge_pixel_stride_is_rejected() {
        let mut frame = solid(4, 3, [10, 20, 30]);
        frame.planes[0].pixel_stride = usize::MAX / 2;
        assert!(matches!(
            FrameEncoder::default().encode(&frame),
            Err(EncodingError::Geometry { plane: "luma", .. })
        ));
    }

    #[test]
    fn zero_area_is_rejected() {
        let frame = solid(0, 8, [0, 0, 0]);
        assert!(matches!(
            FrameEncoder::default().encode(&frame),
            Err(EncodingError::Empty { .. })
        ));
    }

    #[test]
    fn padded_rows_are_accepted() {
        // Row stride 10 for an 8-wide plane, last row unpadded
        let mut frame = solid(8, 8, [10, 20, 30]);
        frame.planes[0] = Plane {
            data: Bytes::from(vec![100u8; 10 * 7 + 8]),
            row_stride: 10,
            pixel_stride: 1,
        };
        assert!(FrameEncoder::default().encode(&frame).is_ok());
    }

    fn encoder_err(frame: &Frame) -> bool {
        FrameEncoder::default().encode(frame).is_err()
    }
}
