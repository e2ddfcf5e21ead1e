//! Conversions between [`Frame`] buffers and the `image` crate.

use std::path::Path;

use image::{codecs::jpeg::JpegEncoder, RgbImage};

use crate::types::{CaptureError, Frame, FrameFormat};

/// Convert any supported frame layout into an RGB image.
pub fn frame_to_rgb(frame: &Frame) -> Result<RgbImage, CaptureError> {
    let rgb = match frame.format {
        FrameFormat::Rgb8 => frame.data.clone(),
        FrameFormat::Bgr8 => {
            let mut out = Vec::with_capacity(frame.data.len());
            for px in frame.data.chunks_exact(3) {
                out.extend_from_slice(&[px[2], px[1], px[0]]);
            }
            out
        }
        FrameFormat::Gray8 => frame.data.iter().flat_map(|&v| [v, v, v]).collect(),
    };
    let expected = (frame.width as usize) * (frame.height as usize) * 3;
    let actual = rgb.len();
    RgbImage::from_raw(frame.width, frame.height, rgb)
        .ok_or(CaptureError::Malformed { expected, actual })
}

/// Build a BGR frame from an RGB image, matching the camera's native layout.
pub fn rgb_to_frame(image: &RgbImage) -> Frame {
    let mut data = Vec::with_capacity(image.as_raw().len());
    for px in image.as_raw().chunks_exact(3) {
        data.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    let mut frame = Frame::blank(image.width(), image.height(), FrameFormat::Bgr8);
    frame.data = data;
    frame
}

/// Decode an image file from disk into a BGR frame.
pub fn load_frame(path: &Path) -> Result<Frame, CaptureError> {
    let image = image::open(path)?.to_rgb8();
    Ok(rgb_to_frame(&image))
}

/// JPEG-encode a frame at the given quality (clamped to 1..=100).
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, CaptureError> {
    let rgb = frame_to_rgb(frame)?;
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)).encode_image(&rgb)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgr_frame_converts_to_rgb_order() {
        let frame = Frame::new(vec![10, 20, 30], 1, 1, FrameFormat::Bgr8).unwrap();
        let rgb = frame_to_rgb(&frame).unwrap();
        assert_eq!(rgb.get_pixel(0, 0).0, [30, 20, 10]);
    }

    #[test]
    fn jpeg_encoding_produces_jfif_payload() {
        let frame = Frame::blank(16, 8, FrameFormat::Bgr8);
        let jpeg = encode_jpeg(&frame, 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn png_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plate.png");
        let mut image = RgbImage::new(4, 2);
        image.put_pixel(1, 1, image::Rgb([200, 100, 50]));
        image.save(&path).unwrap();

        let frame = load_frame(&path).unwrap();
        assert_eq!((frame.width, frame.height), (4, 2));
        let offset = frame.pixel_offset(1, 1).unwrap();
        assert_eq!(&frame.data[offset..offset + 3], &[50, 100, 200]);
    }
}
