//! JPEG compression with reusable output buffers

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use thiserror::Error;

use crate::frame::{ConvertedFrame, CropRect};

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("crop {0:?} out of bounds for {1}x{2} frame")]
    CropOutOfBounds(CropRect, u32, u32),

    #[error("jpeg compression failed: {0}")]
    Codec(#[from] image::ImageError),
}

/// Compresses converted frames to JPEG.
///
/// The RGB scratch buffer and the JPEG output buffer grow geometrically and
/// never shrink; both are overwritten on every call. The returned `Bytes` is
/// a full copy, safe to hand to consumers while the next frame is encoded.
#[derive(Debug, Default)]
pub struct JpegFrameEncoder {
    rgb: Vec<u8>,
    out: Vec<u8>,
}

impl JpegFrameEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(
        &mut self,
        frame: &ConvertedFrame,
        crop: CropRect,
        quality: u8,
    ) -> Result<Bytes, EncodeError> {
        let (fw, fh) = (frame.width(), frame.height());
        if crop.width == 0
            || crop.height == 0
            || crop.x + crop.width > fw
            || crop.y + crop.height > fh
        {
            return Err(EncodeError::CropOutOfBounds(crop, fw, fh));
        }

        self.fill_rgb(frame, crop);

        let quality = quality.clamp(1, 100);
        self.out.clear();
        let mut encoder = JpegEncoder::new_with_quality(&mut self.out, quality);
        encoder.encode(
            &self.rgb,
            crop.width,
            crop.height,
            ExtendedColorType::Rgb8,
        )?;

        Ok(Bytes::copy_from_slice(&self.out))
    }

    /// BT.601 NV12 -> RGB over the crop region, into the reusable scratch.
    fn fill_rgb(&mut self, frame: &ConvertedFrame, crop: CropRect) {
        let needed = crop.width as usize * crop.height as usize * 3;
        if self.rgb.len() < needed {
            self.rgb.resize(needed, 0);
        }

        let fw = frame.width() as usize;
        let y_plane = frame.y_plane();
        let uv_plane = frame.uv_plane();

        let mut out = 0;
        for row in 0..crop.height as usize {
            let src_y = crop.y as usize + row;
            let uv_row = (src_y / 2) * (fw / 2);
            for col in 0..crop.width as usize {
                let src_x = crop.x as usize + col;
                let luma = y_plane[src_y * fw + src_x] as i32;
                let uv = (uv_row + src_x / 2) * 2;
                let cb = uv_plane[uv] as i32 - 128;
                let cr = uv_plane[uv + 1] as i32 - 128;

                // Fixed-point BT.601, 8 fractional bits.
                let r = luma + ((359 * cr) >> 8);
                let g = luma - ((88 * cb + 183 * cr) >> 8);
                let b = luma + ((454 * cb) >> 8);

                self.rgb[out] = r.clamp(0, 255) as u8;
                self.rgb[out + 1] = g.clamp(0, 255) as u8;
                self.rgb[out + 2] = b.clamp(0, 255) as u8;
                out += 3;
            }
        }
        self.rgb.truncate(needed);
    }
}
