//! Planar frame conversion: plane reorder, rotation, center-crop

use crate::frame::{nv12_len, ConvertedFrame, CropRect, FormatError, RawFrame};

/// Clockwise rotation applied to the converted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    None,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(deg: u32) -> Result<Self, FormatError> {
        match deg % 360 {
            0 => Ok(Rotation::None),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(FormatError::UnsupportedRotation(other)),
        }
    }

    fn swaps_dimensions(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// Converts raw planar frames into reusable NV12 buffers.
///
/// Owns two buffers: a packed staging frame and the rotated output. Both are
/// tagged with the resolution they were sized for and reallocated only when
/// that resolution changes.
#[derive(Debug, Default)]
pub struct FrameConverter {
    packed: ConvertedFrame,
    rotated: ConvertedFrame,
}

impl FrameConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reorders the source planes into NV12, rotates, and computes the
    /// largest centered 16:9 crop of the result.
    ///
    /// Returns a reference to an internal buffer that is overwritten by the
    /// next call; callers must copy anything they need to retain.
    pub fn convert(
        &mut self,
        raw: &RawFrame<'_>,
        rotation: Rotation,
    ) -> Result<(&ConvertedFrame, CropRect), FormatError> {
        raw.validate()?;

        pack_nv12(raw, self.packed.rebind(raw.width, raw.height));

        let out = match rotation {
            Rotation::None => &self.packed,
            _ => {
                let (out_w, out_h) = if rotation.swaps_dimensions() {
                    (raw.height, raw.width)
                } else {
                    (raw.width, raw.height)
                };
                rotate_nv12(
                    self.packed.data(),
                    raw.width,
                    raw.height,
                    rotation,
                    self.rotated.rebind(out_w, out_h),
                );
                &self.rotated
            }
        };

        let crop = CropRect::center_16x9(out.width(), out.height());
        Ok((out, crop))
    }
}

/// Packs strided Y/U/V planes into an NV12 destination buffer.
///
/// Destination must already be sized to `width * height * 3/2`.
fn pack_nv12(raw: &RawFrame<'_>, dst: &mut [u8]) {
    let (w, h) = (raw.width as usize, raw.height as usize);
    debug_assert_eq!(dst.len(), nv12_len(raw.width, raw.height));

    // Y plane: bulk row copy on the unit-stride fast path.
    let mut out = 0;
    for row in 0..h {
        let row_start = row * raw.y.row_stride;
        if raw.y.pixel_stride == 1 {
            dst[out..out + w].copy_from_slice(&raw.y.data[row_start..row_start + w]);
            out += w;
        } else {
            let mut pos = row_start;
            for _ in 0..w {
                dst[out] = raw.y.data[pos];
                out += 1;
                pos += raw.y.pixel_stride;
            }
        }
    }

    // Chroma planes interleaved as UV.
    for row in 0..h / 2 {
        let mut u_pos = row * raw.u.row_stride;
        let mut v_pos = row * raw.v.row_stride;
        for _ in 0..w / 2 {
            dst[out] = raw.u.data[u_pos];
            dst[out + 1] = raw.v.data[v_pos];
            out += 2;
            u_pos += raw.u.pixel_stride;
            v_pos += raw.v.pixel_stride;
        }
    }
}

/// Rotates an NV12 frame into a pre-sized destination buffer.
///
/// 90/270 are a transpose with dimension swap, 180 a point reflection. The
/// chroma plane is rotated in interleaved UV pairs.
fn rotate_nv12(src: &[u8], width: u32, height: u32, rotation: Rotation, dst: &mut [u8]) {
    let (w, h) = (width as usize, height as usize);
    let y_len = w * h;

    rotate_plane(&src[..y_len], w, h, 1, rotation, &mut dst[..y_len]);
    rotate_plane(
        &src[y_len..],
        w / 2,
        h / 2,
        2,
        rotation,
        &mut dst[y_len..],
    );
}

/// Rotates one plane of `w x h` samples, `sample` bytes each.
fn rotate_plane(src: &[u8], w: usize, h: usize, sample: usize, rotation: Rotation, dst: &mut [u8]) {
    let (out_w, out_h) = match rotation {
        Rotation::None | Rotation::Deg180 => (w, h),
        Rotation::Deg90 | Rotation::Deg270 => (h, w),
    };

    for oy in 0..out_h {
        for ox in 0..out_w {
            let (sx, sy) = match rotation {
                Rotation::None => (ox, oy),
                // dst(x, y) <- src(y, h-1-x)
                Rotation::Deg90 => (oy, h - 1 - ox),
                Rotation::Deg180 => (w - 1 - ox, h - 1 - oy),
                // dst(x, y) <- src(w-1-y, x)
                Rotation::Deg270 => (w - 1 - oy, ox),
            };
            let s = (sy * w + sx) * sample;
            let d = (oy * out_w + ox) * sample;
            dst[d..d + sample].copy_from_slice(&src[s..s + sample]);
        }
    }
}
