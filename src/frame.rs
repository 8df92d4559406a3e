//! Frame buffer types shared across the pipeline

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FormatError {
    #[error("frame dimensions must be even and non-zero, got {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("{plane} plane too short: need {required} bytes, got {actual}")]
    PlaneTooShort {
        plane: &'static str,
        required: usize,
        actual: usize,
    },

    #[error("unsupported rotation: {0} degrees")]
    UnsupportedRotation(u32),
}

/// One plane of a raw capture frame, borrowed from the capture layer.
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    pub data: &'a [u8],
    /// Bytes between the start of consecutive rows.
    pub row_stride: usize,
    /// Bytes between consecutive samples within a row.
    pub pixel_stride: usize,
}

impl<'a> Plane<'a> {
    /// Byte count the plane must hold for `cols x rows` samples.
    pub fn required_len(&self, cols: usize, rows: usize) -> usize {
        if cols == 0 || rows == 0 {
            return 0;
        }
        self.row_stride * (rows - 1) + self.pixel_stride * (cols - 1) + 1
    }
}

/// A planar YUV 4:2:0 frame as delivered by the capture callback.
///
/// Borrowed and ephemeral: the pipeline consumes it synchronously and never
/// retains it past the call.
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    pub width: u32,
    pub height: u32,
    pub y: Plane<'a>,
    pub u: Plane<'a>,
    pub v: Plane<'a>,
}

impl<'a> RawFrame<'a> {
    /// Validates plane sizes against the frame dimensions.
    pub fn validate(&self) -> Result<(), FormatError> {
        let (w, h) = (self.width as usize, self.height as usize);
        if self.width == 0 || self.height == 0 || w % 2 != 0 || h % 2 != 0 {
            return Err(FormatError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }

        let checks: [(&'static str, &Plane<'a>, usize, usize); 3] = [
            ("Y", &self.y, w, h),
            ("U", &self.u, w / 2, h / 2),
            ("V", &self.v, w / 2, h / 2),
        ];
        for (name, plane, cols, rows) in checks {
            let required = plane.required_len(cols, rows);
            if plane.data.len() < required {
                return Err(FormatError::PlaneTooShort {
                    plane: name,
                    required,
                    actual: plane.data.len(),
                });
            }
        }
        Ok(())
    }
}

/// An owned copy of a raw frame, used only for the cross-thread handoff
/// between the capture boundary and the producer worker.
#[derive(Debug, Clone)]
pub struct OwnedRawFrame {
    pub width: u32,
    pub height: u32,
    pub y: Vec<u8>,
    pub u: Vec<u8>,
    pub v: Vec<u8>,
    /// Pixel stride of the chroma planes (1 = planar, 2 = semi-planar view).
    pub chroma_pixel_stride: usize,
}

impl OwnedRawFrame {
    pub fn as_raw(&self) -> RawFrame<'_> {
        let w = self.width as usize;
        RawFrame {
            width: self.width,
            height: self.height,
            y: Plane {
                data: &self.y,
                row_stride: w,
                pixel_stride: 1,
            },
            u: Plane {
                data: &self.u,
                row_stride: (w / 2) * self.chroma_pixel_stride,
                pixel_stride: self.chroma_pixel_stride,
            },
            v: Plane {
                data: &self.v,
                row_stride: (w / 2) * self.chroma_pixel_stride,
                pixel_stride: self.chroma_pixel_stride,
            },
        }
    }
}

/// NV12-layout frame (Y plane followed by interleaved UV), owned by the
/// single producer and reused across frames.
///
/// The buffer is tagged with the resolution it was sized for; a mismatch
/// triggers exactly one reallocation, never a partial resize.
#[derive(Debug, Default)]
pub struct ConvertedFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl ConvertedFrame {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Rebinds the buffer to `width x height`, reallocating only when the
    /// tagged resolution differs.
    pub fn rebind(&mut self, width: u32, height: u32) -> &mut [u8] {
        if self.width != width || self.height != height {
            let len = nv12_len(width, height);
            self.data.clear();
            self.data.resize(len, 0);
            self.width = width;
            self.height = height;
        }
        &mut self.data
    }

    pub fn y_plane(&self) -> &[u8] {
        &self.data[..(self.width as usize * self.height as usize)]
    }

    pub fn uv_plane(&self) -> &[u8] {
        &self.data[(self.width as usize * self.height as usize)..]
    }
}

/// Buffer length for an NV12 frame of the given dimensions.
pub fn nv12_len(width: u32, height: u32) -> usize {
    let (w, h) = (width as usize, height as usize);
    w * h * 3 / 2
}

/// Centered crop region, always even-sized for 4:2:0 chroma.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// Full-frame crop.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Largest centered region of `width x height` matching the 16:9 target
    /// ratio, with both sides rounded down to even values.
    pub fn center_16x9(width: u32, height: u32) -> Self {
        let even = |x: u64| (x & !1) as u32;
        let (w, h) = (width as u64, height as u64);

        let (crop_w, crop_h) = if w * 9 > h * 16 {
            // Too wide, limit width.
            (even(h * 16 / 9), even(h))
        } else {
            // Too tall, limit height.
            (even(w), even(w * 9 / 16))
        };

        Self {
            x: (width - crop_w) / 2,
            y: (height - crop_h) / 2,
            width: crop_w,
            height: crop_h,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_is_even_and_within_source() {
        for (w, h) in [(640, 480), (1000, 1000), (2100, 900), (1920, 1080)] {
            let crop = CropRect::center_16x9(w, h);
            assert_eq!(crop.width % 2, 0);
            assert_eq!(crop.height % 2, 0);
            assert!(crop.width <= w);
            assert!(crop.height <= h);
            assert!(crop.x + crop.width <= w);
            assert!(crop.y + crop.height <= h);
        }
    }

    #[test]
    fn crop_ratio_close_to_16x9() {
        // 4:3, 1:1 and 21:9 sources
        for (w, h) in [(640, 480), (1000, 1000), (2100, 900)] {
            let crop = CropRect::center_16x9(w, h);
            let expected_h = crop.width as f64 * 9.0 / 16.0;
            assert!(
                (crop.height as f64 - expected_h).abs() <= 2.0,
                "{}x{} -> {}x{}",
                w,
                h,
                crop.width,
                crop.height
            );
        }
    }

    #[test]
    fn exact_16x9_is_full_frame() {
        let crop = CropRect::center_16x9(1920, 1080);
        assert_eq!(crop, CropRect::full(1920, 1080));
    }

    #[test]
    fn undersized_plane_is_rejected() {
        let y = vec![0u8; 10];
        let uv = vec![0u8; 4];
        let frame = RawFrame {
            width: 4,
            height: 4,
            y: Plane {
                data: &y,
                row_stride: 4,
                pixel_stride: 1,
            },
            u: Plane {
                data: &uv,
                row_stride: 2,
                pixel_stride: 1,
            },
            v: Plane {
                data: &uv,
                row_stride: 2,
                pixel_stride: 1,
            },
        };
        assert!(matches!(
            frame.validate(),
            Err(FormatError::PlaneTooShort { plane: "Y", .. })
        ));
    }

    #[test]
    fn rebind_reallocates_once_per_resolution_change() {
        let mut frame = ConvertedFrame::default();
        frame.rebind(640, 480);
        assert_eq!(frame.data().len(), 640 * 480 * 3 / 2);
        let ptr = frame.data().as_ptr();
        frame.rebind(640, 480);
        assert_eq!(ptr, frame.data().as_ptr());
        frame.rebind(1280, 720);
        assert_eq!(frame.data().len(), 1280 * 720 * 3 / 2);
    }
}
