//! Raster types shared by every stage of the scroll-capture pipeline.
//! A `Frame` owns a contiguous 4-channel buffer and addresses rows through its
//! stride, so capture backends that pad rows can hand their buffers over as-is.

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CaptureError, CaptureResult};

/// Smallest usable viewport edge, in pixels.
pub const MIN_VIEWPORT: u32 = 50;

/// Bytes per pixel for every supported format.
pub const CHANNELS: usize = 4;

/// Screen rectangle captured on each step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(left: i32, top: i32, width: u32, height: u32) -> Self {
        Self { left, top, width, height }
    }

    pub fn validate(&self) -> CaptureResult<()> {
        if self.width < MIN_VIEWPORT || self.height < MIN_VIEWPORT {
            return Err(CaptureError::ViewportTooSmall {
                width: self.width,
                height: self.height,
                min: MIN_VIEWPORT,
            });
        }
        Ok(())
    }

    pub fn center(&self) -> (i32, i32) {
        (
            self.left + (self.width / 2) as i32,
            self.top + (self.height / 2) as i32,
        )
    }

    /// Offset of this viewport inside an image whose top-left sits at `origin`,
    /// or `None` when the viewport does not fit inside `bounds`.
    pub fn relative_to(&self, origin: (i32, i32), bounds: (u32, u32)) -> Option<(u32, u32)> {
        let x = self.left.checked_sub(origin.0)?;
        let y = self.top.checked_sub(origin.1)?;
        if x < 0 || y < 0 {
            return None;
        }
        let (x, y) = (x as u32, y as u32);
        if x.saturating_add(self.width) > bounds.0 || y.saturating_add(self.height) > bounds.1 {
            return None;
        }
        Some((x, y))
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@({},{})", self.width, self.height, self.left, self.top)
    }
}

impl FromStr for Viewport {
    type Err = String;

    /// Parses `x,y,w,h`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(format!("expected x,y,w,h but got '{}'", s));
        }
        let left = parts[0].parse::<i32>().map_err(|e| format!("bad x '{}': {}", parts[0], e))?;
        let top = parts[1].parse::<i32>().map_err(|e| format!("bad y '{}': {}", parts[1], e))?;
        let width =
            parts[2].parse::<u32>().map_err(|e| format!("bad width '{}': {}", parts[2], e))?;
        let height =
            parts[3].parse::<u32>().map_err(|e| format!("bad height '{}': {}", parts[3], e))?;
        Ok(Viewport::new(left, top, width, height))
    }
}

/// Channel order of a frame's pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PixelFormat {
    #[default]
    Rgba8,
    Bgra8,
}

impl PixelFormat {
    #[inline]
    pub fn rgb(self, px: &[u8]) -> (u8, u8, u8) {
        match self {
            PixelFormat::Rgba8 => (px[0], px[1], px[2]),
            PixelFormat::Bgra8 => (px[2], px[1], px[0]),
        }
    }
}

/// Rec. 601 luma, rounded. Grey inputs map to themselves.
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000) as u8
}

/// Immutable raster snapshot tagged with its capture sequence index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
    index: u32,
}

impl Frame {
    /// Wraps a raw buffer. `stride` is the byte distance between row starts
    /// and may exceed `width * 4` when the backend pads rows.
    pub fn from_raw(
        data: Vec<u8>,
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
        index: u32,
    ) -> CaptureResult<Self> {
        let row_bytes = width as usize * CHANNELS;
        if stride < row_bytes {
            return Err(CaptureError::CaptureFailure(format!(
                "stride {} shorter than row of {} bytes",
                stride, row_bytes
            )));
        }
        let needed = if height == 0 { 0 } else { stride * (height as usize - 1) + row_bytes };
        if data.len() < needed {
            return Err(CaptureError::CaptureFailure(format!(
                "buffer of {} bytes cannot hold {}x{} with stride {}",
                data.len(),
                width,
                height,
                stride
            )));
        }
        Ok(Self { data, width, height, stride, format, index })
    }

    pub fn filled(width: u32, height: u32, px: [u8; 4], format: PixelFormat, index: u32) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * CHANNELS);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&px);
        }
        Self { data, width, height, stride: width as usize * CHANNELS, format, index }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.index = index;
        self
    }

    /// Visible bytes of row `y` (padding excluded).
    #[inline]
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize * CHANNELS]
    }

    #[inline]
    pub(crate) fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.stride;
        let end = start + self.width as usize * CHANNELS;
        &mut self.data[start..end]
    }

    #[inline]
    pub fn luma_at(&self, x: u32, y: u32) -> u8 {
        let offset = x as usize * CHANNELS;
        let (r, g, b) = self.format.rgb(&self.row(y)[offset..offset + CHANNELS]);
        luma(r, g, b)
    }

    /// Copies `height` rows starting at `top` into a new tightly packed frame.
    /// The range is clamped to the frame.
    pub fn crop_rows(&self, top: u32, height: u32) -> Frame {
        let top = top.min(self.height);
        let height = height.min(self.height - top);
        let row_bytes = self.width as usize * CHANNELS;
        let mut data = Vec::with_capacity(row_bytes * height as usize);
        for y in top..top + height {
            data.extend_from_slice(self.row(y));
        }
        Frame {
            data,
            width: self.width,
            height,
            stride: row_bytes,
            format: self.format,
            index: self.index,
        }
    }

    /// Bottom `height` rows, clamped.
    pub fn bottom_rows(&self, height: u32) -> Frame {
        let height = height.min(self.height);
        self.crop_rows(self.height - height, height)
    }

    pub fn to_rgba_image(&self) -> RgbaImage {
        RgbaImage::from_fn(self.width, self.height, |x, y| {
            let offset = x as usize * CHANNELS;
            let px = &self.row(y)[offset..offset + CHANNELS];
            let (r, g, b) = self.format.rgb(px);
            image::Rgba([r, g, b, px[3]])
        })
    }
}
