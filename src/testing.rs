//! Synthetic rasters and in-memory collaborators for headless tests.

use image::{Rgba, RgbaImage};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::capture::{FrameSource, TargetActivation, TargetHandle};
use crate::config::ScrollConfig;
use crate::error::{CaptureError, CaptureResult};
use crate::fingerprint::GRID;
use crate::frame::{CHANNELS, Frame, PixelFormat, Viewport};
use crate::scroll::{InputSink, ScrollKey, ScrollQuery};

fn mix(seed: u64, a: u64, b: u64) -> u64 {
    // splitmix64 over the packed inputs
    let mut z = seed
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add(a.wrapping_mul(0xBF58_476D_1CE4_E5B9))
        .wrapping_add(b.wrapping_mul(0x94D0_49BB_1331_11EB))
        .wrapping_add(0x2545_F491_4F6C_DD1D);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn frame_of(image: RgbaImage, index: u32) -> Frame {
    let (width, height) = image.dimensions();
    let stride = width as usize * CHANNELS;
    Frame::from_raw(image.into_raw(), width, height, stride, PixelFormat::Rgba8, index).unwrap()
}

fn grey(v: u8) -> Rgba<u8> {
    Rgba([v, v, v, 255])
}

/// Page-like raster: 40-row bands of varying brightness with per-row texture,
/// so every row is distinct and large-scale structure moves with scrolling.
pub fn synthetic_page(width: u32, height: u32, seed: u64) -> Frame {
    let image = RgbaImage::from_fn(width, height, |x, y| {
        let band = 20 + (mix(seed, (y / 40) as u64, 0xB) % 180) as u8;
        let texture = (mix(seed, y as u64, (x / 3) as u64 + 1) % 40) as u8;
        grey(band + texture)
    });
    frame_of(image, 0)
}

/// 16x16 cells, each a flat grey at the centre of a 4-bit quantisation bin.
pub fn grey_cells(width: u32, height: u32, seed: u64) -> Frame {
    let image = RgbaImage::from_fn(width, height, |x, y| {
        let (cx, cy) = (x * GRID / width, y * GRID / height);
        let level = (mix(seed, cx as u64, cy as u64) % 16) as u8;
        grey(level * 16 + 8)
    });
    frame_of(image, 0)
}

/// Adds grey noise in `[-amplitude, amplitude]` to every pixel.
pub fn noisy_copy(frame: &Frame, amplitude: u8, seed: u64) -> Frame {
    let span = 2 * amplitude as u64 + 1;
    let image = frame.to_rgba_image();
    let noisy = RgbaImage::from_fn(image.width(), image.height(), |x, y| {
        let noise = (mix(seed, x as u64, y as u64) % span) as i16 - amplitude as i16;
        let px = image.get_pixel(x, y).0;
        let shift = |c: u8| (c as i16 + noise).clamp(0, 255) as u8;
        Rgba([shift(px[0]), shift(px[1]), shift(px[2]), px[3]])
    });
    frame_of(noisy, frame.index())
}

/// Hard-edged blocks in four grey levels.
pub fn block_page(width: u32, height: u32, block: u32, seed: u64) -> Frame {
    const LEVELS: [u8; 4] = [30, 90, 160, 230];
    let image = RgbaImage::from_fn(width, height, |x, y| {
        grey(LEVELS[(mix(seed, (x / block) as u64, (y / block) as u64) % 4) as usize])
    });
    frame_of(image, 0)
}

/// Copy of `frame` with its top `rows` painted `color` (RGBA).
pub fn with_header(frame: &Frame, rows: u32, color: [u8; 4]) -> Frame {
    let mut image = frame.to_rgba_image();
    for y in 0..rows.min(image.height()) {
        for x in 0..image.width() {
            image.put_pixel(x, y, Rgba(color));
        }
    }
    frame_of(image, frame.index())
}

/// Zero-delay configuration.
pub fn instant_config() -> ScrollConfig {
    ScrollConfig {
        activate_settle_ms: 0,
        scroll_settle_ms: 0,
        poll_attempts: 2,
        poll_interval_ms: 0,
        ..ScrollConfig::default()
    }
}

/// Scroll offset shared between the fake input, query and source.
#[derive(Clone, Debug)]
pub struct ScrollPosition {
    top: Rc<Cell<u32>>,
    content_height: u32,
    viewport_height: u32,
}

impl ScrollPosition {
    pub fn new(top: u32, content_height: u32, viewport_height: u32) -> Self {
        Self { top: Rc::new(Cell::new(top)), content_height, viewport_height }
    }

    pub fn top(&self) -> u32 {
        self.top.get()
    }

    pub fn max_top(&self) -> u32 {
        self.content_height.saturating_sub(self.viewport_height)
    }

    fn scroll_by(&self, rows: u32) {
        self.top.set((self.top.get() + rows).min(self.max_top()));
    }
}

/// Serves viewport-sized slices of a tall page at the shared scroll position.
pub struct PageSource {
    page: Frame,
    position: ScrollPosition,
    height: u32,
    header: Option<(u32, [u8; 4])>,
    attempts: Rc<Cell<usize>>,
    fail_after: Option<usize>,
}

impl PageSource {
    pub fn new(page: Frame, position: &ScrollPosition, height: u32) -> Self {
        Self {
            page,
            position: position.clone(),
            height,
            header: None,
            attempts: Rc::new(Cell::new(0)),
            fail_after: None,
        }
    }

    /// Paints a stationary header over every captured frame.
    pub fn with_header(mut self, rows: u32, color: [u8; 4]) -> Self {
        self.header = Some((rows, color));
        self
    }

    /// Every capture attempt after the first `n` fails.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn capture_count(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.attempts)
    }
}

impl FrameSource for PageSource {
    fn capture(&mut self, _viewport: &Viewport) -> CaptureResult<Frame> {
        let attempt = self.attempts.get() + 1;
        self.attempts.set(attempt);
        if self.fail_after.is_some_and(|n| attempt > n) {
            return Err(CaptureError::CaptureFailure(format!("capture {} refused", attempt)));
        }
        let frame = self.page.crop_rows(self.position.top(), self.height);
        Ok(match self.header {
            Some((rows, color)) => with_header(&frame, rows, color),
            None => frame,
        })
    }
}

pub struct FakeTarget {
    valid: bool,
}

impl FakeTarget {
    pub fn valid() -> Self {
        Self { valid: true }
    }

    pub fn invalid() -> Self {
        Self { valid: false }
    }
}

impl TargetActivation for FakeTarget {
    fn is_valid_handle(&self, _target: TargetHandle) -> bool {
        self.valid
    }

    fn bring_to_front(&mut self, _target: TargetHandle, _viewport: &Viewport) -> CaptureResult<()> {
        Ok(())
    }
}

/// Structured scroll over a [`ScrollPosition`].
pub struct FakeQuery {
    position: ScrollPosition,
    step: u32,
    readable: bool,
    increments: usize,
    fail_after: Option<usize>,
}

impl FakeQuery {
    pub fn new(position: &ScrollPosition, step: u32) -> Self {
        Self { position: position.clone(), step, readable: true, increments: 0, fail_after: None }
    }

    /// Increments after the first `n` are rejected.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Advertises the capability but cannot report a position.
    pub fn unreadable(mut self) -> Self {
        self.readable = false;
        self
    }
}

impl ScrollQuery for FakeQuery {
    fn has_scroll_capability(&mut self, _target: TargetHandle) -> bool {
        true
    }

    fn vertical_percent(&mut self, _target: TargetHandle) -> CaptureResult<f64> {
        if !self.readable {
            return Err(CaptureError::DriverFailure("scroll pattern unavailable".into()));
        }
        let max_top = self.position.max_top();
        if max_top == 0 {
            return Ok(-1.0);
        }
        Ok(self.position.top() as f64 * 100.0 / max_top as f64)
    }

    fn visible_fraction(&mut self, _target: TargetHandle) -> CaptureResult<f64> {
        if !self.readable {
            return Err(CaptureError::DriverFailure("scroll pattern unavailable".into()));
        }
        let content = self.position.content_height.max(1) as f64;
        Ok((self.position.viewport_height as f64 / content).min(1.0))
    }

    fn scroll_small_increment(&mut self, _target: TargetHandle) -> bool {
        self.increments += 1;
        if self.fail_after.is_some_and(|n| self.increments > n) {
            return false;
        }
        self.position.scroll_by(self.step);
        true
    }
}

/// Records input and moves the shared position on key-down and wheel.
pub struct FakeInput {
    position: ScrollPosition,
    step: u32,
    log: Rc<RefCell<Vec<String>>>,
}

impl FakeInput {
    pub fn new(position: &ScrollPosition, step: u32) -> Self {
        Self { position: position.clone(), step, log: Rc::new(RefCell::new(Vec::new())) }
    }

    pub fn log(&self) -> Rc<RefCell<Vec<String>>> {
        Rc::clone(&self.log)
    }
}

impl InputSink for FakeInput {
    fn key_down(&mut self, _target: TargetHandle, key: ScrollKey) -> CaptureResult<()> {
        assert_eq!(key, ScrollKey::PageDown);
        self.log.borrow_mut().push("down".to_string());
        self.position.scroll_by(self.step);
        Ok(())
    }

    fn key_up(&mut self, _target: TargetHandle, _key: ScrollKey) -> CaptureResult<()> {
        self.log.borrow_mut().push("up".to_string());
        Ok(())
    }

    fn wheel(&mut self, _target: TargetHandle, delta: i64) -> CaptureResult<()> {
        self.log.borrow_mut().push(format!("wheel {}", delta));
        self.position.scroll_by(self.step);
        Ok(())
    }
}
