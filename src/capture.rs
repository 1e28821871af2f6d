//! Screen capture module
//! Uses `xcap` to grab the target window (or, failing that, the monitor under
//! the viewport) and crops the viewport out of it.
//! Also resolves and validates window handles for the CLI.

use anyhow::{Context, Result, bail};
use image::RgbaImage;
use std::time::Instant;
use tracing::debug;
use xcap::{Monitor, Window};

use crate::error::{CaptureError, CaptureResult};
use crate::frame::{CHANNELS, Frame, PixelFormat, Viewport};
use crate::input;

/// Opaque id of the window being scrolled. Zero is never a valid window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TargetHandle(pub u32);

impl std::fmt::Display for TargetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "window {}", self.0)
    }
}

/// Produces the current pixels of a viewport. Blocking; may be slow.
pub trait FrameSource {
    fn capture(&mut self, viewport: &Viewport) -> CaptureResult<Frame>;
}

/// Validates and focuses the target before scrolling starts.
pub trait TargetActivation {
    fn is_valid_handle(&self, target: TargetHandle) -> bool;
    fn bring_to_front(&mut self, target: TargetHandle, viewport: &Viewport) -> CaptureResult<()>;
}

/// Summary of an on-screen window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowInfo {
    pub id: u32,
    pub title: String,
    pub app_name: String,
    pub bounds: Viewport,
    pub minimized: bool,
}

fn describe(window: &Window) -> Result<WindowInfo> {
    Ok(WindowInfo {
        id: window.id()?,
        title: window.title().unwrap_or_default(),
        app_name: window.app_name().unwrap_or_default(),
        bounds: Viewport::new(window.x()?, window.y()?, window.width()?, window.height()?),
        minimized: window.is_minimized().unwrap_or(false),
    })
}

pub fn list_windows() -> Result<Vec<WindowInfo>> {
    let windows = Window::all().context("Failed to enumerate windows")?;
    Ok(windows.iter().filter_map(|w| describe(w).ok()).collect())
}

fn find_window(id: u32) -> Result<Window> {
    let windows = Window::all().context("Failed to enumerate windows")?;
    for window in windows {
        if window.id().ok() == Some(id) {
            return Ok(window);
        }
    }
    bail!("No window with id {}", id)
}

/// Resolves `spec` as a numeric window id, else as a case-insensitive title
/// or application-name substring. Minimized windows are skipped.
pub fn resolve_window(spec: &str) -> Result<WindowInfo> {
    let windows = list_windows()?;
    if let Ok(id) = spec.parse::<u32>() {
        if let Some(found) = windows.iter().find(|w| w.id == id) {
            return Ok(found.clone());
        }
    }
    let needle = spec.to_lowercase();
    windows
        .into_iter()
        .filter(|w| !w.minimized)
        .find(|w| {
            w.title.to_lowercase().contains(&needle) || w.app_name.to_lowercase().contains(&needle)
        })
        .with_context(|| format!("No visible window matches '{}' (try --list-windows)", spec))
}

/// Captures through xcap. Window capture works under partial occlusion on most
/// platforms; the monitor path covers windows xcap cannot grab directly.
pub struct DesktopSource {
    window: Option<u32>,
}

impl DesktopSource {
    pub fn new(target: TargetHandle) -> Self {
        Self { window: Some(target.0).filter(|&id| id != 0) }
    }

    fn capture_window(&self, viewport: &Viewport) -> Result<Frame> {
        let id = self.window.context("No window bound to this source")?;
        let window = find_window(id)?;
        if window.is_minimized().unwrap_or(false) {
            bail!("Window {} is minimized", id);
        }
        let origin = (window.x()?, window.y()?);
        let shot = window
            .capture_image()
            .with_context(|| format!("Failed to capture window {}", id))?;
        crop_viewport(shot, origin, viewport)
    }
}

fn capture_monitor(viewport: &Viewport) -> Result<Frame> {
    let monitors = Monitor::all().context("Failed to enumerate monitors")?;
    let (cx, cy) = viewport.center();
    let monitor = monitors
        .into_iter()
        .find(|m| {
            let (Ok(x), Ok(y), Ok(w), Ok(h)) = (m.x(), m.y(), m.width(), m.height()) else {
                return false;
            };
            cx >= x && cy >= y && cx < x + w as i32 && cy < y + h as i32
        })
        .context("No monitor contains the viewport")?;
    let origin = (monitor.x()?, monitor.y()?);
    let shot = monitor
        .capture_image()
        .context("Failed to capture image. On macOS, ensure Terminal has Screen Recording permission in System Settings > Privacy & Security > Screen & System Audio Recording")?;
    if shot.dimensions() == (0, 0) {
        bail!("Captured empty screenshot - possible permission issue or no display");
    }
    crop_viewport(shot, origin, viewport)
}

/// Views the viewport inside `shot` without copying rows: the frame starts at
/// the viewport's first pixel and keeps the capture's row stride.
fn crop_viewport(shot: RgbaImage, origin: (i32, i32), viewport: &Viewport) -> Result<Frame> {
    let (x, y) = viewport.relative_to(origin, shot.dimensions()).with_context(|| {
        format!(
            "Viewport {} exceeds captured area {}x{} at ({},{})",
            viewport,
            shot.width(),
            shot.height(),
            origin.0,
            origin.1
        )
    })?;
    let stride = shot.width() as usize * CHANNELS;
    let mut data = shot.into_raw();
    data.drain(..y as usize * stride + x as usize * CHANNELS);
    let frame = Frame::from_raw(
        data,
        viewport.width,
        viewport.height,
        stride,
        PixelFormat::Rgba8,
        0,
    )?;
    Ok(frame)
}

impl FrameSource for DesktopSource {
    fn capture(&mut self, viewport: &Viewport) -> CaptureResult<Frame> {
        let start = Instant::now();
        let frame = match self.capture_window(viewport) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(error = %format!("{:#}", err), "window capture unavailable, using monitor");
                capture_monitor(viewport)
                    .map_err(|e| CaptureError::CaptureFailure(format!("{:#}", e)))?
            }
        };
        debug!(latency = ?start.elapsed(), stride = frame.stride(), "capture + crop");
        Ok(frame)
    }
}

/// Window lookup through xcap; focus by pointing (and optionally clicking)
/// into the viewport so key and wheel events land on the target.
pub struct DesktopTarget {
    click_to_focus: bool,
}

impl DesktopTarget {
    pub fn new(click_to_focus: bool) -> Self {
        Self { click_to_focus }
    }
}

impl TargetActivation for DesktopTarget {
    fn is_valid_handle(&self, target: TargetHandle) -> bool {
        target.0 != 0 && find_window(target.0).is_ok()
    }

    fn bring_to_front(&mut self, target: TargetHandle, viewport: &Viewport) -> CaptureResult<()> {
        let (x, y) = viewport.center();
        debug!(%target, x, y, click = self.click_to_focus, "activating target");
        input::move_pointer(x, y)?;
        if self.click_to_focus {
            input::click()?;
        }
        Ok(())
    }
}
