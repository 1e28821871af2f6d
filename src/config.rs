//! Config module.
//! Tunables for a scroll-capture session: step budget, scroll strategy,
//! settle/poll timing and the thresholds handed to the detectors.
//! Loaded from an optional JSON file via serde; missing fields take defaults,
//! and CLI flags override individual fields afterwards.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{CaptureError, CaptureResult};
use crate::overlap::MIN_COMPARABLE_ROWS;

/// Which scroll strategy the driver may pick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModePreference {
    /// Use the structured scroll capability when the target exposes one
    #[default]
    StructuredFirst,
    /// Always synthesise input events
    SimulatedOnly,
}

/// Synthetic input used by the simulated strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputStyle {
    #[default]
    PageDown,
    Wheel,
}

impl std::fmt::Display for ModePreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModePreference::StructuredFirst => write!(f, "structured-first"),
            ModePreference::SimulatedOnly => write!(f, "simulated-only"),
        }
    }
}

impl std::fmt::Display for InputStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputStyle::PageDown => write!(f, "page-down"),
            InputStyle::Wheel => write!(f, "wheel"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollConfig {
    /// Maximum scroll steps after the first frame
    pub max_steps: u32,
    pub mode: ModePreference,
    pub input: InputStyle,
    /// Wheel notches per step; negative scrolls down
    pub wheel_delta: i64,
    /// Small increments issued per structured step
    pub structured_increments: u32,
    pub activate_settle_ms: u64,
    pub scroll_settle_ms: u64,
    /// Captures per step while waiting for the view to change
    pub poll_attempts: u32,
    pub poll_interval_ms: u64,
    pub detect_sticky: bool,
    pub sticky_max_rows: u32,
    /// Height of the slice of the last tile used for overlap search
    pub tail_rows: u32,
    /// Largest shift the exhaustive search considers; defaults to the frame height
    pub search_limit: Option<u32>,
    pub enhanced_overlap: bool,
    pub click_to_focus: bool,
    /// RGBA fill behind tiles narrower than the canvas
    pub background: [u8; 4],
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            max_steps: 30,
            mode: ModePreference::StructuredFirst,
            input: InputStyle::PageDown,
            wheel_delta: -5,
            structured_increments: 3,
            activate_settle_ms: 300,
            scroll_settle_ms: 250,
            poll_attempts: 6,
            poll_interval_ms: 80,
            detect_sticky: true,
            sticky_max_rows: 160,
            tail_rows: 200,
            search_limit: None,
            enhanced_overlap: true,
            click_to_focus: true,
            background: [128, 128, 128, 255],
        }
    }
}

impl ScrollConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: ScrollConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CaptureResult<()> {
        if self.max_steps == 0 {
            return Err(CaptureError::Config("max_steps must be at least 1".into()));
        }
        if self.poll_attempts == 0 {
            return Err(CaptureError::Config("poll_attempts must be at least 1".into()));
        }
        if self.tail_rows < MIN_COMPARABLE_ROWS {
            return Err(CaptureError::Config(format!(
                "tail_rows must be at least {} (got {})",
                MIN_COMPARABLE_ROWS, self.tail_rows
            )));
        }
        if self.structured_increments == 0 {
            return Err(CaptureError::Config("structured_increments must be at least 1".into()));
        }
        if self.wheel_delta == 0 && self.input == InputStyle::Wheel {
            return Err(CaptureError::Config("wheel_delta cannot be 0 with wheel input".into()));
        }
        Ok(())
    }

    pub fn activate_settle(&self) -> Duration {
        Duration::from_millis(self.activate_settle_ms)
    }

    pub fn scroll_settle(&self) -> Duration {
        Duration::from_millis(self.scroll_settle_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
