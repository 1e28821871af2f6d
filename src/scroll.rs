//! Scroll driver.
//! Advances the target one step at a time and reports end-of-content when the
//! target can tell us. The strategy is picked once, by probing the target for a
//! structured scroll capability, and never re-evaluated during a session.

use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::capture::TargetHandle;
use crate::config::{InputStyle, ModePreference, ScrollConfig};
use crate::error::{CaptureError, CaptureResult};

/// Percent at or above which a structured target is considered fully scrolled.
pub const END_PERCENT: f64 = 99.5;

/// Structured scroll query exposed by targets that publish scroll state.
pub trait ScrollQuery {
    fn has_scroll_capability(&mut self, target: TargetHandle) -> bool;
    /// Vertical position in percent; negative when the target cannot scroll.
    fn vertical_percent(&mut self, target: TargetHandle) -> CaptureResult<f64>;
    /// Fraction of the content currently visible, in `[0, 1]`.
    fn visible_fraction(&mut self, target: TargetHandle) -> CaptureResult<f64>;
    fn scroll_small_increment(&mut self, target: TargetHandle) -> bool;
}

/// Keys the simulated strategy sends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrollKey {
    PageDown,
}

/// Synthetic input delivered to the target.
pub trait InputSink {
    fn key_down(&mut self, target: TargetHandle, key: ScrollKey) -> CaptureResult<()>;
    fn key_up(&mut self, target: TargetHandle, key: ScrollKey) -> CaptureResult<()>;
    fn wheel(&mut self, target: TargetHandle, delta: i64) -> CaptureResult<()>;
}

/// Query for platforms without a structured scroll backend.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoStructuredScroll;

impl ScrollQuery for NoStructuredScroll {
    fn has_scroll_capability(&mut self, _target: TargetHandle) -> bool {
        false
    }

    fn vertical_percent(&mut self, _target: TargetHandle) -> CaptureResult<f64> {
        Err(CaptureError::DriverFailure("no structured scroll backend".into()))
    }

    fn visible_fraction(&mut self, _target: TargetHandle) -> CaptureResult<f64> {
        Err(CaptureError::DriverFailure("no structured scroll backend".into()))
    }

    fn scroll_small_increment(&mut self, _target: TargetHandle) -> bool {
        false
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    Available,
    Unavailable,
}

/// The driver's view of the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScrollState {
    pub capability: Capability,
    pub at_end: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    Uninitialized,
    CapabilityChecked,
    Advancing,
    Exhausted,
    Failed,
}

/// One scroll step plus end-of-content reporting.
pub trait ScrollStrategy {
    fn advance(&mut self) -> CaptureResult<()>;
    fn at_end(&self) -> bool;
}

pub struct StructuredScroll<Q> {
    query: Q,
    target: TargetHandle,
    increments: u32,
    settle: Duration,
    at_end: bool,
}

impl<Q: ScrollQuery> StructuredScroll<Q> {
    fn new(query: Q, target: TargetHandle, increments: u32, settle: Duration) -> Self {
        Self { query, target, increments, settle, at_end: false }
    }

    fn refresh(&mut self) -> CaptureResult<()> {
        let percent = self.query.vertical_percent(self.target)?;
        let visible = self.query.visible_fraction(self.target)?;
        self.at_end = percent < 0.0 || percent >= END_PERCENT || visible >= 1.0;
        debug!(percent, visible, at_end = self.at_end, "structured scroll position");
        Ok(())
    }
}

impl<Q: ScrollQuery> ScrollStrategy for StructuredScroll<Q> {
    fn advance(&mut self) -> CaptureResult<()> {
        for _ in 0..self.increments {
            if !self.query.scroll_small_increment(self.target) {
                return Err(CaptureError::DriverFailure("small scroll increment rejected".into()));
            }
            self.refresh()?;
            if self.at_end {
                break;
            }
        }
        thread::sleep(self.settle);
        Ok(())
    }

    fn at_end(&self) -> bool {
        self.at_end
    }
}

/// Page Down or wheel input. Cannot observe the end of the content.
pub struct SimulatedScroll<I> {
    input: I,
    target: TargetHandle,
    style: InputStyle,
    wheel_delta: i64,
    settle: Duration,
}

impl<I: InputSink> ScrollStrategy for SimulatedScroll<I> {
    fn advance(&mut self) -> CaptureResult<()> {
        match self.style {
            InputStyle::PageDown => {
                self.input.key_down(self.target, ScrollKey::PageDown)?;
                self.input.key_up(self.target, ScrollKey::PageDown)?;
            }
            InputStyle::Wheel => self.input.wheel(self.target, self.wheel_delta)?,
        }
        thread::sleep(self.settle);
        Ok(())
    }

    fn at_end(&self) -> bool {
        false
    }
}

enum Strategy<Q, I> {
    Structured(StructuredScroll<Q>),
    Simulated(SimulatedScroll<I>),
}

pub struct ScrollDriver<Q, I> {
    strategy: Strategy<Q, I>,
    state: DriverState,
    failure: Option<CaptureError>,
}

impl<Q: ScrollQuery, I: InputSink> ScrollDriver<Q, I> {
    /// Checks the target once and settles on a strategy. A structured target
    /// that cannot read the initial position falls back to simulated input.
    pub fn detect(target: TargetHandle, mut query: Q, input: I, config: &ScrollConfig) -> Self {
        let mut state = DriverState::Uninitialized;
        debug!(?state, mode = %config.mode, "checking scroll capability");

        let structured =
            config.mode == ModePreference::StructuredFirst && query.has_scroll_capability(target);
        let simulated = |input: I| {
            Strategy::Simulated(SimulatedScroll {
                input,
                target,
                style: config.input,
                wheel_delta: config.wheel_delta,
                settle: config.scroll_settle(),
            })
        };

        let strategy = if structured {
            let mut scroll = StructuredScroll::new(
                query,
                target,
                config.structured_increments,
                config.scroll_settle(),
            );
            match scroll.refresh() {
                Ok(()) => {
                    info!(at_end = scroll.at_end, "using structured scrolling");
                    Strategy::Structured(scroll)
                }
                Err(err) => {
                    warn!(error = %err, "structured scroll unreadable, using simulated input");
                    simulated(input)
                }
            }
        } else {
            info!(input = %config.input, "using simulated scrolling");
            simulated(input)
        };

        state = DriverState::CapabilityChecked;
        Self { strategy, state, failure: None }
    }

    /// One scroll step. `false` only when the capability failed; reaching the
    /// end is reported through [`ScrollDriver::at_end`].
    pub fn advance(&mut self) -> bool {
        match self.state {
            DriverState::Failed => return false,
            DriverState::Exhausted => return true,
            _ => {}
        }
        self.state = DriverState::Advancing;
        let stepped = match &mut self.strategy {
            Strategy::Structured(s) => s.advance(),
            Strategy::Simulated(s) => s.advance(),
        };
        match stepped {
            Ok(()) => {
                if self.at_end() {
                    self.state = DriverState::Exhausted;
                }
                true
            }
            Err(err) => {
                warn!(error = %err, "scroll driver failed");
                self.state = DriverState::Failed;
                self.failure = Some(err);
                false
            }
        }
    }

    pub fn at_end(&self) -> bool {
        match &self.strategy {
            Strategy::Structured(s) => s.at_end(),
            Strategy::Simulated(s) => s.at_end(),
        }
    }

    pub fn scroll_state(&self) -> ScrollState {
        let capability = match self.strategy {
            Strategy::Structured(_) => Capability::Available,
            Strategy::Simulated(_) => Capability::Unavailable,
        };
        ScrollState { capability, at_end: self.at_end() }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Called by the loop when stagnation ends the session.
    pub fn mark_exhausted(&mut self) {
        if self.state != DriverState::Failed {
            self.state = DriverState::Exhausted;
        }
    }

    pub fn take_failure(&mut self) -> Option<CaptureError> {
        self.failure.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeInput, FakeQuery, ScrollPosition, instant_config};

    const TARGET: TargetHandle = TargetHandle(7);

    /// Query scrolls 100 rows per increment, input 250 per key press.
    fn driver_with_fakes(
        position: &ScrollPosition,
        config: &ScrollConfig,
    ) -> ScrollDriver<FakeQuery, FakeInput> {
        let query = FakeQuery::new(position, 100);
        ScrollDriver::detect(TARGET, query, FakeInput::new(position, 250), config)
    }

    #[test]
    fn test_structured_selected_when_available() {
        let position = ScrollPosition::new(0, 1000, 300);
        let driver = driver_with_fakes(&position, &instant_config());
        assert_eq!(driver.state(), DriverState::CapabilityChecked);
        assert_eq!(
            driver.scroll_state(),
            ScrollState { capability: Capability::Available, at_end: false }
        );
    }

    #[test]
    fn test_simulated_only_ignores_capability() {
        let position = ScrollPosition::new(0, 1000, 300);
        let config = ScrollConfig { mode: ModePreference::SimulatedOnly, ..instant_config() };
        let driver = driver_with_fakes(&position, &config);
        assert_eq!(driver.scroll_state().capability, Capability::Unavailable);
    }

    #[test]
    fn test_structured_reaches_end() {
        let position = ScrollPosition::new(0, 1000, 300);
        let config = ScrollConfig { structured_increments: 2, ..instant_config() };
        let mut driver = driver_with_fakes(&position, &config);
        let mut steps = 0;
        while !driver.at_end() {
            assert!(driver.advance());
            steps += 1;
            assert!(steps < 10);
        }
        // 700 scrollable rows at 200 per step
        assert_eq!(steps, 4);
        assert_eq!(position.top(), 700);
        assert_eq!(driver.state(), DriverState::Exhausted);
    }

    #[test]
    fn test_fully_visible_content_is_at_end_immediately() {
        let position = ScrollPosition::new(0, 300, 300);
        let driver = driver_with_fakes(&position, &instant_config());
        assert!(driver.at_end());
    }

    #[test]
    fn test_lost_capability_fails_driver() {
        let position = ScrollPosition::new(0, 2000, 300);
        let query = FakeQuery::new(&position, 100).failing_after(1);
        let config = ScrollConfig { structured_increments: 1, ..instant_config() };
        let mut driver =
            ScrollDriver::detect(TARGET, query, FakeInput::new(&position, 250), &config);
        assert!(driver.advance());
        assert!(!driver.advance());
        assert_eq!(driver.state(), DriverState::Failed);
        assert!(matches!(driver.take_failure(), Some(CaptureError::DriverFailure(_))));
        assert!(!driver.advance());
    }

    #[test]
    fn test_unreadable_position_falls_back_to_simulated() {
        let position = ScrollPosition::new(0, 2000, 300);
        let query = FakeQuery::new(&position, 100).unreadable();
        let input = FakeInput::new(&position, 250);
        let driver = ScrollDriver::detect(TARGET, query, input, &instant_config());
        assert_eq!(driver.scroll_state().capability, Capability::Unavailable);
    }

    #[test]
    fn test_simulated_sends_key_pair_and_never_ends() {
        let position = ScrollPosition::new(0, 600, 300);
        let input = FakeInput::new(&position, 250);
        let log = input.log();
        let config = ScrollConfig { mode: ModePreference::SimulatedOnly, ..instant_config() };
        let mut driver = ScrollDriver::detect(TARGET, NoStructuredScroll, input, &config);
        for _ in 0..3 {
            assert!(driver.advance());
        }
        assert!(!driver.at_end());
        assert_eq!(position.top(), 300);
        assert_eq!(log.borrow().as_slice(), ["down", "up", "down", "up", "down", "up"]);
    }

    #[test]
    fn test_wheel_input() {
        let position = ScrollPosition::new(0, 2000, 300);
        let input = FakeInput::new(&position, 250);
        let log = input.log();
        let config = ScrollConfig {
            mode: ModePreference::SimulatedOnly,
            input: InputStyle::Wheel,
            ..instant_config()
        };
        let mut driver = ScrollDriver::detect(TARGET, NoStructuredScroll, input, &config);
        assert!(driver.advance());
        assert_eq!(log.borrow().as_slice(), ["wheel -5"]);
    }
}
