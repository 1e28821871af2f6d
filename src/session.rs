//! Scroll-capture session.
//! Drives scroll, wait-for-change, sticky crop, overlap estimation and
//! stitching in strict alternation until the content ends, the view stops
//! changing, the step budget runs out, or the operator cancels.
//!
//! A session owns all of its state; nothing is shared between sessions.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tracing::{debug, info, warn};

use crate::capture::{FrameSource, TargetActivation, TargetHandle};
use crate::config::ScrollConfig;
use crate::error::{CaptureError, CaptureResult};
use crate::fingerprint::{Fingerprint, fingerprint, similar};
use crate::frame::{Frame, Viewport};
use crate::overlap::{MIN_COMPARABLE_ROWS, OverlapEstimate, OverlapEstimator};
use crate::scroll::{InputSink, ScrollDriver, ScrollQuery};
use crate::sticky::estimate_sticky_height;
use crate::stitch::{Stitcher, Tile};

/// Consecutive unchanged frames that end a session.
pub const STAGNATION_LIMIT: u32 = 4;

/// Shared abort flag, checked once per loop iteration.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    EndOfContent,
    Stagnation,
    StepBudget,
    DriverFailed,
    CaptureFailed,
    Cancelled,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            StopReason::EndOfContent => "reached end of content",
            StopReason::Stagnation => "view stopped changing",
            StopReason::StepBudget => "step budget exhausted",
            StopReason::DriverFailed => "scroll driver failed",
            StopReason::CaptureFailed => "frame capture failed",
            StopReason::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// Platform pieces a session consumes.
pub struct Collaborators<S, A, Q, I> {
    pub source: S,
    pub activation: A,
    pub query: Q,
    pub input: I,
}

#[derive(Debug)]
pub struct CaptureOutcome {
    pub composite: Frame,
    pub tiles: Vec<Tile>,
    /// Scroll steps taken after the first frame
    pub steps: u32,
    pub stop: StopReason,
    /// Mid-session failure that cut the capture short
    pub warning: Option<CaptureError>,
}

/// Per-session mutable state threaded through the loop.
#[derive(Debug)]
struct LoopState {
    sticky_height: u32,
    stagnant: u32,
    last_fingerprint: Fingerprint,
    previous_raw: Frame,
    previous_cropped: Frame,
}

impl LoopState {
    fn new(first: &Frame) -> Self {
        Self {
            sticky_height: 0,
            stagnant: 0,
            last_fingerprint: fingerprint(first),
            previous_raw: first.clone(),
            previous_cropped: first.clone(),
        }
    }

    /// Folds a measured sticky height into the running sticky height, which only grows.
    /// `ceiling` keeps enough rows below the header to compare.
    fn absorb_sticky(&mut self, measured: u32, ceiling: u32) -> u32 {
        let measured = measured.min(ceiling);
        if measured > self.sticky_height {
            info!(from = self.sticky_height, to = measured, "sticky header grew");
            self.sticky_height = measured;
        }
        self.sticky_height
    }

    /// Returns true once the stagnation limit is reached.
    fn record_stagnant(&mut self, stagnant: bool) -> bool {
        if stagnant {
            self.stagnant += 1;
        } else {
            self.stagnant = 0;
        }
        self.stagnant >= STAGNATION_LIMIT
    }
}

/// Estimates where `frame` lands against the most recent tile.
fn place(
    stitcher: &Stitcher,
    estimator: &OverlapEstimator,
    tail_rows: u32,
    frame: &Frame,
) -> Option<OverlapEstimate> {
    let tail = stitcher.tail_slice(tail_rows)?;
    let last = stitcher.last_frame()?;
    Some(estimator.estimate(&tail, last, frame))
}

/// Captures until the fingerprint moves away from `last`, or the poll budget is
/// spent. The flag reports whether a change was seen.
fn poll_for_change<S: FrameSource>(
    source: &mut S,
    viewport: &Viewport,
    last: &Fingerprint,
    config: &ScrollConfig,
) -> CaptureResult<(Frame, bool)> {
    let mut attempt = 1;
    loop {
        let frame = source.capture(viewport)?;
        if fingerprint(&frame) != *last {
            return Ok((frame, true));
        }
        if attempt >= config.poll_attempts {
            debug!(attempts = attempt, "no visible change while polling");
            return Ok((frame, false));
        }
        attempt += 1;
        thread::sleep(config.poll_interval());
    }
}

/// Runs one scrolling capture against `target`.
///
/// Setup problems (bad handle, tiny viewport, bad config, failing activation
/// or first capture) are returned as errors. Once the first frame exists, every
/// later failure only stops the loop, and the stitched result is returned with
/// the failure attached as a warning.
pub fn capture_scrolling<S, A, Q, I>(
    target: TargetHandle,
    viewport: Viewport,
    config: &ScrollConfig,
    parts: Collaborators<S, A, Q, I>,
    cancel: &CancelToken,
) -> CaptureResult<CaptureOutcome>
where
    S: FrameSource,
    A: TargetActivation,
    Q: ScrollQuery,
    I: InputSink,
{
    let Collaborators { mut source, mut activation, query, input } = parts;

    if target.0 == 0 || !activation.is_valid_handle(target) {
        let reason = format!("{} is not a capturable window", target);
        return Err(CaptureError::InvalidTarget(reason));
    }
    viewport.validate()?;
    config.validate()?;

    info!(%target, %viewport, max_steps = config.max_steps, "starting scroll capture");
    activation.bring_to_front(target, &viewport)?;
    thread::sleep(config.activate_settle());
    if cancel.is_cancelled() {
        return Err(CaptureError::Cancelled);
    }

    let first = source.capture(&viewport)?.with_index(0);
    let mut state = LoopState::new(&first);
    let mut stitcher = Stitcher::new(viewport.width, config.background);
    stitcher.append(first, 0);

    let mut driver = ScrollDriver::detect(target, query, input, config);
    let estimator = OverlapEstimator::new(config.search_limit, config.enhanced_overlap);
    let mut stop = StopReason::StepBudget;
    let mut warning = None;
    let mut steps = 0;

    let scroll_state = driver.scroll_state();
    info!(
        capability = ?scroll_state.capability,
        at_end = scroll_state.at_end,
        "scroll driver ready"
    );
    if scroll_state.at_end {
        stop = StopReason::EndOfContent;
    } else {
        for step in 1..=config.max_steps {
            if cancel.is_cancelled() {
                stop = StopReason::Cancelled;
                break;
            }
            steps = step;

            if !driver.advance() {
                stop = StopReason::DriverFailed;
                warning = driver.take_failure();
                break;
            }

            let polled = poll_for_change(&mut source, &viewport, &state.last_fingerprint, config);
            let (raw, changed) = match polled {
                Ok(polled) => polled,
                Err(err) => {
                    warn!(error = %err, step, "capture failed, keeping what we have");
                    stop = StopReason::CaptureFailed;
                    warning = Some(err);
                    break;
                }
            };
            let raw = raw.with_index(step);
            state.last_fingerprint = fingerprint(&raw);

            if changed && config.detect_sticky {
                let measured =
                    estimate_sticky_height(&state.previous_raw, &raw, config.sticky_max_rows);
                state.absorb_sticky(measured, raw.height().saturating_sub(MIN_COMPARABLE_ROWS));
            }
            let cropped = raw.crop_rows(state.sticky_height, raw.height());

            let stagnant = similar(&cropped, &state.previous_cropped);
            if state.record_stagnant(stagnant) {
                info!(step, "no new content for {} frames", STAGNATION_LIMIT);
                driver.mark_exhausted();
                stop = StopReason::Stagnation;
                break;
            }

            if stagnant {
                debug!(step, stagnant = state.stagnant, "frame unchanged");
            } else if let Some(estimate) =
                place(&stitcher, &estimator, config.tail_rows, &cropped)
            {
                let offset = stitcher.append(cropped.clone(), estimate.overlap);
                debug!(
                    step,
                    offset,
                    overlap = estimate.overlap,
                    dy = estimate.dy,
                    method = %estimate.method,
                    height = cropped.height(),
                    total = stitcher.total_height(),
                    "tile appended"
                );
                state.previous_cropped = cropped;
            }
            state.previous_raw = raw;

            if driver.at_end() {
                stop = StopReason::EndOfContent;
                break;
            }
        }
    }

    let composite = stitcher.render();
    info!(
        tiles = stitcher.len(),
        width = composite.width(),
        height = composite.height(),
        driver = ?driver.state(),
        %stop,
        "scroll capture finished"
    );
    Ok(CaptureOutcome { composite, tiles: stitcher.into_tiles(), steps, stop, warning })
}
