//! Overlap estimator.
//! Finds how far the new frame must sit below the top of the trailing slice so
//! that duplicated rows line up. The result is `dy`: 0 means the new frame
//! repeats the whole trailing slice, `trailing.height()` means nothing repeats.
//! A negative `dy` means the repeat reaches above the slice into the rest of
//! the last tile.
//!
//! The exhaustive search is plain pixel arithmetic and always available. With
//! `enhanced` set, an edge-filtered template match (feature `vision`) and a
//! phase-correlation pass are tried first; each only answers when confident
//! and when the pixels at the proposed overlap agree.

use tracing::debug;

use crate::frame::{CHANNELS, Frame};
use crate::phase;

/// Floor on the number of rows a candidate must compare.
pub const MIN_COMPARABLE_ROWS: u32 = 24;
const COLUMN_STEP: usize = 3;
const ROW_STEP: usize = 2;
/// Mean squared channel difference at or below which rows count as repeated.
const MATCH_MEAN_SQUARED: u64 = 64;

/// Peak normalised cross-correlation needed to trust a template match.
pub const TEMPLATE_CONFIDENCE: f32 = 0.75;
/// Runner-up peaks closer than this to the best make the match ambiguous.
const TEMPLATE_AMBIGUITY: f32 = 0.02;
/// Sobel magnitude above which a pixel counts as an edge.
const EDGE_THRESHOLD: u16 = 96;
/// Normalised phase-correlation peak needed to trust the shift.
pub const PHASE_CONFIDENCE: f64 = 0.12;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlapMethod {
    Exhaustive,
    Template,
    PhaseCorrelation,
}

impl std::fmt::Display for OverlapMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverlapMethod::Exhaustive => write!(f, "exhaustive"),
            OverlapMethod::Template => write!(f, "template"),
            OverlapMethod::PhaseCorrelation => write!(f, "phase"),
        }
    }
}

/// Where the new frame lands against the last tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverlapEstimate {
    /// Raw offset relative to the trailing slice; negative reaches above it
    pub dy: i64,
    /// Rows at the bottom of the last tile repeated by the new frame
    pub overlap: u32,
    pub method: OverlapMethod,
}

impl OverlapEstimate {
    /// Converts a raw `dy` against a slice of `trailing_height` rows into an
    /// overlap clamped to `[0, tile_height]`.
    fn resolve(dy: i64, trailing_height: u32, tile_height: u32, method: OverlapMethod) -> Self {
        let overlap = (trailing_height as i64 - dy).clamp(0, tile_height as i64) as u32;
        Self { dy, overlap, method }
    }
}

pub fn min_comparable_rows(trailing_height: u32) -> u32 {
    (trailing_height / 4).max(MIN_COMPARABLE_ROWS)
}

/// Squared per-channel difference between the bottom `overlap` rows of
/// `trailing` and the top `overlap` rows of `new_frame`, on a sparse grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Score {
    sum: u64,
    samples: u64,
}

impl Score {
    /// sum / samples < other.sum / other.samples, without floats
    fn beats(&self, other: &Score) -> bool {
        (self.sum as u128) * (other.samples as u128) < (other.sum as u128) * (self.samples as u128)
    }

    fn is_match(&self) -> bool {
        self.samples > 0 && self.sum <= MATCH_MEAN_SQUARED * self.samples
    }
}

fn sampled_ssd(trailing: &Frame, new_frame: &Frame, overlap: u32, width: u32) -> Score {
    let base = trailing.height() - overlap;
    let mut score = Score { sum: 0, samples: 0 };
    for i in (0..overlap).step_by(ROW_STEP) {
        let a = trailing.row(base + i);
        let b = new_frame.row(i);
        for x in (0..width as usize).step_by(COLUMN_STEP) {
            let px = x * CHANNELS..(x + 1) * CHANNELS;
            let (ar, ag, ab) = trailing.format().rgb(&a[px.clone()]);
            let (br, bg, bb) = new_frame.format().rgb(&b[px]);
            for (p, q) in [(ar, br), (ag, bg), (ab, bb)] {
                let d = p as i64 - q as i64;
                score.sum += (d * d) as u64;
            }
            score.samples += 3;
        }
    }
    score
}

/// Best overlap of at least `floor` rows, visiting distinct overlap sizes
/// largest (smallest shift) first so the first minimum wins ties.
fn best_overlap(
    trailing: &Frame,
    new_frame: &Frame,
    search_limit: u32,
    floor: u32,
) -> Option<(u32, Score)> {
    let t = trailing.height();
    let n = new_frame.height();
    if t == 0 || n == 0 {
        return None;
    }
    let width = trailing.width().min(new_frame.width());
    let max_shift = search_limit.min(n - 1);

    // Every shift up to n - t compares the full slice, so only distinct
    // overlap sizes are visited.
    let largest = t.min(n);
    let smallest = floor.max(t.min(n - max_shift));

    let mut best: Option<(u32, Score)> = None;
    for overlap in (smallest..=largest).rev() {
        let score = sampled_ssd(trailing, new_frame, overlap, width);
        if score.samples == 0 {
            continue;
        }
        if best.is_none_or(|(_, top)| score.beats(&top)) {
            best = Some((overlap, score));
        }
    }
    best
}

/// Bounded exhaustive search.
///
/// Candidate shift `s` compares `min(trailing.height, new.height - s)` rows;
/// candidates with fewer than [`min_comparable_rows`] are skipped. The first
/// (smallest-shift) minimum wins. When nothing is comparable the whole trailing
/// height is returned, i.e. a clean cut.
pub fn estimate_overlap(trailing: &Frame, new_frame: &Frame, search_limit: u32) -> u32 {
    let t = trailing.height();
    match best_overlap(trailing, new_frame, search_limit, min_comparable_rows(t)) {
        Some((overlap, _)) => t - overlap,
        None => t,
    }
}

/// True when the bottom `overlap` rows of `tile` repeat at the top of `new_frame`.
fn confirms(tile: &Frame, new_frame: &Frame, overlap: u32) -> bool {
    if overlap < MIN_COMPARABLE_ROWS || overlap > tile.height().min(new_frame.height()) {
        return false;
    }
    let width = tile.width().min(new_frame.width());
    sampled_ssd(tile, new_frame, overlap, width).is_match()
}

#[cfg(feature = "vision")]
fn edge_map(frame: &Frame, width: u32) -> image::GrayImage {
    use image::{GrayImage, Luma};
    let gray = GrayImage::from_fn(width, frame.height(), |x, y| Luma([frame.luma_at(x, y)]));
    let gradients = imageproc::gradients::sobel_gradients(&gray);
    GrayImage::from_fn(width, frame.height(), |x, y| {
        if gradients.get_pixel(x, y)[0] > EDGE_THRESHOLD {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Locates the bottom band of the trailing slice inside the top window of the
/// new frame on edge maps. Returns the raw `dy`, possibly negative.
#[cfg(feature = "vision")]
fn template_estimate(trailing: &Frame, new_frame: &Frame, search_limit: u32) -> Option<i64> {
    use imageproc::template_matching::{MatchTemplateMethod, match_template};

    let t = trailing.height();
    let n = new_frame.height();
    let band = min_comparable_rows(t).min(t);
    if band == 0 || n < band {
        return None;
    }
    let width = trailing.width().min(new_frame.width());
    let window_rows = search_limit.saturating_add(band).min(n);

    let template = edge_map(&trailing.bottom_rows(band), width);
    if template.pixels().all(|p| p[0] == 0) {
        return None;
    }
    let window = edge_map(&new_frame.crop_rows(0, window_rows), width);
    let scores =
        match_template(&window, &template, MatchTemplateMethod::CrossCorrelationNormalized);

    let mut best: Option<(u32, f32)> = None;
    for (_, y, score) in scores.enumerate_pixels() {
        let value = score[0];
        if !value.is_finite() {
            continue;
        }
        if best.is_none_or(|(_, top)| value > top) {
            best = Some((y, value));
        }
    }
    let (y, peak) = best?;
    if peak < TEMPLATE_CONFIDENCE {
        return None;
    }
    let ambiguous = scores.enumerate_pixels().any(|(_, other, score)| {
        other.abs_diff(y) > 2 && score[0].is_finite() && peak - score[0] < TEMPLATE_AMBIGUITY
    });
    if ambiguous {
        return None;
    }
    let overlap = (y + band) as i64;
    Some(t as i64 - overlap)
}

#[cfg(feature = "vision")]
fn template_path(trailing: &Frame, new_frame: &Frame, search_limit: u32) -> Option<i64> {
    template_estimate(trailing, new_frame, search_limit)
}

#[cfg(not(feature = "vision"))]
fn template_path(_trailing: &Frame, _new_frame: &Frame, _search_limit: u32) -> Option<i64> {
    None
}

/// Vertical shift of the new frame's top against the trailing slice via phase
/// correlation. Returns the raw `dy`.
fn phase_estimate(trailing: &Frame, new_frame: &Frame, search_limit: u32) -> Option<i64> {
    let rows = trailing.height().min(new_frame.height());
    if rows < MIN_COMPARABLE_ROWS {
        return None;
    }
    let reference = trailing.bottom_rows(rows);
    let moved = new_frame.crop_rows(0, rows);
    let shift = phase::vertical_shift(&reference, &moved)?;
    if shift.peak < PHASE_CONFIDENCE {
        return None;
    }
    let dy = shift.dy.round() as i64 + (trailing.height() - rows) as i64;
    if dy > search_limit as i64 {
        return None;
    }
    Some(dy)
}

/// Overlap estimation with configured search bound and optional correlation
/// paths.
#[derive(Clone, Copy, Debug)]
pub struct OverlapEstimator {
    search_limit: Option<u32>,
    enhanced: bool,
}

impl OverlapEstimator {
    pub fn new(search_limit: Option<u32>, enhanced: bool) -> Self {
        Self { search_limit, enhanced }
    }

    /// Places `new_frame` against `tile`, the most recent tile, comparing
    /// mostly against `trailing`, the bottom slice of that tile.
    ///
    /// Scrolls shorter than `tile.height() - trailing.height()` repeat more
    /// rows than the slice holds. When the slice yields no matching candidate,
    /// the exhaustive search continues over the rest of the tile.
    pub fn estimate(&self, trailing: &Frame, tile: &Frame, new_frame: &Frame) -> OverlapEstimate {
        let t = trailing.height();
        let limit = self.search_limit.unwrap_or(new_frame.height());
        let resolve = |dy: i64, method| OverlapEstimate::resolve(dy, t, tile.height(), method);

        let confirmed = |dy: Option<i64>, method| {
            let estimate = resolve(dy?, method);
            if confirms(tile, new_frame, estimate.overlap) {
                return Some(estimate);
            }
            debug!(%method, dy = estimate.dy, "correlation peak rejected by pixel check");
            None
        };
        if self.enhanced {
            let template = template_path(trailing, new_frame, limit);
            if let Some(estimate) = confirmed(template, OverlapMethod::Template) {
                return estimate;
            }
            let phase = phase_estimate(trailing, new_frame, limit);
            if let Some(estimate) = confirmed(phase, OverlapMethod::PhaseCorrelation) {
                return estimate;
            }
        }

        let found = best_overlap(trailing, new_frame, limit, min_comparable_rows(t));
        if found.is_some_and(|(_, score)| score.is_match()) || tile.height() <= t {
            let dy = found.map_or(t as i64, |(overlap, _)| (t - overlap) as i64);
            return resolve(dy, OverlapMethod::Exhaustive);
        }

        // Overlaps up to t were already scored against the slice.
        let extended = best_overlap(tile, new_frame, limit, t + 1);
        let dy = match (found, extended) {
            (_, Some((overlap, score))) if score.is_match() => t as i64 - overlap as i64,
            (Some((overlap, _)), _) => (t - overlap) as i64,
            (None, _) => t as i64,
        };
        resolve(dy, OverlapMethod::Exhaustive)
    }
}
