//! Sticky-region detector.
//! Headers and toolbars that stay put while the page scrolls show up as
//! identical rows at the top of consecutive frames. The detector counts how many
//! leading rows match, bounded by `max_rows`.

use crate::frame::Frame;

/// Mean absolute luma difference below which two rows count as identical.
pub const ROW_MATCH_THRESHOLD: f64 = 2.0;

fn row_difference(a: &Frame, ya: u32, b: &Frame, yb: u32) -> f64 {
    let width = a.width().min(b.width());
    if width == 0 {
        return 0.0;
    }
    let total: u64 = (0..width)
        .map(|x| (a.luma_at(x, ya) as i32 - b.luma_at(x, yb) as i32).unsigned_abs() as u64)
        .sum();
    total as f64 / width as f64
}

/// Height of the stationary band at the top of `current`, in
/// `[0, min(max_rows, previous.height, current.height)]`.
///
/// Rows of `current` are matched against `previous` aligned to its bottom edge
/// over the shared height, which is plain top alignment whenever the two
/// frames have the same height.
pub fn estimate_sticky_height(previous: &Frame, current: &Frame, max_rows: u32) -> u32 {
    if previous.width() != current.width() {
        return 0;
    }
    let shared_height = previous.height().min(current.height());
    let limit = max_rows.min(shared_height);
    let base = previous.height() - shared_height;

    let mut y = 0;
    while y < limit && row_difference(current, y, previous, base + y) < ROW_MATCH_THRESHOLD {
        y += 1;
    }
    y
}
