//! Frame comparator.
//! Reduces a frame to a 16x16 grid of mean luma values quantised to 4 bits,
//! so "did anything visibly change" costs one 128-byte comparison no matter
//! how large the viewport is.

use crate::frame::Frame;

pub const GRID: u32 = 16;
const CELLS: usize = (GRID * GRID) as usize;

/// Packed nibbles, two cells per byte, row-major.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; CELLS / 2]);

/// Half-open span of cell `i` along an axis of `len` pixels.
fn cell_span(i: u32, len: u32) -> (u32, u32) {
    let start = i * len / GRID;
    let end = ((i + 1) * len / GRID).max(start + 1).min(len);
    (start, end)
}

pub fn fingerprint(frame: &Frame) -> Fingerprint {
    let mut packed = [0u8; CELLS / 2];
    if frame.width() == 0 || frame.height() == 0 {
        return Fingerprint(packed);
    }

    for cy in 0..GRID {
        let (y0, y1) = cell_span(cy, frame.height());
        for cx in 0..GRID {
            let (x0, x1) = cell_span(cx, frame.width());
            let mut sum = 0u64;
            let mut count = 0u64;
            for y in y0..y1 {
                for x in x0..x1 {
                    sum += frame.luma_at(x, y) as u64;
                    count += 1;
                }
            }
            let mean = if count == 0 { 0 } else { (sum / count) as u8 };
            let nibble = mean >> 4;
            let cell = (cy * GRID + cx) as usize;
            if cell % 2 == 0 {
                packed[cell / 2] |= nibble << 4;
            } else {
                packed[cell / 2] |= nibble;
            }
        }
    }
    Fingerprint(packed)
}

/// Frames of different size are never similar.
pub fn similar(a: &Frame, b: &Frame) -> bool {
    if a.width() != b.width() || a.height() != b.height() {
        return false;
    }
    fingerprint(a) == fingerprint(b)
}
