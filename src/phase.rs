//! Phase correlation for vertical shifts.
//! Both frames are reduced to mean-centred luma, zero-padded to powers of two
//! and transformed; the normalised cross-power spectrum is inverted and its
//! peak searched along the zero horizontal shift column.

use std::f64::consts::PI;
use std::ops::{Add, Mul, Sub};

use crate::frame::Frame;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Complex {
    re: f64,
    im: f64,
}

impl Complex {
    fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    fn conj(self) -> Self {
        Self::new(self.re, -self.im)
    }

    fn norm(self) -> f64 {
        self.re.hypot(self.im)
    }

    fn scale(self, k: f64) -> Self {
        Self::new(self.re * k, self.im * k)
    }
}

impl Add for Complex {
    type Output = Self;
    fn add(self, o: Self) -> Self {
        Self::new(self.re + o.re, self.im + o.im)
    }
}

impl Sub for Complex {
    type Output = Self;
    fn sub(self, o: Self) -> Self {
        Self::new(self.re - o.re, self.im - o.im)
    }
}

impl Mul for Complex {
    type Output = Self;
    fn mul(self, o: Self) -> Self {
        Self::new(self.re * o.re - self.im * o.im, self.re * o.im + self.im * o.re)
    }
}

/// In-place iterative radix-2 FFT. `buf.len()` must be a power of two.
fn fft(buf: &mut [Complex], inverse: bool) {
    let n = buf.len();
    if n <= 1 {
        return;
    }

    let mut j = 0;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j |= bit;
        if i < j {
            buf.swap(i, j);
        }
    }

    let sign = if inverse { 1.0 } else { -1.0 };
    let mut len = 2;
    while len <= n {
        let angle = sign * 2.0 * PI / len as f64;
        let step = Complex::new(angle.cos(), angle.sin());
        for start in (0..n).step_by(len) {
            let mut w = Complex::new(1.0, 0.0);
            for k in 0..len / 2 {
                let u = buf[start + k];
                let v = buf[start + k + len / 2] * w;
                buf[start + k] = u + v;
                buf[start + k + len / 2] = u - v;
                w = w * step;
            }
        }
        len <<= 1;
    }

    if inverse {
        let k = 1.0 / n as f64;
        for c in buf.iter_mut() {
            *c = c.scale(k);
        }
    }
}

/// Row-major 2-D transform over a `rows x cols` grid.
fn fft2d(grid: &mut [Complex], rows: usize, cols: usize, inverse: bool) {
    for row in grid.chunks_mut(cols) {
        fft(row, inverse);
    }
    let mut column = vec![Complex::default(); rows];
    for x in 0..cols {
        for y in 0..rows {
            column[y] = grid[y * cols + x];
        }
        fft(&mut column, inverse);
        for y in 0..rows {
            grid[y * cols + x] = column[y];
        }
    }
}

fn centred_grid(frame: &Frame, width: u32, rows: usize, cols: usize) -> Vec<Complex> {
    let count = (width as usize * frame.height() as usize).max(1);
    let mut sum = 0u64;
    for y in 0..frame.height() {
        for x in 0..width {
            sum += frame.luma_at(x, y) as u64;
        }
    }
    let mean = sum as f64 / count as f64;

    let mut grid = vec![Complex::default(); rows * cols];
    for y in 0..frame.height() {
        for x in 0..width {
            let centred = frame.luma_at(x, y) as f64 - mean;
            grid[y as usize * cols + x as usize] = Complex::new(centred, 0.0);
        }
    }
    grid
}

/// Estimated vertical displacement and the normalised correlation peak.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhaseShift {
    /// Rows to move down in `reference` to reach the top of `moved`:
    /// `moved[y] ~ reference[y + dy]`.
    pub dy: f64,
    /// 1.0 for a perfect circular shift, near 0 for unrelated content.
    pub peak: f64,
}

pub fn vertical_shift(reference: &Frame, moved: &Frame) -> Option<PhaseShift> {
    let width = reference.width().min(moved.width());
    let height = reference.height().max(moved.height());
    if width == 0 || height < 2 {
        return None;
    }
    let rows = (height as usize).next_power_of_two();
    let cols = (width as usize).next_power_of_two();

    let mut a = centred_grid(reference, width, rows, cols);
    let mut b = centred_grid(moved, width, rows, cols);
    fft2d(&mut a, rows, cols, false);
    fft2d(&mut b, rows, cols, false);

    let mut cross: Vec<Complex> = a
        .iter()
        .zip(&b)
        .map(|(&fa, &fb)| {
            let product = fa * fb.conj();
            let magnitude = product.norm();
            if magnitude > f64::EPSILON {
                product.scale(1.0 / magnitude)
            } else {
                Complex::default()
            }
        })
        .collect();
    fft2d(&mut cross, rows, cols, true);

    let column: Vec<f64> = (0..rows).map(|y| cross[y * cols].re).collect();
    let (best, peak) = column
        .iter()
        .copied()
        .enumerate()
        .fold((0usize, f64::MIN), |acc, (y, v)| if v > acc.1 { (y, v) } else { acc });
    if !peak.is_finite() {
        return None;
    }

    let left = column[(best + rows - 1) % rows];
    let right = column[(best + 1) % rows];
    let curvature = left - 2.0 * peak + right;
    let offset =
        if curvature.abs() > f64::EPSILON { 0.5 * (left - right) / curvature } else { 0.0 };

    let mut dy = best as f64 + offset.clamp(-0.5, 0.5);
    if dy > rows as f64 / 2.0 {
        dy -= rows as f64;
    }
    Some(PhaseShift { dy, peak })
}
