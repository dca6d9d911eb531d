//! Regularized Weighted Least-Squares Filter Estimation
//!
//! Per bin and iteration:
//!
//! ```text
//! R      = Σ_t w(t) · y(t) y(t)ᴴ
//! r[:,c] = Σ_t w(t) · y(t) · conj(x_c(t))
//! R     += trace(R).re · loading · I
//! R, r  *= scale
//! R g_c  = r[:,c]
//! ```
//!
//! `y(t)` is the delayed-frame stack column, `x_c(t)` the observed input of
//! output channel `c`. Both regularization constants come from the options.

use super::frame_stack::StackView;
use super::hermitian::HermitianSolver;
use rustfft::num_complex::Complex;

// =============================================================================
// Prediction Filter
// =============================================================================

/// Filter for one bin: one `dim`-length vector per output channel, where
/// `dim = channels * filter_len`.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionFilter {
    channels: usize,
    filter_len: usize,
    coeffs: Vec<Complex<f32>>,
}

impl PredictionFilter {
    pub fn zeros(channels: usize, filter_len: usize) -> Self {
        Self {
            channels,
            filter_len,
            coeffs: vec![Complex::new(0.0, 0.0); channels * filter_len * channels],
        }
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.channels * self.filter_len
    }

    /// Coefficient of block `k` mapping `in_ch` onto `out_ch`.
    #[cfg(test)]
    fn tap(&self, k: usize, in_ch: usize, out_ch: usize) -> Complex<f32> {
        self.coeffs[out_ch * self.dim() + k * self.channels + in_ch]
    }

    fn output_mut(&mut self, out_ch: usize) -> &mut [Complex<f32>] {
        let dim = self.dim();
        &mut self.coeffs[out_ch * dim..(out_ch + 1) * dim]
    }

    pub fn clear(&mut self) {
        self.coeffs.fill(Complex::new(0.0, 0.0));
    }

    /// Reverberant component of `out_ch` at `frame`: `Σ_k G_kᴴ y_k`.
    #[inline]
    pub fn predict(&self, stack: &StackView<'_>, frame: usize, out_ch: usize) -> Complex<f32> {
        let dim = self.dim();
        let g = &self.coeffs[out_ch * dim..(out_ch + 1) * dim];
        g.chunks_exact(self.channels)
            .enumerate()
            .map(|(k, g_k)| {
                g_k.iter()
                    .zip(stack.block(frame, k))
                    .map(|(g, y)| g.conj() * y)
                    .sum::<Complex<f32>>()
            })
            .sum()
    }
}

// =============================================================================
// Normal Equations
// =============================================================================

/// Scratch for the normal equations of one bin. Reused across iterations.
pub struct WeightedLeastSquares {
    channels: usize,
    dim: usize,
    corr: Vec<Complex<f32>>,
    cross: Vec<Complex<f32>>,
}

impl WeightedLeastSquares {
    pub fn new(channels: usize, filter_len: usize) -> Self {
        let dim = channels * filter_len;
        Self {
            channels,
            dim,
            corr: vec![Complex::new(0.0, 0.0); dim * dim],
            cross: vec![Complex::new(0.0, 0.0); dim * channels],
        }
    }

    pub fn reset(&mut self) {
        self.corr.fill(Complex::new(0.0, 0.0));
        self.cross.fill(Complex::new(0.0, 0.0));
    }

    /// Adds one frame. `observed[c]` is the input of channel `c` at that frame.
    pub fn accumulate(&mut self, column: &[Complex<f32>], observed: &[Complex<f32>], weight: f32) {
        let dim = self.dim;
        debug_assert_eq!(column.len(), dim);
        debug_assert_eq!(observed.len(), self.channels);

        for (i, &yi) in column.iter().enumerate() {
            if yi.re == 0.0 && yi.im == 0.0 {
                continue;
            }
            let wyi = yi * weight;
            let row = &mut self.corr[i * dim..(i + 1) * dim];
            for (acc, yj) in row.iter_mut().zip(column) {
                *acc += wyi * yj.conj();
            }
            for (c, x) in observed.iter().enumerate() {
                self.cross[c * dim + i] += wyi * x.conj();
            }
        }
    }

    /// Accumulates every frame of a stack against the observed rows.
    ///
    /// `observed` holds `channels` rows of `frames` values.
    pub fn accumulate_stack(&mut self, stack: &StackView<'_>, observed: &[&[Complex<f32>]], weights: &[f32]) {
        let mut frame_obs = vec![Complex::new(0.0, 0.0); self.channels];
        for (t, &w) in weights.iter().enumerate().take(stack.frames()) {
            for (dst, row) in frame_obs.iter_mut().zip(observed) {
                *dst = row[t];
            }
            self.accumulate(stack.column(t), &frame_obs, w);
        }
    }

    /// Diagonal loading proportional to the trace, then global scaling.
    pub fn regularize(&mut self, loading: f32, scale: f32) {
        let dim = self.dim;
        let trace: f32 = (0..dim).map(|i| self.corr[i * dim + i].re).sum();
        let load = trace * loading;
        for i in 0..dim {
            self.corr[i * dim + i] += load;
        }
        for v in self.corr.iter_mut().chain(self.cross.iter_mut()) {
            *v *= scale;
        }
    }

    /// Solves for every output channel. On a failed factorization the filter
    /// is zeroed, which turns cancellation into pass-through.
    pub fn solve_into(&self, solver: &mut dyn HermitianSolver, filter: &mut PredictionFilter) -> bool {
        debug_assert_eq!(filter.dim(), self.dim);
        if !solver.factor(&self.corr, self.dim) {
            filter.clear();
            return false;
        }
        for c in 0..self.channels {
            let rhs = &self.cross[c * self.dim..(c + 1) * self.dim];
            let out = filter.output_mut(c);
            solver.solve(rhs, out);
            if out.iter().any(|v| !v.re.is_finite() || !v.im.is_finite()) {
                filter.clear();
                return false;
            }
        }
        true
    }

    #[cfg(test)]
    fn corr(&self, i: usize, j: usize) -> Complex<f32> {
        self.corr[i * self.dim + j]
    }
}
