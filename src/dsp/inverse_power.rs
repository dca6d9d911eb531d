//! Per-Frame Inverse-Power Weights
//!
//! Weight for (bin, frame) is `1 / (mean |X|^2 + 1)` over a neighborhood of
//! `±psd_context` frames and bins across all channels. High-power cells are
//! likely dominated by the direct path and are down-weighted in the
//! regression. The `+1` keeps silent regions at a weight of ~1.
//!
//! # Edges
//! The neighborhood is intersected with the spectrogram bounds: edge cells
//! average over fewer values. Nothing wraps and no zero padding enters the mean.
//!
//! # Bin Isolation
//! The bin being processed contributes its own evolving estimate; neighbor
//! bins always contribute the input spectrum. This keeps every bin's result
//! independent of the order (or concurrency) in which bins are processed.

use super::spectrogram::Spectrogram;
use rustfft::num_complex::Complex;

/// Direct evaluation over a spectrogram. Reference form of [`InversePowerEstimator`].
#[cfg(test)]
fn inverse_power(spec: &Spectrogram, bin: usize, frame: usize, psd_context: usize) -> f32 {
    let (bin_lo, bin_hi) = clamped_window(bin, psd_context, spec.num_bins());
    let (frame_lo, frame_hi) = clamped_window(frame, psd_context, spec.frames());

    let mut sum = 0.0f32;
    for ch in 0..spec.channels() {
        for b in bin_lo..=bin_hi {
            for &v in &spec.row(ch, b)[frame_lo..=frame_hi] {
                sum += v.norm_sqr();
            }
        }
    }
    let count = spec.channels() * (bin_hi - bin_lo + 1) * (frame_hi - frame_lo + 1);
    1.0 / (sum / count as f32 + 1.0)
}

#[inline]
fn clamped_window(center: usize, half_width: usize, len: usize) -> (usize, usize) {
    let lo = center.saturating_sub(half_width);
    let hi = center.saturating_add(half_width).min(len - 1);
    (lo, hi)
}

/// Weight estimator for one bin.
///
/// Power of the neighbor bins is summed once; each call only folds in the
/// bin's current estimate.
pub struct InversePowerEstimator {
    channels: usize,
    frames: usize,
    psd_context: usize,
    bins_in_window: usize,
    neighbor_power: Vec<f32>,
    frame_power: Vec<f32>,
}

impl InversePowerEstimator {
    pub fn new(input: &Spectrogram, bin: usize, psd_context: usize) -> Self {
        let channels = input.channels();
        let frames = input.frames();
        let (bin_lo, bin_hi) = clamped_window(bin, psd_context, input.num_bins());

        let mut neighbor_power = vec![0.0f32; frames];
        for ch in 0..channels {
            for b in (bin_lo..=bin_hi).filter(|&b| b != bin) {
                for (acc, v) in neighbor_power.iter_mut().zip(input.row(ch, b)) {
                    *acc += v.norm_sqr();
                }
            }
        }

        Self {
            channels,
            frames,
            psd_context,
            bins_in_window: bin_hi - bin_lo + 1,
            neighbor_power,
            frame_power: vec![0.0; frames],
        }
    }

    /// Fills `weights[t]` from the bin's current estimate (`channels` rows of `frames`).
    pub fn estimate(&mut self, estimate: &[Complex<f32>], weights: &mut [f32]) {
        debug_assert_eq!(estimate.len(), self.channels * self.frames);
        debug_assert_eq!(weights.len(), self.frames);

        self.frame_power.copy_from_slice(&self.neighbor_power);
        for row in estimate.chunks_exact(self.frames) {
            for (acc, v) in self.frame_power.iter_mut().zip(row) {
                *acc += v.norm_sqr();
            }
        }

        for (t, w) in weights.iter_mut().enumerate() {
            let (lo, hi) = clamped_window(t, self.psd_context, self.frames);
            let sum: f32 = self.frame_power[lo..=hi].iter().sum();
            let count = self.channels * self.bins_in_window * (hi - lo + 1);
            *w = 1.0 / (sum / count as f32 + 1.0);
        }
    }
}
