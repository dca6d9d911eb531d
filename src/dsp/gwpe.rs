//! Generalized WPE Dereverberation Engine
//!
//! Removes late reverberation from a multi-channel spectrogram. For each bin,
//! the reverberant tail is modeled as a linear prediction from frames at least
//! `delta` frames in the past; the prediction filter is estimated by
//! inverse-power weighted least squares and the predicted tail is subtracted.
//!
//! # Processing
//! 1. Build delayed-frame stacks from the input (once per call).
//! 2. Start every bin's estimate from the input.
//! 3. Per bin, `num_iter` times: weights from the current estimate, solve for
//!    the filter, re-estimate `input - prediction` (always from the raw input,
//!    so each iteration is a full re-estimate).
//! 4. Zero bins below `lower_bin`.
//!
//! # Degenerate Input
//! Silent bins, or inputs no longer than `delta` frames, have an empty
//! correlation matrix. The solver then yields a zero filter and the bin passes
//! through unchanged. Only shape mismatches are reported as errors.

use super::frame_stack::FrameStacks;
use super::hermitian::new_solver;
use super::inverse_power::InversePowerEstimator;
#[cfg(feature = "parallel")]
use super::scheduler::RayonScheduler;
use super::scheduler::{BinScheduler, SequentialScheduler};
use super::options::{BinLayout, ConfigError, GwpeOptions};
use super::spectrogram::Spectrogram;
use super::wls::{PredictionFilter, WeightedLeastSquares};
use log::debug;
use rustfft::num_complex::Complex;
use std::ops::Range;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DereverbError {
    #[error("spectrogram has {got} channels, engine was configured for {expected}")]
    ChannelMismatch { expected: usize, got: usize },
    #[error("spectrogram has {got} bins, FFT length implies {expected}")]
    BinMismatch { expected: usize, got: usize },
    #[error("spectrogram has no frames")]
    NoFrames,
}

/// Dereverberated rows of one bin: `channels` rows of `frames` values.
pub struct BinResult {
    pub bin: usize,
    pub rows: Vec<Complex<f32>>,
}

pub struct GeneralizedWpe {
    opts: GwpeOptions,
    layout: BinLayout,
}

impl GeneralizedWpe {
    pub fn new(opts: GwpeOptions) -> Result<Self, ConfigError> {
        let layout = opts.validate()?;
        debug!(
            "gwpe: {} ch, delta {}, K {}, {} iter, bins {} (lower {}, process {}..{})",
            opts.channels,
            opts.delta,
            opts.filter_len,
            opts.num_iter,
            layout.num_bins,
            layout.lower_bin,
            layout.start_bin,
            layout.upper_bin
        );
        Ok(Self { opts, layout })
    }

    pub fn options(&self) -> &GwpeOptions {
        &self.opts
    }

    #[inline]
    pub fn num_bins(&self) -> usize {
        self.layout.num_bins
    }

    #[inline]
    pub fn lower_bin(&self) -> usize {
        self.layout.lower_bin
    }

    #[inline]
    pub fn start_bin(&self) -> usize {
        self.layout.start_bin
    }

    #[inline]
    pub fn upper_bin(&self) -> usize {
        self.layout.upper_bin
    }

    fn bin_range(&self) -> Range<usize> {
        let upper = self.layout.upper_bin.min(self.layout.num_bins);
        self.layout.start_bin.min(upper)..upper
    }

    fn check_shape(&self, input: &Spectrogram) -> Result<(), DereverbError> {
        if input.channels() != self.opts.channels {
            return Err(DereverbError::ChannelMismatch {
                expected: self.opts.channels,
                got: input.channels(),
            });
        }
        if input.num_bins() != self.layout.num_bins {
            return Err(DereverbError::BinMismatch {
                expected: self.layout.num_bins,
                got: input.num_bins(),
            });
        }
        if input.frames() == 0 {
            return Err(DereverbError::NoFrames);
        }
        Ok(())
    }

    /// Dereverberates `input` into `output` (resized to the input's shape).
    ///
    /// Uses the rayon scheduler when `options.parallel` is set and the
    /// `parallel` feature is enabled.
    pub fn dereverb(&self, input: &Spectrogram, output: &mut Spectrogram) -> Result<(), DereverbError> {
        #[cfg(feature = "parallel")]
        if self.opts.parallel {
            return self.dereverb_with(input, output, &RayonScheduler);
        }
        self.dereverb_with(input, output, &SequentialScheduler)
    }

    pub fn dereverb_with<S: BinScheduler>(
        &self,
        input: &Spectrogram,
        output: &mut Spectrogram,
        scheduler: &S,
    ) -> Result<(), DereverbError> {
        self.check_shape(input)?;

        let bins = self.bin_range();
        let stacks = FrameStacks::build(input, bins.clone(), self.opts.delta, self.opts.filter_len);

        output.copy_from(input);
        let results = scheduler.run(bins, |bin| self.process_bin(input, &stacks, bin));

        let frames = input.frames();
        for result in results {
            for (ch, row) in result.rows.chunks_exact(frames).enumerate() {
                output.row_mut(ch, result.bin).copy_from_slice(row);
            }
        }

        output.zero_low_bins(self.layout.lower_bin);
        Ok(())
    }

    /// Allocating form of [`dereverb`](Self::dereverb).
    pub fn process(&self, input: &Spectrogram) -> Result<Spectrogram, DereverbError> {
        let mut output = Spectrogram::zeros(input.channels(), input.num_bins(), input.frames());
        self.dereverb(input, &mut output)?;
        Ok(output)
    }

    fn process_bin(&self, input: &Spectrogram, stacks: &FrameStacks, bin: usize) -> BinResult {
        let channels = self.opts.channels;
        let frames = input.frames();
        let stack = stacks.bin(bin);

        let observed: Vec<&[Complex<f32>]> = (0..channels).map(|ch| input.row(ch, bin)).collect();
        let mut estimate: Vec<Complex<f32>> = observed.concat();

        let mut power = InversePowerEstimator::new(input, bin, self.opts.psd_context);
        let mut weights = vec![0.0f32; frames];
        let mut wls = WeightedLeastSquares::new(channels, self.opts.filter_len);
        let mut filter = PredictionFilter::zeros(channels, self.opts.filter_len);
        let mut solver = new_solver(self.opts.solver);

        for _ in 0..self.opts.num_iter {
            power.estimate(&estimate, &mut weights);

            wls.reset();
            wls.accumulate_stack(&stack, &observed, &weights);
            wls.regularize(self.opts.diagonal_loading, self.opts.normal_scale);
            wls.solve_into(solver.as_mut(), &mut filter);

            for t in 0..frames {
                for (ch, obs) in observed.iter().enumerate() {
                    estimate[ch * frames + t] = obs[t] - filter.predict(&stack, t, ch);
                }
            }
        }

        BinResult { bin, rows: estimate }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::options::SolverKind;

    const FS: u32 = 16000;

    fn opts(channels: usize, fft_len: usize) -> GwpeOptions {
        GwpeOptions {
            channels,
            fft_len,
            sample_rate: FS,
            lower_freq_hz: 0.0,
            start_freq_hz: 0.0,
            upper_freq_hz: FS as f32 / 2.0,
            parallel: false,
            ..Default::default()
        }
    }

    // Deterministic pseudo-random spectrogram (LCG).
    fn noise(channels: usize, bins: usize, frames: usize, seed: u32) -> Spectrogram {
        let mut state = seed;
        let mut next = move || {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0
        };
        let mut spec = Spectrogram::zeros(channels, bins, frames);
        for ch in 0..channels {
            for b in 0..bins {
                for t in 0..frames {
                    let v = Complex::new(next() * 20.0, next() * 20.0);
                    spec.set(ch, b, t, v);
                }
            }
        }
        spec
    }

    #[test]
    fn test_low_band_is_zeroed() {
        let o = GwpeOptions {
            lower_freq_hz: 1000.0,
            start_freq_hz: 500.0,
            filter_len: 3,
            ..opts(2, 64)
        };
        let engine = GeneralizedWpe::new(o).unwrap();
        assert_eq!(engine.lower_bin(), 4);

        let input = noise(2, 33, 30, 7);
        let output = engine.process(&input).unwrap();
        for ch in 0..2 {
            for bin in 0..4 {
                assert!(output.row(ch, bin).iter().all(|v| v.re == 0.0 && v.im == 0.0));
            }
            assert!(output.row(ch, 4).iter().any(|v| v.norm() > 0.0));
        }
    }

    #[test]
    fn test_shape_invariance() {
        for &(channels, frames, fft_len) in &[(1, 1, 16), (1, 40, 64), (2, 17, 32), (3, 9, 8)] {
            let engine = GeneralizedWpe::new(GwpeOptions {
                filter_len: 2,
                delta: 1,
                ..opts(channels, fft_len)
            })
            .unwrap();
            let input = noise(channels, fft_len / 2 + 1, frames, 3);
            let mut output = Spectrogram::zeros(1, 1, 1);
            engine.dereverb(&input, &mut output).unwrap();
            assert_eq!(output.shape(), input.shape());
            assert_eq!(output.channels(), channels);
            assert_eq!(output.frames(), frames);
        }
    }

    #[test]
    fn test_silence_stays_silent() {
        for solver in [SolverKind::Cholesky, SolverKind::Ldlt] {
            let engine = GeneralizedWpe::new(GwpeOptions {
                solver,
                ..opts(2, 32)
            })
            .unwrap();
            let input = Spectrogram::for_fft(2, 32, 25);
            let output = engine.process(&input).unwrap();
            assert!(output.as_slice().iter().all(|v| v.re == 0.0 && v.im == 0.0));
        }
    }

    #[test]
    fn test_rejects_mismatched_input() {
        let engine = GeneralizedWpe::new(opts(2, 32)).unwrap();
        let mut out = Spectrogram::zeros(1, 1, 1);
        assert_eq!(
            engine.dereverb(&Spectrogram::for_fft(1, 32, 10), &mut out),
            Err(DereverbError::ChannelMismatch { expected: 2, got: 1 })
        );
        assert_eq!(
            engine.dereverb(&Spectrogram::for_fft(2, 64, 10), &mut out),
            Err(DereverbError::BinMismatch { expected: 17, got: 33 })
        );
        assert_eq!(
            engine.dereverb(&Spectrogram::for_fft(2, 32, 0), &mut out),
            Err(DereverbError::NoFrames)
        );
    }

    #[test]
    fn test_too_few_frames_pass_through() {
        let engine = GeneralizedWpe::new(GwpeOptions {
            delta: 5,
            ..opts(2, 16)
        })
        .unwrap();
        let input = noise(2, 9, 5, 11);
        let output = engine.process(&input).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_extreme_json_options_do_not_panic() {
        let input = noise(2, 17, 12, 21);

        let wide: GwpeOptions =
            serde_json::from_str(r#"{ "psd_context": 18446744073709551615 }"#).unwrap();
        let engine = GeneralizedWpe::new(GwpeOptions {
            psd_context: wide.psd_context,
            ..opts(2, 32)
        })
        .unwrap();
        let output = engine.process(&input).unwrap();
        assert!(output.as_slice().iter().all(|v| v.re.is_finite() && v.im.is_finite()));

        let far: GwpeOptions =
            serde_json::from_str(r#"{ "delta": 18446744073709551615, "filter_len": 2 }"#).unwrap();
        let engine = GeneralizedWpe::new(GwpeOptions {
            delta: far.delta,
            filter_len: far.filter_len,
            ..opts(2, 32)
        })
        .unwrap();
        assert_eq!(engine.process(&input).unwrap(), input);

        let long = GwpeOptions {
            filter_len: usize::MAX / 2,
            ..opts(2, 32)
        };
        assert!(matches!(
            GeneralizedWpe::new(long),
            Err(ConfigError::FilterTooLong { .. })
        ));
    }

    #[test]
    fn test_lower_above_upper_zeroes_processed_bins() {
        let engine = GeneralizedWpe::new(GwpeOptions {
            lower_freq_hz: 6000.0,
            start_freq_hz: 1000.0,
            upper_freq_hz: 4000.0,
            filter_len: 2,
            ..opts(1, 32)
        })
        .unwrap();
        assert_eq!((engine.lower_bin(), engine.upper_bin()), (12, 8));
        let input = noise(1, 17, 10, 4);
        let output = engine.process(&input).unwrap();
        for bin in 0..12 {
            assert!(output.row(0, bin).iter().all(|v| v.re == 0.0 && v.im == 0.0));
        }
        assert_eq!(output.row(0, 12), input.row(0, 12));
    }

    // K = 1, delta = 0: the only regressor is the frame itself, so
    // g = S / (S * (1 + loading)) for any weights and the residual is
    // x * loading / (1 + loading).
    #[test]
    fn test_instantaneous_scalar_regression() {
        let engine = GeneralizedWpe::new(GwpeOptions {
            filter_len: 1,
            delta: 0,
            ..opts(1, 2)
        })
        .unwrap();
        assert_eq!((engine.start_bin(), engine.upper_bin()), (0, 1));

        let mut input = Spectrogram::for_fft(1, 2, 8);
        let mut x = Complex::new(3.0f32, 0.0);
        for t in 0..8 {
            input.set(0, 0, t, x);
            input.set(0, 1, t, Complex::new(t as f32, 1.0));
            x = x * Complex::new(0.6, 0.4) + Complex::new(0.5, 0.0);
        }

        let output = engine.process(&input).unwrap();
        let ratio = 1e-4 / (1.0 + 1e-4);
        for t in 0..8 {
            let expected = input.get(0, 0, t) * ratio;
            let got = output.get(0, 0, t);
            assert!((got - expected).norm() < 0.05 * expected.norm(), "frame {t}");
        }
        // Nyquist bin lies outside the processed range
        assert_eq!(output.row(0, 1), input.row(0, 1));
    }

    // K = 1, delta = 1, one iteration, psd_context = 0: closed form
    // g = Σ w x(t-1) conj(x(t)) / ((1 + loading) Σ w |x(t-1)|^2), w = 1 / (|x(t)|^2 + 1)
    #[test]
    fn test_delayed_scalar_regression() {
        let engine = GeneralizedWpe::new(GwpeOptions {
            filter_len: 1,
            delta: 1,
            num_iter: 1,
            psd_context: 0,
            ..opts(1, 2)
        })
        .unwrap();

        let innovations = [1.0, 0.0, 0.3, 0.0, -0.2, 0.0, 0.0, 0.1];
        let a = Complex::new(0.7f64, 0.2);
        let mut xs = Vec::new();
        let mut prev = Complex::new(0.0f64, 0.0);
        for &e in &innovations {
            prev = prev * a + Complex::new(e, 0.0);
            xs.push(prev);
        }

        let mut input = Spectrogram::for_fft(1, 2, 8);
        for (t, x) in xs.iter().enumerate() {
            input.set(0, 0, t, Complex::new(x.re as f32, x.im as f32));
        }

        let mut num = Complex::new(0.0f64, 0.0);
        let mut den = 0.0f64;
        for t in 1..8 {
            let w = 1.0 / (xs[t].norm_sqr() + 1.0);
            num += xs[t - 1] * xs[t].conj() * w;
            den += xs[t - 1].norm_sqr() * w;
        }
        let g = num / (den * (1.0 + 1e-4));

        let output = engine.process(&input).unwrap();
        for t in 0..8 {
            let predicted = if t == 0 {
                Complex::new(0.0, 0.0)
            } else {
                g.conj() * xs[t - 1]
            };
            let expected = xs[t] - predicted;
            let got = output.get(0, 0, t);
            assert!((got.re as f64 - expected.re).abs() < 1e-4, "frame {t}");
            assert!((got.im as f64 - expected.im).abs() < 1e-4, "frame {t}");
        }
    }

    #[test]
    fn test_bins_are_independent() {
        let base = GwpeOptions {
            filter_len: 3,
            delta: 1,
            num_iter: 2,
            ..opts(2, 32)
        };
        let input = noise(2, 17, 20, 42);
        let full = GeneralizedWpe::new(base.clone()).unwrap().process(&input).unwrap();

        // bin width 500 Hz
        let single = GeneralizedWpe::new(GwpeOptions {
            start_freq_hz: 3500.0,
            upper_freq_hz: 4000.0,
            ..base
        })
        .unwrap();
        assert_eq!((single.start_bin(), single.upper_bin()), (7, 8));
        let only = single.process(&input).unwrap();

        for ch in 0..2 {
            assert_eq!(only.row(ch, 7), full.row(ch, 7));
            assert_ne!(only.row(ch, 7), input.row(ch, 7));
        }
    }

    #[test]
    fn test_deterministic() {
        let engine = GeneralizedWpe::new(GwpeOptions {
            filter_len: 4,
            delta: 2,
            ..opts(2, 32)
        })
        .unwrap();
        let input = noise(2, 17, 24, 5);
        let a = engine.process(&input).unwrap();
        let b = engine.process(&input).unwrap();
        assert_eq!(a, b);
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_parallel_matches_sequential() {
        let engine = GeneralizedWpe::new(GwpeOptions {
            filter_len: 4,
            delta: 2,
            ..opts(2, 64)
        })
        .unwrap();
        let input = noise(2, 33, 24, 9);
        let mut seq = Spectrogram::zeros(1, 1, 1);
        let mut par = Spectrogram::zeros(1, 1, 1);
        engine.dereverb_with(&input, &mut seq, &SequentialScheduler).unwrap();
        engine.dereverb_with(&input, &mut par, &RayonScheduler).unwrap();
        assert_eq!(seq, par);
    }

    #[test]
    fn test_cancels_synthetic_echo() {
        let engine = GeneralizedWpe::new(GwpeOptions {
            filter_len: 8,
            delta: 2,
            num_iter: 3,
            ..opts(2, 128)
        })
        .unwrap();

        let mut input = Spectrogram::for_fft(2, 128, 50);
        for bin in 0..65 {
            input.set(0, bin, 5, Complex::new(1.0, 0.0));
            input.set(1, bin, 8, Complex::new(0.5, 0.0));
        }

        let output = engine.process(&input).unwrap();
        for bin in [0, 1, 10, 40, 63] {
            let echo = output.get(1, bin, 8).norm();
            assert!(echo < 0.05, "bin {bin}: echo {echo}");
            // direct path has nothing to predict it
            assert!((output.get(0, bin, 5) - Complex::new(1.0, 0.0)).norm() < 1e-6);
        }
        // Nyquist bin is not processed
        assert!((output.get(1, 64, 8).norm() - 0.5).abs() < 1e-6);
    }
}
