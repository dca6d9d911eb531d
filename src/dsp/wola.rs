//! WOLA Analysis / Synthesis (Weighted Overlap-Add)
//!
//! Offline short-time transform that feeds the dereverberation engine.
//! Frames of `frame_len` samples, advanced by `frame_shift`, are windowed with a
//! sqrt-Hann window, zero-padded to `fft_len` and transformed. Synthesis applies
//! the same window again and divides the overlap-added output by the summed
//! squared window, so an unmodified spectrogram reconstructs its input.
//!
//! # Frame Count
//! `frames = (samples - frame_len + frame_shift) / frame_shift`; trailing
//! samples that do not fill a frame are not analysed. `used_samples` reports
//! how many input samples the frames cover.

use super::spectrogram::Spectrogram;
use super::utils::{make_sqrt_hann_window, next_pow2};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;
use thiserror::Error;

// Default hop (seconds).
const FRAME_SHIFT_SEC: f32 = 0.008;
// Default frame length, four hops (seconds).
const FRAME_LEN_SEC: f32 = FRAME_SHIFT_SEC * 4.0;
// OLA normalization floor.
// Increasing: more conservative to avoid divide-by-zero; decreasing: closer to raw.
const OLA_NORM_EPS: f32 = 1e-6;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WolaError {
    #[error("invalid WOLA framing: shift {shift}, frame {frame_len}, fft {fft_len}")]
    InvalidFraming {
        shift: usize,
        frame_len: usize,
        fft_len: usize,
    },
    #[error("expected {expected} channels, got {got}")]
    ChannelMismatch { expected: usize, got: usize },
    #[error("channel {channel} has {got} samples, channel 0 has {expected}")]
    RaggedChannels {
        channel: usize,
        expected: usize,
        got: usize,
    },
    #[error("spectrogram has {got} bins, FFT length {fft_len} implies {expected}")]
    BinMismatch {
        fft_len: usize,
        expected: usize,
        got: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WolaOptions {
    pub channels: usize,
    pub sample_rate: u32,
    pub frame_shift: usize,
    pub frame_len: usize,
    pub fft_len: usize,
}

impl WolaOptions {
    /// 8 ms hop, 32 ms frame, FFT length rounded up to a power of two.
    pub fn for_sample_rate(channels: usize, sample_rate: u32) -> Self {
        let frame_shift = (FRAME_SHIFT_SEC * sample_rate as f32) as usize;
        let frame_len = (FRAME_LEN_SEC * sample_rate as f32) as usize;
        Self {
            channels,
            sample_rate,
            frame_shift,
            frame_len,
            fft_len: next_pow2(frame_len),
        }
    }

    pub fn num_bins(&self) -> usize {
        self.fft_len / 2 + 1
    }

    pub fn num_frames(&self, samples: usize) -> usize {
        if samples < self.frame_len {
            return 0;
        }
        (samples - self.frame_len + self.frame_shift) / self.frame_shift
    }

    /// Samples covered by `frames` frames.
    pub fn used_samples(&self, frames: usize) -> usize {
        if frames == 0 {
            return 0;
        }
        frames * self.frame_shift + self.frame_len - self.frame_shift
    }

    fn validate(&self) -> Result<(), WolaError> {
        if self.channels == 0
            || self.frame_shift == 0
            || self.frame_len < self.frame_shift
            || self.fft_len < self.frame_len
        {
            return Err(WolaError::InvalidFraming {
                shift: self.frame_shift,
                frame_len: self.frame_len,
                fft_len: self.fft_len,
            });
        }
        Ok(())
    }
}

pub struct Wola {
    opts: WolaOptions,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    fft_scratch: Vec<Complex<f32>>,
    ifft_scratch: Vec<Complex<f32>>,
}

impl Wola {
    pub fn new(opts: WolaOptions) -> Result<Self, WolaError> {
        opts.validate()?;

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(opts.fft_len);
        let ifft = planner.plan_fft_inverse(opts.fft_len);

        let fft_scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];
        let ifft_scratch = vec![Complex::default(); ifft.get_inplace_scratch_len()];

        Ok(Self {
            opts,
            fft,
            ifft,
            window: make_sqrt_hann_window(opts.frame_len),
            scratch: vec![Complex::new(0.0, 0.0); opts.fft_len],
            fft_scratch,
            ifft_scratch,
        })
    }

    pub fn options(&self) -> &WolaOptions {
        &self.opts
    }

    /// Planar PCM (one `Vec` per channel) to spectrogram.
    pub fn decompose(&mut self, pcm: &[Vec<f32>]) -> Result<Spectrogram, WolaError> {
        if pcm.len() != self.opts.channels {
            return Err(WolaError::ChannelMismatch {
                expected: self.opts.channels,
                got: pcm.len(),
            });
        }
        let samples = pcm[0].len();
        if let Some((channel, ch)) = pcm.iter().enumerate().find(|(_, ch)| ch.len() != samples) {
            return Err(WolaError::RaggedChannels {
                channel,
                expected: samples,
                got: ch.len(),
            });
        }

        let frames = self.opts.num_frames(samples);
        let num_bins = self.opts.num_bins();
        let frame_len = self.opts.frame_len;
        let mut spec = Spectrogram::zeros(self.opts.channels, num_bins, frames);

        for (ch, signal) in pcm.iter().enumerate() {
            for t in 0..frames {
                let offset = t * self.opts.frame_shift;
                let frame = &signal[offset..offset + frame_len];

                // 1. Window + zero pad
                for (dst, (&x, &w)) in self.scratch.iter_mut().zip(frame.iter().zip(&self.window)) {
                    *dst = Complex::new(x * w, 0.0);
                }
                self.scratch[frame_len..].fill(Complex::new(0.0, 0.0));

                // 2. FFT
                self.fft
                    .process_with_scratch(&mut self.scratch, &mut self.fft_scratch);

                for bin in 0..num_bins {
                    spec.set(ch, bin, t, self.scratch[bin]);
                }
            }
        }
        Ok(spec)
    }

    /// Spectrogram to planar PCM of `used_samples(frames)` samples per channel.
    pub fn reconstruct(&mut self, spec: &Spectrogram) -> Result<Vec<Vec<f32>>, WolaError> {
        if spec.channels() != self.opts.channels {
            return Err(WolaError::ChannelMismatch {
                expected: self.opts.channels,
                got: spec.channels(),
            });
        }
        let num_bins = self.opts.num_bins();
        if spec.num_bins() != num_bins {
            return Err(WolaError::BinMismatch {
                fft_len: self.opts.fft_len,
                expected: num_bins,
                got: spec.num_bins(),
            });
        }

        let n = self.opts.fft_len;
        let nyq = n / 2;
        let frames = spec.frames();
        let len = self.opts.used_samples(frames);
        let norm = 1.0 / n as f32;
        let mut ola_norm = vec![0.0f32; len];
        let mut out = Vec::with_capacity(self.opts.channels);

        for ch in 0..self.opts.channels {
            let mut overlap = vec![0.0f32; len];
            ola_norm.fill(0.0);

            for t in 0..frames {
                for bin in 0..num_bins {
                    self.scratch[bin] = spec.get(ch, bin, t);
                }
                // Hermite
                self.scratch[0].im = 0.0;
                if n % 2 == 0 {
                    self.scratch[nyq].im = 0.0;
                }
                for k in (nyq + 1)..n {
                    self.scratch[k] = self.scratch[n - k].conj();
                }

                self.ifft
                    .process_with_scratch(&mut self.scratch, &mut self.ifft_scratch);

                let offset = t * self.opts.frame_shift;
                for (i, &w) in self.window.iter().enumerate() {
                    overlap[offset + i] += self.scratch[i].re * norm * w;
                    ola_norm[offset + i] += w * w;
                }
            }

            for (y, &d) in overlap.iter_mut().zip(&ola_norm) {
                *y /= d.max(OLA_NORM_EPS);
            }
            out.push(overlap);
        }
        Ok(out)
    }
}
