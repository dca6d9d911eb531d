//! Delayed-Frame Stacks (Prediction Context)
//!
//! For every processed bin, frame `t` gets a column of `channels * filter_len`
//! values: block `k` holds each channel's input at frame `t - delta - k`, zero
//! where that index falls before the first frame.
//!
//! All bins share one arena allocation. A bin is addressed by its offset into
//! the arena and handed out as a borrowed [`StackView`], so columns and blocks
//! are zero-copy slices.

use super::spectrogram::Spectrogram;
use rustfft::num_complex::Complex;
use std::ops::Range;

pub struct FrameStacks {
    channels: usize,
    filter_len: usize,
    frames: usize,
    bins: Range<usize>,
    data: Vec<Complex<f32>>,
}

impl FrameStacks {
    /// Builds stacks for `bins` from the (immutable) input spectrogram.
    pub fn build(input: &Spectrogram, bins: Range<usize>, delta: usize, filter_len: usize) -> Self {
        let channels = input.channels();
        let frames = input.frames();
        let dim = channels * filter_len;
        let bin_stride = dim * frames;
        let mut data = vec![Complex::new(0.0, 0.0); bins.len() * bin_stride];

        for (slot, bin) in bins.clone().enumerate() {
            let stack = &mut data[slot * bin_stride..(slot + 1) * bin_stride];
            for ch in 0..channels {
                let row = input.row(ch, bin);
                for k in 0..filter_len {
                    // lag >= frames leaves the block zero
                    let lag = delta.saturating_add(k);
                    for t in lag..frames {
                        stack[t * dim + k * channels + ch] = row[t - lag];
                    }
                }
            }
        }

        Self {
            channels,
            filter_len,
            frames,
            bins,
            data,
        }
    }

    fn dim(&self) -> usize {
        self.channels * self.filter_len
    }

    /// View of one bin's stack. Panics if `bin` was not built.
    pub fn bin(&self, bin: usize) -> StackView<'_> {
        assert!(self.bins.contains(&bin), "bin {bin} has no stack");
        let stride = self.dim() * self.frames;
        let start = (bin - self.bins.start) * stride;
        StackView {
            channels: self.channels,
            filter_len: self.filter_len,
            frames: self.frames,
            data: &self.data[start..start + stride],
        }
    }
}

#[derive(Clone, Copy)]
pub struct StackView<'a> {
    channels: usize,
    filter_len: usize,
    frames: usize,
    data: &'a [Complex<f32>],
}

impl<'a> StackView<'a> {
    #[inline]
    pub fn dim(&self) -> usize {
        self.channels * self.filter_len
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Full stacked vector for `frame`.
    #[inline]
    pub fn column(&self, frame: usize) -> &'a [Complex<f32>] {
        let dim = self.dim();
        &self.data[frame * dim..(frame + 1) * dim]
    }

    /// Per-channel values of block `k` (frame `frame - delta - k`).
    #[inline]
    pub fn block(&self, frame: usize, k: usize) -> &'a [Complex<f32>] {
        let start = frame * self.dim() + k * self.channels;
        &self.data[start..start + self.channels]
    }
}
