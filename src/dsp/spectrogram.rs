//! Multi-channel complex spectrogram.
//!
//! One contiguous buffer, logically indexed by (channel, bin, frame). Rows are
//! `channel * num_bins + bin` and each row holds every frame of that channel/bin,
//! so per-bin processing walks contiguous memory.

use rustfft::num_complex::Complex;

#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    channels: usize,
    num_bins: usize,
    frames: usize,
    data: Vec<Complex<f32>>,
}

impl Spectrogram {
    pub fn zeros(channels: usize, num_bins: usize, frames: usize) -> Self {
        Self {
            channels,
            num_bins,
            frames,
            data: vec![Complex::new(0.0, 0.0); channels * num_bins * frames],
        }
    }

    /// Zeroed spectrogram sized for an FFT of `fft_len` (`fft_len / 2 + 1` bins).
    pub fn for_fft(channels: usize, fft_len: usize, frames: usize) -> Self {
        Self::zeros(channels, fft_len / 2 + 1, frames)
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// `(rows, cols)` of the physical layout.
    pub fn shape(&self) -> (usize, usize) {
        (self.channels * self.num_bins, self.frames)
    }

    #[inline]
    fn row_index(&self, channel: usize, bin: usize) -> usize {
        debug_assert!(channel < self.channels && bin < self.num_bins);
        channel * self.num_bins + bin
    }

    #[inline]
    pub fn get(&self, channel: usize, bin: usize, frame: usize) -> Complex<f32> {
        self.row(channel, bin)[frame]
    }

    #[inline]
    pub fn set(&mut self, channel: usize, bin: usize, frame: usize, value: Complex<f32>) {
        self.row_mut(channel, bin)[frame] = value;
    }

    /// All frames of one channel/bin.
    pub fn row(&self, channel: usize, bin: usize) -> &[Complex<f32>] {
        let start = self.row_index(channel, bin) * self.frames;
        &self.data[start..start + self.frames]
    }

    pub fn row_mut(&mut self, channel: usize, bin: usize) -> &mut [Complex<f32>] {
        let start = self.row_index(channel, bin) * self.frames;
        &mut self.data[start..start + self.frames]
    }

    pub fn as_slice(&self) -> &[Complex<f32>] {
        &self.data
    }

    /// Reallocates to `other`'s shape if it differs. Contents are unspecified afterwards.
    pub fn resize_like(&mut self, other: &Spectrogram) {
        if self.shape() != other.shape() || self.channels != other.channels {
            *self = Self::zeros(other.channels, other.num_bins, other.frames);
        }
    }

    pub fn copy_from(&mut self, other: &Spectrogram) {
        self.resize_like(other);
        self.data.copy_from_slice(&other.data);
    }

    /// Zeroes bins `[0, upto)` of every channel.
    pub fn zero_low_bins(&mut self, upto: usize) {
        let upto = upto.min(self.num_bins);
        for ch in 0..self.channels {
            for bin in 0..upto {
                self.row_mut(ch, bin).fill(Complex::new(0.0, 0.0));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_layout() {
        let mut spec = Spectrogram::for_fft(2, 8, 3);
        assert_eq!(spec.num_bins(), 5);
        assert_eq!(spec.shape(), (10, 3));

        spec.set(1, 2, 1, Complex::new(4.0, -1.0));
        // channel 1 starts at row num_bins
        let flat = (5 + 2) * 3 + 1;
        assert_eq!(spec.as_slice()[flat], Complex::new(4.0, -1.0));
        assert_eq!(spec.row(1, 2)[1], Complex::new(4.0, -1.0));
    }

    #[test]
    fn test_zero_low_bins() {
        let mut spec = Spectrogram::zeros(2, 4, 2);
        for ch in 0..2 {
            for bin in 0..4 {
                spec.row_mut(ch, bin).fill(Complex::new(1.0, 1.0));
            }
        }
        spec.zero_low_bins(2);
        for ch in 0..2 {
            assert!(spec.row(ch, 0).iter().all(|v| v.norm() == 0.0));
            assert!(spec.row(ch, 1).iter().all(|v| v.norm() == 0.0));
            assert!(spec.row(ch, 2).iter().all(|v| v.norm() > 0.0));
        }
    }
}
