//! GWPE Options (Engine Configuration)
//!
//! Immutable configuration for [`GeneralizedWpe`](super::gwpe::GeneralizedWpe).
//! Options are plain values that deserialize from partial JSON (missing fields
//! fall back to the defaults below) and are validated exactly once, when the
//! engine is built. Invalid values are rejected, never clamped.
//!
//! # Bin Layout
//! Frequencies map to bins as `floor(hz * fft_len / sample_rate)`:
//! - `lower_bin`: everything below is zeroed in the output.
//! - `start_bin`..`upper_bin`: the range that is actually dereverberated.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Diagonal loading, as a fraction of the correlation matrix trace.
/// Must not change without regenerating reference vectors.
pub const DIAGONAL_LOADING: f32 = 1e-4;

/// Global damping applied to both sides of the normal equations.
/// Must not change without regenerating reference vectors.
pub const NORMAL_EQUATION_SCALE: f32 = 1e-3;

// =============================================================================
// Errors
// =============================================================================

/// Rejected engine configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("channel count must be at least 1")]
    NoChannels,
    #[error("filter length must be at least 1")]
    EmptyFilter,
    #[error("{channels} channels x {filter_len} taps is too large for the correlation matrix")]
    FilterTooLong { channels: usize, filter_len: usize },
    #[error("sample rate must be positive")]
    ZeroSampleRate,
    #[error("FFT length must be at least 2, got {0}")]
    FftTooShort(usize),
    #[error("{name} = {hz} Hz is outside [0, {nyquist}] Hz")]
    FrequencyOutOfRange {
        name: &'static str,
        hz: f32,
        nyquist: f32,
    },
    #[error("{name} = {hz} Hz is above the upper frequency {upper} Hz")]
    FrequencyAboveUpper {
        name: &'static str,
        hz: f32,
        upper: f32,
    },
    #[error("{name} must be finite and positive, got {value}")]
    InvalidRegularization { name: &'static str, value: f32 },
}

// =============================================================================
// Options
// =============================================================================

/// Factorization used for the Hermitian normal equations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverKind {
    /// LLᴴ; a failed factorization yields a zero (pass-through) filter.
    #[default]
    Cholesky,
    /// LDLᴴ with zero-pivot skipping; degrades to a pseudo-solution.
    Ldlt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GwpeOptions {
    pub channels: usize,
    /// Prediction delay Δ in frames.
    pub delta: usize,
    /// Filter length K in frames.
    pub filter_len: usize,
    pub num_iter: usize,
    pub sample_rate: u32,
    pub fft_len: usize,
    pub lower_freq_hz: f32,
    pub upper_freq_hz: f32,
    pub start_freq_hz: f32,
    /// Half-width (frames and bins) of the power estimation neighborhood.
    pub psd_context: usize,
    pub diagonal_loading: f32,
    pub normal_scale: f32,
    pub solver: SolverKind,
    /// Distribute bins over the rayon pool (ignored without the `parallel` feature).
    pub parallel: bool,
}

impl Default for GwpeOptions {
    fn default() -> Self {
        Self {
            channels: 1,
            delta: 3,
            filter_len: 10,
            num_iter: 3,
            sample_rate: 16000,
            fft_len: 1024,
            lower_freq_hz: 100.0,
            upper_freq_hz: 7900.0,
            start_freq_hz: 100.0,
            psd_context: 2,
            diagonal_loading: DIAGONAL_LOADING,
            normal_scale: NORMAL_EQUATION_SCALE,
            solver: SolverKind::default(),
            parallel: true,
        }
    }
}

/// Bin indices derived from validated options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinLayout {
    pub num_bins: usize,
    pub lower_bin: usize,
    pub start_bin: usize,
    pub upper_bin: usize,
}

impl GwpeOptions {
    /// Validates the options and derives the bin layout.
    pub fn validate(&self) -> Result<BinLayout, ConfigError> {
        if self.channels == 0 {
            return Err(ConfigError::NoChannels);
        }
        if self.filter_len == 0 {
            return Err(ConfigError::EmptyFilter);
        }
        if correlation_bytes(self.channels, self.filter_len).is_none() {
            return Err(ConfigError::FilterTooLong {
                channels: self.channels,
                filter_len: self.filter_len,
            });
        }
        if self.sample_rate == 0 {
            return Err(ConfigError::ZeroSampleRate);
        }
        if self.fft_len < 2 {
            return Err(ConfigError::FftTooShort(self.fft_len));
        }

        let nyquist = self.sample_rate as f32 / 2.0;
        for (name, hz) in [
            ("lower_freq_hz", self.lower_freq_hz),
            ("upper_freq_hz", self.upper_freq_hz),
            ("start_freq_hz", self.start_freq_hz),
        ] {
            if !hz.is_finite() || hz < 0.0 || hz > nyquist {
                return Err(ConfigError::FrequencyOutOfRange { name, hz, nyquist });
            }
        }
        // lower may exceed upper: zeroing is independent of the processed range
        if self.start_freq_hz > self.upper_freq_hz {
            return Err(ConfigError::FrequencyAboveUpper {
                name: "start_freq_hz",
                hz: self.start_freq_hz,
                upper: self.upper_freq_hz,
            });
        }
        for (name, value) in [
            ("diagonal_loading", self.diagonal_loading),
            ("normal_scale", self.normal_scale),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidRegularization { name, value });
            }
        }

        Ok(BinLayout {
            num_bins: self.fft_len / 2 + 1,
            lower_bin: self.hz_to_bin(self.lower_freq_hz),
            start_bin: self.hz_to_bin(self.start_freq_hz),
            upper_bin: self.hz_to_bin(self.upper_freq_hz),
        })
    }

    /// `floor(hz * fft_len / sample_rate)`
    pub fn hz_to_bin(&self, hz: f32) -> usize {
        (hz as f64 * self.fft_len as f64 / self.sample_rate as f64).floor() as usize
    }
}

/// Size of the `dim x dim` correlation matrix, `None` if it cannot be allocated.
fn correlation_bytes(channels: usize, filter_len: usize) -> Option<usize> {
    let dim = channels.checked_mul(filter_len)?;
    let bytes = dim
        .checked_mul(dim)?
        .checked_mul(std::mem::size_of::<rustfft::num_complex::Complex<f32>>())?;
    (bytes <= isize::MAX as usize).then_some(bytes)
}
