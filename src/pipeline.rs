//! File-level dereverberation: PCM -> WOLA -> GWPE -> WOLA -> gain.
//!
//! The per-file options (channels, sample rate, FFT length, upper frequency)
//! are derived from the recording; the rest comes from the preset/config.

use crate::dsp::utils::peak_abs;
use crate::dsp::wola::{Wola, WolaOptions};
use crate::dsp::{GeneralizedWpe, GwpeOptions};
use crate::wav::WavAudio;
use anyhow::{Context, Result};
use log::{info, warn};
use std::path::{Path, PathBuf};

// Peak reference floor for output normalization (16-bit scale).
const NORM_PEAK_FLOOR: f32 = 15000.0;

#[derive(Debug, Clone)]
pub struct DereverbSettings {
    /// Algorithm options. File-derived fields are overwritten per recording.
    pub options: GwpeOptions,
    /// Rescale so the output peak matches `max(input peak, 15000)`.
    pub normalize: bool,
}

impl Default for DereverbSettings {
    fn default() -> Self {
        Self {
            options: tool_defaults(),
            normalize: true,
        }
    }
}

/// Options the command-line tool runs with before any preset or config.
pub fn tool_defaults() -> GwpeOptions {
    GwpeOptions {
        num_iter: 3,
        lower_freq_hz: 50.0,
        start_freq_hz: 0.0,
        delta: 3,
        filter_len: 16,
        ..Default::default()
    }
}

/// Fills in the fields that depend on the recording.
pub fn options_for(audio: &WavAudio, wola: &WolaOptions, base: &GwpeOptions) -> GwpeOptions {
    GwpeOptions {
        channels: audio.num_channels(),
        sample_rate: audio.sample_rate,
        fft_len: wola.fft_len,
        upper_freq_hz: audio.sample_rate as f32 / 2.0,
        ..base.clone()
    }
}

pub fn dereverb_audio(audio: &WavAudio, settings: &DereverbSettings) -> Result<WavAudio> {
    let samples = audio.num_samples();
    if samples <= audio.sample_rate as usize {
        warn!(
            "{} samples at {} Hz is one second or less; passing through",
            samples, audio.sample_rate
        );
        return Ok(audio.clone());
    }

    let wola_opts = WolaOptions::for_sample_rate(audio.num_channels(), audio.sample_rate);
    let mut wola = Wola::new(wola_opts).context("failed to set up WOLA transform")?;
    let frames = wola_opts.num_frames(samples);
    let used = wola_opts.used_samples(frames);
    let input: Vec<Vec<f32>> = audio.channels.iter().map(|ch| ch[..used].to_vec()).collect();

    let opts = options_for(audio, &wola_opts, &settings.options);
    let engine = GeneralizedWpe::new(opts).context("invalid dereverb options")?;
    info!(
        "dereverberating {} ch, {} frames, fft {}, K {}, delta {}",
        audio.num_channels(),
        frames,
        wola_opts.fft_len,
        engine.options().filter_len,
        engine.options().delta
    );

    let in_spec = wola.decompose(&input)?;
    let out_spec = engine.process(&in_spec)?;
    let mut output = wola.reconstruct(&out_spec)?;

    if settings.normalize {
        let gain = normalization_gain(peak_abs(&input), peak_abs(&output));
        info!("output gain {:.3}", gain);
        for ch in output.iter_mut() {
            for v in ch.iter_mut() {
                *v *= gain;
            }
        }
    }

    Ok(WavAudio {
        sample_rate: audio.sample_rate,
        channels: output,
    })
}

/// `max(peak_in, 15000) / peak_out`; 1 when the output is silent.
pub fn normalization_gain(peak_in: f32, peak_out: f32) -> f32 {
    if peak_out <= 0.0 || !peak_out.is_finite() {
        warn!("output is silent; skipping normalization");
        return 1.0;
    }
    peak_in.max(NORM_PEAK_FLOOR) / peak_out
}

/// `in.wav` -> `in-gwpe.wav`.
pub fn default_output_path(input: &Path) -> PathBuf {
    let name = input.to_string_lossy();
    let stem = name
        .strip_suffix(".wav")
        .or_else(|| name.strip_suffix(".WAV"))
        .unwrap_or(&name);
    PathBuf::from(format!("{stem}-gwpe.wav"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_default_output_path() {
        assert_eq!(
            default_output_path(Path::new("/tmp/take1.wav")),
            PathBuf::from("/tmp/take1-gwpe.wav")
        );
        assert_eq!(
            default_output_path(Path::new("noext")),
            PathBuf::from("noext-gwpe.wav")
        );
    }

    #[test]
    fn test_normalization_gain() {
        assert!((normalization_gain(20000.0, 10000.0) - 2.0).abs() < 1e-6);
        // quiet input is referenced to the floor
        assert!((normalization_gain(3000.0, 7500.0) - 2.0).abs() < 1e-6);
        assert_eq!(normalization_gain(3000.0, 0.0), 1.0);
    }

    #[test]
    fn test_short_file_passes_through() {
        let audio = WavAudio {
            sample_rate: 16000,
            channels: vec![vec![100.0; 16000]],
        };
        let out = dereverb_audio(&audio, &DereverbSettings::default()).unwrap();
        assert_eq!(out, audio);
    }

    #[test]
    fn test_stereo_file_is_processed() {
        let fs = 8000;
        let n = fs * 2;
        let tone = |i: usize, f: f32| 6000.0 * (2.0 * PI * f * i as f32 / fs as f32).sin();
        let audio = WavAudio {
            sample_rate: fs as u32,
            channels: vec![
                (0..n).map(|i| tone(i, 300.0)).collect(),
                (0..n).map(|i| tone(i, 500.0)).collect(),
            ],
        };
        let mut settings = DereverbSettings::default();
        settings.options.filter_len = 4;
        let out = dereverb_audio(&audio, &settings).unwrap();

        let wola = WolaOptions::for_sample_rate(2, fs as u32);
        let used = wola.used_samples(wola.num_frames(n));
        assert_eq!(out.num_channels(), 2);
        assert_eq!(out.num_samples(), used);
        assert!(out.channels.iter().flatten().all(|v| v.is_finite()));
        // normalized to the input peak (above the 15000 floor is not reached)
        assert!((peak_abs(&out.channels) - NORM_PEAK_FLOOR).abs() < 1.0);
    }
}
