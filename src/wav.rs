//! WAV file I/O.
//!
//! Samples are held planar and in 16-bit integer scale regardless of the file
//! format. The dereverb weighting (`1 / (power + 1)`) is tuned for that scale.

use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;

// Float WAV full scale mapped onto 16-bit.
const FLOAT_TO_I16: f32 = i16::MAX as f32;

#[derive(Debug, Clone, PartialEq)]
pub struct WavAudio {
    pub sample_rate: u32,
    /// One buffer per channel, 16-bit scale.
    pub channels: Vec<Vec<f32>>,
}

impl WavAudio {
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn num_samples(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }
}

pub fn read_wav(path: &Path) -> Result<WavAudio> {
    let reader = WavReader::open(path)
        .with_context(|| format!("failed to open WAV '{}'", path.display()))?;
    let spec = reader.spec();
    let num_channels = spec.channels as usize;
    if num_channels == 0 {
        bail!("WAV '{}' declares zero channels", path.display());
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Int => {
            let bits = spec.bits_per_sample as i32;
            let scale = 2f32.powi(16 - bits);
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<Vec<f32>, _>>()
        }
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| s.map(|v| v * FLOAT_TO_I16))
            .collect::<Result<Vec<f32>, _>>(),
    }
    .with_context(|| format!("failed to decode samples from '{}'", path.display()))?;

    let mut channels = vec![Vec::with_capacity(interleaved.len() / num_channels); num_channels];
    for frame in interleaved.chunks_exact(num_channels) {
        for (dst, &v) in channels.iter_mut().zip(frame) {
            dst.push(v);
        }
    }

    Ok(WavAudio {
        sample_rate: spec.sample_rate,
        channels,
    })
}

/// Writes 16-bit PCM, rounding and clamping each sample.
pub fn write_wav(path: &Path, audio: &WavAudio) -> Result<()> {
    let spec = WavSpec {
        channels: audio.num_channels() as u16,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("failed to create WAV '{}'", path.display()))?;

    for i in 0..audio.num_samples() {
        for ch in &audio.channels {
            let v = ch[i].round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            writer.write_sample(v)?;
        }
    }
    writer
        .finalize()
        .with_context(|| format!("failed to finalize WAV '{}'", path.display()))?;
    Ok(())
}
