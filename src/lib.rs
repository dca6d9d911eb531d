//! Offline multi-channel speech dereverberation with generalized weighted
//! prediction error (GWPE) filtering.
//!
//! [`dsp::GeneralizedWpe`] works on STFT spectrograms; [`pipeline`] wraps it
//! with WOLA analysis/synthesis and output gain for whole WAV recordings.

pub mod dsp;
pub mod pipeline;
pub mod presets;
pub mod wav;

pub use dsp::{GeneralizedWpe, GwpeOptions, Spectrogram};
pub use pipeline::{dereverb_audio, default_output_path, DereverbSettings};
pub use wav::{read_wav, write_wav, WavAudio};
