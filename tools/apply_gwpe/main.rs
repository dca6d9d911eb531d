use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use log::info;
use std::path::PathBuf;
use vxdereverb::pipeline::{dereverb_audio, default_output_path, DereverbSettings};
use vxdereverb::presets::{overlay_json, PresetManager, DEFAULT_PRESET};
use vxdereverb::wav::{read_wav, write_wav};

#[derive(Parser)]
#[command(name = "apply-gwpe")]
#[command(about = "Dereverberate a WAV recording with generalized WPE", long_about = None)]
struct Cli {
    /// Normalize the output peak to max(input peak, 15000)
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    out_norm: bool,
    /// Lowest frequency (Hz) that is dereverberated
    #[arg(long, default_value_t = 0.0)]
    start_freq: f32,
    /// Named option preset
    #[arg(long, default_value = DEFAULT_PRESET)]
    preset: String,
    /// JSON file with option overrides, applied after the preset
    #[arg(long)]
    config: Option<PathBuf>,
    /// Process frequency bins on the calling thread only
    #[arg(long)]
    sequential: bool,
    /// List the available presets and exit
    #[arg(long)]
    list_presets: bool,
    wav_in: Option<PathBuf>,
    wav_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let presets = PresetManager::new();

    if cli.list_presets {
        for name in presets.names() {
            let desc = presets
                .get_preset_values(name)
                .map(|v| v.description.as_str())
                .unwrap_or_default();
            println!("{name:<12} {desc}");
        }
        return Ok(());
    }

    let input = cli
        .wav_in
        .context("missing input WAV (usage: apply-gwpe [options] <wav-in> [<wav-out>])")?;
    let output = cli.wav_out.unwrap_or_else(|| default_output_path(&input));

    let mut settings = DereverbSettings {
        normalize: cli.out_norm,
        ..Default::default()
    };
    presets.apply(&cli.preset, &mut settings.options)?;
    if let Some(path) = &cli.config {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config '{}'", path.display()))?;
        settings.options = overlay_json(&settings.options, &json)
            .with_context(|| format!("invalid config '{}'", path.display()))?;
    }
    settings.options.start_freq_hz = cli.start_freq;
    if cli.sequential {
        settings.options.parallel = false;
    }

    let audio = read_wav(&input)?;
    info!(
        "read '{}': {} ch, {} Hz, {} samples",
        input.display(),
        audio.num_channels(),
        audio.sample_rate,
        audio.num_samples()
    );
    let out = dereverb_audio(&audio, &settings)
        .with_context(|| format!("failed to dereverberate '{}'", input.display()))?;
    write_wav(&output, &out)?;
    info!("wrote '{}'", output.display());
    Ok(())
}
