//! Offline tone export
//!
//! Renders a tone without touching any audio device and writes it as WAV or
//! MP3. Useful for scripting and for checking the output bit-for-bit.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tonegen_audio::{OfflineRenderer, RenderProgress, ToneSettings};
use tonegen_core::{OutputFormat, RenderRequest, ToneConfiguration, Waveform};
use tonegen_encode::AudioFileEncoder;

/// Offline tone renderer
#[derive(Parser, Debug)]
#[command(name = "tonegen-render")]
#[command(about = "Render a tone to a WAV or MP3 file", long_about = None)]
struct Args {
    /// Output file; defaults to the suggested name in the current directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Take the tone, duration and format from a settings file (.ron)
    #[arg(
        short,
        long,
        conflicts_with_all = ["frequency", "waveform", "volume", "beat", "minutes", "format"]
    )]
    settings: Option<PathBuf>,

    /// Base frequency (Hz)
    #[arg(short, long, default_value_t = tonegen_core::tone::DEFAULT_FREQUENCY_HZ)]
    frequency: f64,

    /// Waveform: sine, square, sawtooth or triangle
    #[arg(short, long, default_value_t = Waveform::Sine)]
    waveform: Waveform,

    /// Volume (0.0-1.0)
    #[arg(short, long, default_value_t = tonegen_core::tone::DEFAULT_VOLUME)]
    volume: f32,

    /// Binaural beat (Hz); enables binaural mode
    #[arg(short, long)]
    beat: Option<f64>,

    /// Duration (minutes)
    #[arg(short, long, default_value_t = tonegen_audio::control::DEFAULT_RENDER_MINUTES)]
    minutes: f64,

    /// Container: wav or mp3
    #[arg(long, default_value_t = OutputFormat::Wav)]
    format: OutputFormat,
}

impl Args {
    fn request(&self) -> Result<RenderRequest> {
        if let Some(path) = &self.settings {
            let settings = ToneSettings::load(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?;
            return Ok(RenderRequest::from_minutes(
                settings.tone,
                settings.render_minutes,
                settings.render_format,
            ));
        }

        let mut config = ToneConfiguration::new(self.frequency, self.waveform, self.volume);
        if let Some(beat) = self.beat {
            config = config.with_binaural_beat(beat);
        }
        Ok(RenderRequest::from_minutes(config, self.minutes, self.format))
    }
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tonegen=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let request = args.request()?;

    println!("Rendering tone:");
    println!("  Frequency: {:.2} Hz", request.config.base_frequency_hz);
    if request.config.binaural.enabled {
        println!("  Binaural:  +{} Hz", request.config.binaural.beat_hz);
    }
    println!("  Waveform:  {}", request.config.waveform);
    println!("  Volume:    {:.2}", request.config.volume);
    println!("  Duration:  {} s", request.duration_seconds);
    println!("  Format:    {}", request.output_format);

    let (progress_tx, progress_rx) = crossbeam_channel::unbounded::<RenderProgress>();
    let task = OfflineRenderer::new()
        .spawn_export(request, AudioFileEncoder::new(), progress_tx)
        .context("Failed to start export")?;

    for progress in &progress_rx {
        print!("\r{:<24} {:>3.0}%", progress.phase.label(), progress.percent);
        std::io::stdout().flush()?;
    }
    println!();

    let file = task.wait().context("Export failed")?;
    let path = args.output.unwrap_or_else(|| PathBuf::from(&file.filename));

    std::fs::write(&path, &file.bytes)
        .with_context(|| format!("Failed to write output file: {}", path.display()))?;

    println!("Successfully wrote {} ({} bytes)", path.display(), file.bytes.len());
    Ok(())
}
