//! tonegen - dual-tone and binaural beat generator
//!
//! Interactive player: reads one command per line from stdin and drives the
//! live session on the default output device.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tonegen_audio::{
    AudioConfig, CancelToken, CpalContext, RenderProgress, ToneController, ToneSettings,
};
use tonegen_core::tone::PRESETS;
use tonegen_core::{OutputFormat, Waveform};

/// Interactive tone player
#[derive(Parser, Debug)]
#[command(name = "tonegen")]
#[command(
    about = "Play dual tones and binaural beats on the default output device",
    long_about = None
)]
struct Args {
    /// Settings file (.ron) to load at startup and write with `save`
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Preferred sample rate (Hz); the device's own rate wins if it differs
    #[arg(long, default_value_t = 48000)]
    sample_rate: u32,

    /// Directory exported files are written to
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Start playing immediately
    #[arg(long)]
    play: bool,
}

const HELP: &str = "\
Commands:
  play | stop | toggle
  freq <hz>              base frequency, 0.01 to 20000
  preset [name]          jump to a preset frequency, or list them
  wave <name>            sine, square, sawtooth, triangle
  vol <0..1>             output volume
  binaural on|off        right channel runs <beat> Hz above the left
  beat <hz>              binaural beat offset
  timer <minutes>        auto-stop after this long, 0 disables
  export [minutes] [wav|mp3]
                         render in the background while you keep playing
  cancel                 abort the running export
  save [path]            write the current settings
  status | help | quit";

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tonegen=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    tracing::info!("Starting tonegen...");

    let audio_config = AudioConfig {
        sample_rate: args.sample_rate,
        ..AudioConfig::default()
    };
    tracing::info!("Audio config: {:?}", audio_config);

    let mut controller = ToneController::new(CpalContext::new(audio_config));

    if let Some(path) = &args.settings {
        if path.exists() {
            let settings = ToneSettings::load(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?;
            controller.apply_settings(&settings)?;
            println!("Loaded settings from {}", path.display());
        }
    }

    if args.play {
        controller.play().context("Failed to start playback")?;
    }

    println!("{HELP}");
    print_status(&controller);

    let mut export = None;
    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, rest)) = words.split_first() else {
            continue;
        };

        match run_command(&mut controller, &mut export, &args, command, rest) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(e) => println!("Error: {e:#}"),
        }
    }

    tracing::info!("tonegen shutting down");
    if let Some(export) = export.take() {
        export.cancel_and_join();
    }
    controller.stop();

    Ok(())
}

enum Flow {
    Continue,
    Quit,
}

fn run_command(
    controller: &mut ToneController<CpalContext>,
    export: &mut Option<BackgroundExport>,
    args: &Args,
    command: &str,
    rest: &[&str],
) -> Result<Flow> {
    match command {
        "play" => {
            controller.play()?;
            print_status(controller);
        }
        "stop" => {
            controller.stop();
            print_status(controller);
        }
        "toggle" | "t" => {
            controller.toggle()?;
            print_status(controller);
        }
        "freq" | "f" => {
            controller.set_frequency(parse_arg(rest, "frequency")?)?;
            println!("Frequency: {} Hz", controller.frequency_display());
        }
        "preset" | "p" => match rest.first() {
            Some(name) => {
                let preset = controller.select_preset(name)?;
                println!("Preset {}: {} Hz", preset.name, controller.frequency_display());
            }
            None => {
                for preset in PRESETS {
                    println!("  {:<10} {} Hz", preset.name, preset.frequency_hz);
                }
            }
        },
        "wave" | "w" => {
            let waveform: Waveform = arg(rest, "waveform")?.parse()?;
            controller.set_waveform(waveform)?;
            println!("Waveform: {waveform}");
        }
        "vol" | "v" => {
            controller.set_volume(parse_arg(rest, "volume")?)?;
            println!("Volume: {:.0}%", controller.config().volume * 100.0);
        }
        "binaural" | "b" => {
            let enabled = match arg(rest, "on|off")? {
                "on" => true,
                "off" => false,
                other => bail!("expected on or off, got '{other}'"),
            };
            controller.set_binaural(enabled)?;
            print_status(controller);
        }
        "beat" => {
            controller.set_beat(parse_arg(rest, "beat")?)?;
            println!("Beat: {} Hz", controller.config().binaural.beat_hz);
        }
        "timer" => {
            let minutes: f64 = parse_arg(rest, "minutes")?;
            controller.set_auto_stop_minutes(minutes)?;
            if minutes > 0.0 {
                println!("Auto-stop after {minutes} min");
            } else {
                println!("Auto-stop disabled");
            }
        }
        "export" | "e" => {
            if export.as_ref().is_some_and(|e| !e.is_finished()) {
                bail!("an export is already running, 'cancel' it first");
            }
            if let Some(minutes) = rest.first() {
                controller.set_render_minutes(minutes.parse().context("invalid minutes")?)?;
            }
            if let Some(format) = rest.get(1) {
                controller.set_render_format(format.parse::<OutputFormat>()?);
            }
            *export = Some(BackgroundExport::start(controller, &args.output_dir)?);
            println!("Exporting {} in the background", controller.export_filename());
        }
        "cancel" => match export.take() {
            Some(running) if !running.is_finished() => {
                running.cancel_and_join();
                println!("Export cancelled");
            }
            _ => println!("No export running"),
        },
        "save" => {
            let path = rest
                .first()
                .map(PathBuf::from)
                .or_else(|| args.settings.clone())
                .context("no settings path given (pass one or start with --settings)")?;
            controller
                .settings()
                .save(&path)
                .with_context(|| format!("Failed to save settings to {}", path.display()))?;
            println!("Saved settings to {}", path.display());
        }
        "status" | "s" => print_status(controller),
        "help" | "?" => println!("{HELP}"),
        "quit" | "q" | "exit" => return Ok(Flow::Quit),
        other => println!("Unknown command '{other}', try 'help'"),
    }
    Ok(Flow::Continue)
}

fn arg<'a>(rest: &[&'a str], what: &str) -> Result<&'a str> {
    rest.first().copied().with_context(|| format!("missing {what}"))
}

fn parse_arg<T>(rest: &[&str], what: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    arg(rest, what)?
        .parse()
        .with_context(|| format!("invalid {what}"))
}

fn print_status(controller: &ToneController<CpalContext>) {
    let config = controller.config();
    println!("{}", controller.status_text());
    println!(
        "  {} Hz {} at {:.0}%, binaural {} ({} Hz beat)",
        controller.frequency_display(),
        config.waveform,
        config.volume * 100.0,
        if config.binaural.enabled { "on" } else { "off" },
        config.binaural.beat_hz
    );
    if controller.auto_stop_minutes() > 0.0 {
        println!("  auto-stop: {} min", controller.auto_stop_minutes());
    }
    if let Some((left, right)) = controller.peak_level() {
        println!("  peak: L {left:.3} R {right:.3}");
    }
}

/// Export running on its own thread
///
/// The thread reports progress milestones and writes the finished file into
/// the output directory, so the command loop stays responsive meanwhile.
struct BackgroundExport {
    cancel: CancelToken,
    thread: JoinHandle<()>,
}

impl BackgroundExport {
    fn start(controller: &ToneController<CpalContext>, output_dir: &Path) -> Result<Self> {
        let (progress_tx, progress_rx) = crossbeam_channel::unbounded::<RenderProgress>();
        let task = controller.start_export(progress_tx)?;
        let cancel = task.cancel_token();
        let output_dir = output_dir.to_path_buf();

        let thread = std::thread::Builder::new()
            .name("tonegen-export".to_string())
            .spawn(move || {
                for progress in &progress_rx {
                    tracing::info!("{} {:.0}%", progress.phase.label(), progress.percent);
                }
                match task.wait() {
                    Ok(file) => {
                        let path = output_dir.join(&file.filename);
                        match std::fs::write(&path, &file.bytes) {
                            Ok(()) => {
                                println!("\nWrote {} ({} bytes)", path.display(), file.bytes.len());
                            }
                            Err(e) => println!("\nFailed to write {}: {e}", path.display()),
                        }
                    }
                    Err(e) => println!("\nExport stopped: {e}"),
                }
            })
            .context("Failed to spawn export thread")?;

        Ok(Self { cancel, thread })
    }

    fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    fn cancel_and_join(self) {
        self.cancel.cancel();
        if self.thread.join().is_err() {
            tracing::error!("Export thread panicked");
        }
    }
}
