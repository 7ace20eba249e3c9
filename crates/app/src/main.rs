use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use vibe_visualiser_core::{AppConfig, AudioEngine, DeviceBackend};

const FRAME_INTERVAL: Duration = Duration::from_millis(16);

fn main() -> vibe_visualiser_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::from_json_file(path)?,
        None => AppConfig::default(),
    };
    let mut engine = AudioEngine::with_config(Box::new(DeviceBackend::new()), config)?;
    engine.set_volume(cli.volume);

    match cli.command {
        Commands::Mic { seconds } => run_microphone(&mut engine, seconds),
        Commands::File { path, seconds } => run_file(&mut engine, &path, seconds),
    }
}

fn run_microphone(engine: &mut AudioEngine, seconds: f32) -> vibe_visualiser_core::Result<()> {
    tracing::info!("connecting microphone");
    engine.connect_microphone()?;
    run_frames(engine, seconds);
    engine.disconnect();
    Ok(())
}

fn run_file(
    engine: &mut AudioEngine,
    path: &PathBuf,
    seconds: f32,
) -> vibe_visualiser_core::Result<()> {
    tracing::info!(?path, "decoding audio file");
    let bytes = std::fs::read(path)?;
    engine.connect_file(&bytes)?;
    let playback = engine.playback_state();
    tracing::info!(duration = playback.duration_seconds, "playback started");
    run_frames(engine, seconds);
    engine.disconnect();
    Ok(())
}

/// Pulls one analysis frame per display frame, the way the renderer
/// collaborator would, and prints a meter line for each.
fn run_frames(engine: &mut AudioEngine, seconds: f32) {
    let frames = (seconds.max(0.0) / FRAME_INTERVAL.as_secs_f32()).ceil() as u64;
    for _ in 0..frames {
        let frame = engine.get_analysis_frame();
        let playback = engine.playback_state();
        println!(
            "{:6.2}s  bass {}  mid {}  treble {}{}",
            playback.position_seconds,
            meter(frame.bass),
            meter(frame.mid),
            meter(frame.treble),
            if frame.is_beat { "  BEAT" } else { "" },
        );
        std::thread::sleep(FRAME_INTERVAL);
    }
}

fn meter(level: f32) -> String {
    let filled = (level.clamp(0.0, 1.0) * 10.0).round() as usize;
    format!("[{:<10}]", "#".repeat(filled))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio engine host for the VIBE visualiser", long_about = None)]
struct Cli {
    /// Optional JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Initial playback volume in [0, 1].
    #[arg(short, long, default_value_t = 0.5)]
    volume: f32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Visualise live microphone input (analysis only, never audible).
    Mic {
        /// How long to run before disconnecting.
        #[arg(short, long, default_value_t = 10.0)]
        seconds: f32,
    },
    /// Decode an audio file and visualise it while it plays on a loop.
    File {
        /// Path to the encoded audio file.
        path: PathBuf,
        /// How long to run before disconnecting.
        #[arg(short, long, default_value_t = 30.0)]
        seconds: f32,
    },
}
