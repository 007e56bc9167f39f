use std::f32::consts::PI;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use remix_audio_core::{
    DspModuleRegistry, EffectEngine, EffectParams, FftTap, FramebufferSurface, ManualScheduler,
    ModuleImage, PlaybackSession, SessionCallbacks, SessionState, SimTransport, SpectrumSampler,
    Track,
};
use tracing_subscriber::EnvFilter;

fn main() -> remix_audio_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Pack { output, pages } => run_pack(&output, pages),
        Commands::Render {
            module,
            effect,
            intensity,
            tempo,
            preset,
            seconds,
        } => run_render(&module, &effect, intensity, tempo, preset, seconds),
        Commands::Play {
            url,
            duration,
            tempo,
            volume,
        } => run_play(&url, duration, tempo, volume),
        Commands::Spectrum { frames } => run_spectrum(frames),
    }
}

fn run_pack(output: &PathBuf, pages: u16) -> remix_audio_core::Result<()> {
    let bytes = ModuleImage::standard().with_pages(pages).encode()?;
    std::fs::write(output, &bytes)?;
    tracing::info!(?output, size = bytes.len(), "module image written");
    Ok(())
}

fn run_render(
    module: &PathBuf,
    effect: &str,
    intensity: f32,
    tempo: f32,
    preset: u32,
    seconds: f32,
) -> remix_audio_core::Result<()> {
    let registry = DspModuleRegistry::with_fs();
    let module = registry.load(&module.to_string_lossy())?;
    let mut engine = EffectEngine::new(module);

    let input = test_tone(seconds);
    let params = EffectParams {
        intensity,
        tempo_ratio: tempo / 100.0,
        preset,
    };
    let output = engine.apply(effect, &input, &params)?;

    let peak = output.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    let rms = (output.iter().map(|s| s * s).sum::<f32>() / output.len() as f32).sqrt();
    let summary = serde_json::json!({
        "effect": effect,
        "input_samples": input.len(),
        "output_samples": output.len(),
        "peak": peak,
        "rms": rms,
    });
    println!("{summary}");
    Ok(())
}

fn run_play(url: &str, duration: f64, tempo: u16, volume: u8) -> remix_audio_core::Result<()> {
    let callbacks = SessionCallbacks {
        on_time_update: Some(Box::new(|t| tracing::info!(position = t, "tick"))),
        on_duration_change: Some(Box::new(|d| tracing::info!(duration = d, "metadata"))),
        on_can_play: Some(Box::new(|| tracing::info!("ready to play"))),
        on_next: Some(Box::new(|| tracing::info!("stream ended, advancing"))),
        on_error: Some(Box::new(|| tracing::warn!("transport error"))),
    };

    let mut session = PlaybackSession::with_callbacks(SimTransport::new(duration), callbacks);
    session.bind(Track::new("demo", "Demo Track", "Remix Audio", url))?;
    session.set_volume(volume);
    session.set_tempo(tempo);

    session.play()?;
    session.transport_mut().finish_loading();
    session.pump_events();

    while session.state() == SessionState::Playing {
        session.transport_mut().advance(0.5);
        session.pump_events();
    }

    tracing::info!(state = ?session.state(), "playback finished");
    Ok(())
}

fn run_spectrum(frames: usize) -> remix_audio_core::Result<()> {
    let tap = FftTap::new(256)?;
    let surface = FramebufferSurface::new(64, 16, 1.0);
    let mut sampler = SpectrumSampler::new(tap, surface);
    let mut scheduler = ManualScheduler::new();

    sampler.activate(&mut scheduler);
    let mut phase = 0usize;
    for _ in 0..frames {
        let chunk: Vec<f32> = (0..256)
            .map(|i| (2.0 * PI * (phase + i) as f32 * 8.0 / 256.0).sin())
            .collect();
        phase += 256;
        sampler.tap_mut().push_samples(&chunk);

        if let Some(token) = scheduler.take_due() {
            sampler.on_frame(token, &mut scheduler);
        }
        println!("{}", ascii_bars(sampler.surface().last_bars()));
    }
    sampler.deactivate(&mut scheduler);
    Ok(())
}

fn test_tone(seconds: f32) -> Vec<f32> {
    let sample_rate = 48_000.0;
    let len = (seconds * sample_rate).max(1.0) as usize;
    (0..len)
        .map(|i| (2.0 * PI * 440.0 * i as f32 / sample_rate).sin() * 0.8)
        .collect()
}

fn ascii_bars(bars: &[f32]) -> String {
    const GLYPHS: [char; 5] = [' ', '.', ':', '|', '#'];
    bars.iter()
        .map(|bar| {
            let level = (bar * (GLYPHS.len() - 1) as f32).round() as usize;
            GLYPHS[level.min(GLYPHS.len() - 1)]
        })
        .collect()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Remix platform audio core harness", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the standard DSP module image to disk.
    Pack {
        /// Output path for the module binary.
        output: PathBuf,
        /// Initial linear-memory size in 64 KiB pages.
        #[arg(short, long, default_value_t = 4)]
        pages: u16,
    },
    /// Load a module and run one effect over a generated test tone.
    Render {
        /// Path to the module binary.
        module: PathBuf,
        /// Export name of the effect to apply.
        effect: String,
        /// Effect strength in 0.0-1.0.
        #[arg(short, long, default_value_t = 0.5)]
        intensity: f32,
        /// Tempo as a percentage; 100 leaves the speed unchanged.
        #[arg(short, long, default_value_t = 100.0)]
        tempo: f32,
        /// Equalizer preset id.
        #[arg(short, long, default_value_t = 0)]
        preset: u32,
        /// Test tone length in seconds.
        #[arg(short, long, default_value_t = 1.0)]
        seconds: f32,
    },
    /// Simulate a playback session end-to-end.
    Play {
        /// Audio source URL bound to the demo track.
        url: String,
        /// Simulated stream duration in seconds.
        #[arg(short, long, default_value_t = 5.0)]
        duration: f64,
        /// Tempo as a percentage.
        #[arg(short, long, default_value_t = 100)]
        tempo: u16,
        /// Volume in the 0-100 host range.
        #[arg(short, long, default_value_t = 100)]
        volume: u8,
    },
    /// Run the spectrum sampler over a synthetic tone and print bars.
    Spectrum {
        /// Number of frames to draw.
        #[arg(short, long, default_value_t = 10)]
        frames: usize,
    },
}
