//! driftdeck - play a generative session through the effects engine
//!
//! Subcommands:
//! - `driftdeck play --prompt "warm pads:1.2" --seconds 30` - run against the loopback backend
//! - `driftdeck config` - print the effective configuration

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use driftconf::{DeckConfig, OutputKind};
use driftdeck::{Engine, EngineEvent, PlaybackState};
use driftproto::{LoopbackConfig, LoopbackConnector, Prompt};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "driftdeck")]
#[command(about = "Realtime playback and effects for generative audio sessions")]
#[command(version)]
struct Cli {
    /// Config file replacing ./driftdeck.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play the loopback backend through the engine
    Play {
        /// Weighted prompt as "text:weight" (weight defaults to 1.0)
        #[arg(short, long = "prompt", value_parser = parse_prompt, required = true)]
        prompts: Vec<(String, f32)>,

        /// How long to play before stopping
        #[arg(short, long, default_value = "10")]
        seconds: f64,

        /// Record the master bus to this WAV file
        #[arg(short, long)]
        record: Option<PathBuf>,

        /// Override audio.output ("null" or "cpal")
        #[arg(long)]
        output: Option<String>,

        /// Words the loopback backend's content filter rejects
        #[arg(long = "block")]
        blocked_words: Vec<String>,

        /// Master volume 0..1
        #[arg(long)]
        volume: Option<f32>,

        /// Playback rate multiplier
        #[arg(long)]
        rate: Option<f64>,

        /// Normalized lowpass cutoff 0..1
        #[arg(long)]
        cutoff: Option<f32>,

        /// Reverb send 0..1
        #[arg(long)]
        reverb: Option<f32>,

        /// Delay send 0..1
        #[arg(long)]
        delay: Option<f32>,

        #[arg(long)]
        mono: bool,

        /// Rotating "8D" spatial effect
        #[arg(long)]
        spatial: bool,

        /// Print engine events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration and where it came from
    Config,
}

fn parse_prompt(s: &str) -> Result<(String, f32), String> {
    let (text, weight) = match s.rsplit_once(':') {
        Some((text, weight)) => {
            let weight = weight
                .trim()
                .parse::<f32>()
                .map_err(|e| format!("invalid weight in {:?}: {}", s, e))?;
            (text, weight)
        }
        None => (s, 1.0),
    };
    let text = text.trim();
    if text.is_empty() {
        return Err("prompt text is empty".to_string());
    }
    Ok((text.to_string(), weight))
}

fn init_tracing(config: &DeckConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = DeckConfig::load_with_sources_from(cli.config.as_deref())
        .context("failed to load configuration")?;
    init_tracing(&config);

    match cli.command {
        Commands::Config => {
            for file in &sources.files {
                println!("# file: {}", file.display());
            }
            for var in &sources.env_overrides {
                println!("# env: {}", var);
            }
            print!("{}", config.to_toml());
        }
        Commands::Play {
            prompts,
            seconds,
            record,
            output,
            blocked_words,
            volume,
            rate,
            cutoff,
            reverb,
            delay,
            mono,
            spatial,
            json,
        } => {
            if let Some(output) = output {
                config.audio.output = OutputKind::parse(&output)
                    .with_context(|| format!("unknown output {:?}", output))?;
            }
            if !seconds.is_finite() || seconds <= 0.0 {
                bail!("--seconds must be positive");
            }

            let connector = Arc::new(LoopbackConnector::new(LoopbackConfig {
                blocked_words,
                ..LoopbackConfig::default()
            }));
            let (engine, mut output) = Engine::start(&config, connector)?;
            info!(output = output.kind().as_str(), "driftdeck ready");

            let prompts = prompts
                .into_iter()
                .enumerate()
                .map(|(i, (text, weight))| Prompt::new(format!("prompt-{}", i), text, weight))
                .collect();
            engine.set_weighted_prompts(prompts)?;
            if let Some(volume) = volume {
                engine.set_master_volume(volume)?;
            }
            if let Some(rate) = rate {
                engine.set_playback_rate(rate)?;
            }
            if let Some(cutoff) = cutoff {
                engine.set_filter_cutoff(cutoff)?;
            }
            if let Some(reverb) = reverb {
                engine.set_reverb(reverb)?;
            }
            if let Some(delay) = delay {
                engine.set_delay(delay)?;
            }
            engine.set_mono(mono)?;
            engine.set_spatial_rotation(spatial)?;

            let events = engine.subscribe();
            engine.play()?;
            if record.is_some() {
                engine.start_recording()?;
            }

            let wav = run_session(&engine, events, Duration::from_secs_f64(seconds), json).await?;

            if let Some(path) = record {
                match wav {
                    Some(bytes) => {
                        std::fs::write(&path, &bytes)
                            .with_context(|| format!("failed to write {}", path.display()))?;
                        info!(path = %path.display(), bytes = bytes.len(), "recording saved");
                    }
                    None => warn!("no recording was produced"),
                }
            }

            let status = engine.status().await?;
            if json {
                println!("{}", serde_json::to_string(&status)?);
            } else {
                println!(
                    "played {:.1}s: {} buffers scheduled, {} dropped, {} reconnect attempts",
                    status.engine_time,
                    status.buffers_scheduled,
                    status.buffers_dropped,
                    status.reconnect_attempts
                );
            }

            engine.shutdown().await?;
            output.stop();
        }
    }

    Ok(())
}

/// Print events until the time is up or the engine stops on its own, then
/// stop and collect the recording if one was running.
async fn run_session(
    engine: &Engine,
    mut events: broadcast::Receiver<EngineEvent>,
    duration: Duration,
    json: bool,
) -> Result<Option<Vec<u8>>> {
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    let mut wav = None;

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    let stopped = matches!(
                        event,
                        EngineEvent::PlaybackStateChanged { state: PlaybackState::Stopped }
                    );
                    handle_event(event, json, &mut wav)?;
                    if stopped {
                        return Ok(wav);
                    }
                }
                Err(RecvError::Lagged(n)) => warn!("missed {} engine events", n),
                Err(RecvError::Closed) => return Ok(wav),
            },
        }
    }

    engine.stop()?;
    // Commands are handled in order: once status answers, stop has run.
    engine.status().await?;
    loop {
        match events.try_recv() {
            Ok(event) => handle_event(event, json, &mut wav)?,
            Err(TryRecvError::Lagged(n)) => warn!("missed {} engine events", n),
            Err(_) => break,
        }
    }
    Ok(wav)
}

fn handle_event(event: EngineEvent, json: bool, wav: &mut Option<Vec<u8>>) -> Result<()> {
    print_event(&event, json)?;
    if let EngineEvent::RecordingFinished { wav: bytes, .. } = event {
        *wav = Some(bytes);
    }
    Ok(())
}

fn print_event(event: &EngineEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        EngineEvent::PlaybackStateChanged { state } => println!("state: {}", state),
        EngineEvent::FilteredPrompt { text, reason } => {
            println!("filtered: {:?} ({})", text, reason)
        }
        EngineEvent::Error { message } => println!("error: {}", message),
        EngineEvent::RecordingStateChanged { is_recording } => {
            println!("recording: {}", if *is_recording { "on" } else { "off" })
        }
        EngineEvent::RecordingFinished { wav, prompts } => {
            println!("recorded {} bytes of {:?}", wav.len(), prompts)
        }
    }
    Ok(())
}
