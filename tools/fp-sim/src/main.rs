//! Frame presenter simulator
//!
//! Plays a synthetic stream through the presenter against the wall clock
//! and reports what reached the (logging) surface.

mod mixer;
mod surface;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::Parser;
use crossbeam::channel::RecvTimeoutError;
use serde::Serialize;
use tracing::{error, info, warn, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use fp_common::{MediaTime, Rational, Resolution};
use fp_presenter::{PlaybackSession, PresenterConfig, PresenterEvent};

use crate::mixer::SyntheticMixer;
use crate::surface::LoggingSurface;

/// Frame presenter simulator
#[derive(Parser, Debug)]
#[command(name = "fp-sim")]
#[command(about = "Drive the frame presenter with a synthetic stream")]
#[command(version)]
struct Args {
    /// Number of frames in the stream
    #[arg(long, default_value = "120")]
    frames: u32,

    /// Stream frame rate (frames per second)
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Playback rate (0 = scrub, negative = reverse)
    #[arg(long, default_value = "1.0", allow_hyphen_values = true)]
    rate: f32,

    /// Let upstream drop frames, lifting the fastest-rate limit
    #[arg(long)]
    thin: bool,

    /// Step this many frames instead of playing
    #[arg(long)]
    step: Option<u32>,

    /// Buffers per format (overrides the config file)
    #[arg(long)]
    pool_size: Option<usize>,

    /// Display refresh rate in Hz
    #[arg(long, default_value = "60")]
    refresh_hz: f32,

    /// Fail this many presentations with a lost device
    #[arg(long, default_value = "0")]
    lose_device: u64,

    /// Presenter configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides it
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Serialize)]
struct Summary {
    frames_produced: u32,
    frames_presented: u64,
    late: u64,
    stale_discards: u64,
    pool_generation: u64,
    elapsed_ms: u128,
    end_of_stream: bool,
}

fn load_config(args: &Args) -> anyhow::Result<PresenterConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => PresenterConfig::default(),
    };
    if let Some(pool_size) = args.pool_size {
        config.pool_size = pool_size;
    }
    config.display_refresh_hz = args.refresh_hz;
    if config.pool_size == 0 {
        bail!("pool size must be at least 1");
    }
    Ok(config)
}

fn parse_level(name: &str) -> Level {
    match name.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn level_filter(level: Level) -> EnvFilter {
    EnvFilter::default().add_directive(LevelFilter::from_level(level).into())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --log-level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level_filter(parse_level(&args.log_level)));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    if args.fps == 0 {
        bail!("--fps must be positive");
    }
    let config = load_config(&args)?;
    info!(?config, "Configuration loaded");

    let frame_rate = Rational::new(args.fps, 1);
    let reverse = args.rate < 0.0;
    let mixer = Arc::new(SyntheticMixer::new(
        args.frames,
        frame_rate,
        Resolution::FHD,
        reverse,
    ));
    let surface = Arc::new(LoggingSurface::new(args.refresh_hz, args.lose_device));

    let (session, events) = PlaybackSession::new(config, mixer.clone(), surface.clone())
        .context("starting presenter")?;
    let presenter = Arc::clone(session.presenter());

    // Negotiate and preroll the first frame.
    presenter.process_input_notify()?;
    session.set_rate(args.rate, args.thin)?;
    if let Some(steps) = args.step {
        presenter.prepare_frame_step(steps)?;
    }

    let start_at = if reverse {
        mixer.last_timestamp()
    } else {
        MediaTime::ZERO
    };
    let started = Instant::now();
    session.start(Some(start_at))?;
    presenter.process_input_notify()?;
    presenter.end_of_stream()?;

    let stream_secs = f64::from(args.frames) / f64::from(args.fps);
    let speed = f64::from(args.rate.abs()).max(0.1);
    let budget = Duration::from_secs_f64(stream_secs / speed + 5.0);
    let deadline = started + budget;

    let mut end_of_stream = false;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(PresenterEvent::EndOfStream) => {
                end_of_stream = true;
                break;
            }
            Ok(PresenterEvent::StepComplete { token }) => {
                info!(%token, "Frame step complete");
                if args.step.is_some() {
                    break;
                }
            }
            Ok(PresenterEvent::DeviceLost) => {
                warn!("Device lost; renegotiating");
                presenter.invalidate_format()?;
                presenter.process_input_notify()?;
            }
            Ok(PresenterEvent::PlaybackAborted(err)) => {
                error!(error = %err, "Playback aborted");
                session.close();
                return Err(err.into());
            }
            Ok(event) => info!(?event, "Presenter event"),
            Err(RecvTimeoutError::Timeout) => {
                warn!(budget_ms = budget.as_millis(), "Timed out waiting for the stream to end");
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let pool = presenter.pool_stats();
    let scheduler = presenter.scheduler_stats();
    let summary = Summary {
        frames_produced: mixer.produced(),
        frames_presented: surface.presented(),
        late: scheduler.late,
        stale_discards: pool.stale_discards,
        pool_generation: pool.generation,
        elapsed_ms: started.elapsed().as_millis(),
        end_of_stream,
    };
    session.close();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        info!(
            produced = summary.frames_produced,
            presented = summary.frames_presented,
            late = summary.late,
            stale = summary.stale_discards,
            elapsed_ms = summary.elapsed_ms,
            end_of_stream,
            "Run finished"
        );
    }
    Ok(())
}
