use anyhow::{Context, Result};
use clap::Parser;
use speech_scheduler::{
    AppConfig, Priority, SchedulerError, SimulatedDevice, SpeakOptions, SpeechScheduler,
    TracingTelemetry,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DRAIN_SLACK: Duration = Duration::from_secs(2);

/// Speak lines from stdin through a simulated single-voice device.
///
/// Prefix a line with a priority (`high: Turn left`) to override the
/// default. `/stop` silences everything, `/status` prints the scheduler
/// state, `/quit` exits.
#[derive(Parser, Debug)]
#[command(name = "speech-scheduler", version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured speech rate
    #[arg(long)]
    rate: Option<f32>,

    /// Override the simulated speaking pace
    #[arg(long)]
    words_per_minute: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "speech_scheduler=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => AppConfig::default(),
    };
    if let Some(rate) = args.rate {
        let normalized = config.scheduler.rate_normalized;
        config.scheduler = config.scheduler.with_rate(rate, normalized);
    }
    if let Some(wpm) = args.words_per_minute {
        config.device = config.device.with_words_per_minute(wpm);
    }

    info!("Starting speech scheduler");

    let device = Arc::new(SimulatedDevice::new(config.device.clone()));
    let scheduler = SpeechScheduler::new(
        device.clone(),
        Arc::new(TracingTelemetry),
        config.scheduler.clone(),
    )?;
    scheduler.ready().await;

    // Upper bound on how long everything submitted could take to play
    let mut budget = Duration::ZERO;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "/quit" => break,
            "/stop" => {
                if let Err(e) = scheduler.stop().await {
                    warn!("{}", e.user_message());
                }
            }
            "/status" => {
                let snapshot = scheduler.snapshot();
                println!(
                    "state: {:?} | queued: {} | {}",
                    snapshot.state,
                    snapshot.queue_len,
                    scheduler.metrics().summary()
                );
            }
            text => {
                let (options, text) = parse_line(text);
                budget += device.playback_duration(text);
                match scheduler.speak(text, options).await {
                    Ok(outcome) => info!("{:?}", outcome),
                    Err(e) => warn!("{} ({})", e.user_message(), e),
                }
            }
        }
    }

    drain(&scheduler, budget + DRAIN_SLACK).await?;

    println!("{}", scheduler.metrics().summary());
    println!("spoken: {}", device.transcript().len());
    scheduler.shutdown().await?;
    Ok(())
}

/// Let queued speech play out, stopping it if `limit` passes first.
/// Returns whether everything finished on its own.
async fn drain(scheduler: &SpeechScheduler, limit: Duration) -> Result<bool, SchedulerError> {
    let wait = async {
        while scheduler.is_speaking() || scheduler.queue_len() > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            scheduler.settle().await?;
        }
        Ok::<(), SchedulerError>(())
    };

    match tokio::time::timeout(limit, wait).await {
        Ok(result) => result.map(|()| true),
        Err(_) => {
            warn!("Playback did not finish within {:?}; stopping", limit);
            scheduler.stop().await?;
            Ok(false)
        }
    }
}

/// Split an optional `priority:` prefix off a line
fn parse_line(line: &str) -> (SpeakOptions, &str) {
    if let Some((prefix, rest)) = line.split_once(':') {
        if let Ok(priority) = prefix.parse::<Priority>() {
            return (SpeakOptions::with_priority(priority), rest.trim());
        }
    }
    (SpeakOptions::default(), line)
}
