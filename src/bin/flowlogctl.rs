//! flowlogctl — a demo harness that drives a `flowlog::Logger` from the
//! command line: emit synthetic events at a chosen rate, watch health
//! snapshots, or dump the built-in config defaults.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use flowlog::config::FlowlogConfig;
use flowlog::envelope::Envelope;
use flowlog::level::LEVEL_REGISTRY;
use flowlog::logger::{LogCall, LoggerBuilder};
use flowlog::sink::{Sink, WriteOutcome};
use flowlog::value::Value;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// flowlogctl - drive a flowlog pipeline from the command line
#[derive(Parser, Debug)]
#[command(name = "flowlogctl")]
#[command(author = "flowlog contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Demo harness for the flowlog logging pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Internal log level for this harness's own diagnostics
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Emit this harness's own logs as JSON
    #[arg(long, default_value = "false", global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Emit synthetic events at a fixed rate until interrupted
    Run {
        /// Events emitted per second
        #[arg(long, default_value = "100")]
        rate: u64,

        /// Severity level for generated events
        #[arg(long, default_value = "INFO")]
        level: String,

        /// Stop after this many seconds (0 = run until Ctrl+C)
        #[arg(long, default_value = "0")]
        duration_secs: u64,
    },

    /// Print the effective configuration loaded from the environment
    ShowConfig,

    /// Print the current Prometheus metrics exposition text
    Metrics {
        /// Emit a handful of warm-up events first so counters aren't empty
        #[arg(long, default_value = "10")]
        warmup_events: u32,
    },
}

fn setup_logging(log_level: &str, json_output: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    if json_output {
        tracing_subscriber::registry().with(filter).with(fmt::layer().json()).init();
    } else {
        tracing_subscriber::registry().with(filter).with(fmt::layer().with_target(true)).init();
    }
}

/// A demo sink that counts writes and prints a line per event; stands in for
/// whatever the embedding application would actually ship to.
struct CountingStdoutSink {
    name: String,
}

#[async_trait]
impl Sink for CountingStdoutSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, event: &Envelope) -> WriteOutcome {
        match serde_json::to_string(event) {
            Ok(line) => {
                println!("{line}");
                WriteOutcome::Ok
            }
            Err(e) => WriteOutcome::Err(e.to_string()),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, draining"),
        _ = terminate => info!("received SIGTERM, draining"),
    }
}

async fn run_emitter(rate: u64, level_name: String, duration_secs: u64) -> Result<(), Box<dyn std::error::Error>> {
    let level = LEVEL_REGISTRY
        .get(&level_name)
        .ok_or_else(|| format!("unknown level {level_name}"))?;

    let config = FlowlogConfig::from_env().unwrap_or_default();
    let logger = LoggerBuilder::new("flowlogctl", config)
        .sink(Arc::new(CountingStdoutSink { name: "stdout".to_string() }), None)
        .build()?;
    logger.start().await;

    let (done_tx, _) = broadcast::channel::<()>(1);
    let mut shutdown_rx = done_tx.subscribe();
    let shutdown_task = tokio::spawn(async move {
        shutdown_signal().await;
        let _ = done_tx.send(());
    });

    let period = Duration::from_secs_f64(1.0 / rate.max(1) as f64);
    let mut ticker = tokio::time::interval(period);
    let mut sequence: u64 = 0;
    let deadline = if duration_secs > 0 { Some(tokio::time::Instant::now() + Duration::from_secs(duration_secs)) } else { None };

    info!(rate, level = %level_name, "starting synthetic event stream");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sequence += 1;
                let call = LogCall::new().field("sequence", Value::Int(sequence as i64));
                logger.log(level.clone(), "synthetic event", call).await;
                if let Some(deadline) = deadline {
                    if tokio::time::Instant::now() >= deadline {
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }

    shutdown_task.abort();
    let result = logger.drain(Duration::from_secs(10)).await;
    info!(
        messages_drained = result.messages_drained,
        timed_out = result.timed_out,
        errors = result.errors,
        "drain complete"
    );
    if result.timed_out {
        warn!("drain hit its deadline before the queue fully emptied");
    }
    Ok(())
}

async fn show_config() -> Result<(), Box<dyn std::error::Error>> {
    let config = FlowlogConfig::from_env().unwrap_or_default();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

async fn show_metrics(warmup_events: u32) -> Result<(), Box<dyn std::error::Error>> {
    let config = FlowlogConfig::from_env().unwrap_or_default();
    let logger = LoggerBuilder::new("flowlogctl", config)
        .sink(Arc::new(CountingStdoutSink { name: "stdout".to_string() }), None)
        .build()?;
    logger.start().await;

    let info_level = LEVEL_REGISTRY.get("INFO").expect("INFO is a standard level");
    for i in 0..warmup_events {
        let call = LogCall::new().field("sequence", Value::Int(i as i64));
        logger.log(info_level.clone(), "warmup event", call).await;
    }

    logger.drain(Duration::from_secs(5)).await;
    println!("{}", flowlog::metrics::gather_metrics_text());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level, cli.json_logs);

    match cli.command {
        Commands::Run { rate, level, duration_secs } => run_emitter(rate, level, duration_secs).await,
        Commands::ShowConfig => show_config().await,
        Commands::Metrics { warmup_events } => show_metrics(warmup_events).await,
    }
}
