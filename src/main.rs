use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;

use nmq::config::Settings;
use nmq::telemetry::init_telemetry;
use nmq::{Message, Queue};

/// Publish to and consume from Redis list channels
#[derive(Parser)]
#[command(name = "nmq")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Redis address (`host:port` or `redis://` URL), overrides configuration
    #[arg(short, long, env = "NMQ_ADDRESS")]
    address: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log every message arriving on the given channels until interrupted
    Consume {
        /// Channels to poll, in addition to the configured ones
        channels: Vec<String>,

        /// Consumer name, also used as its membership marker
        #[arg(short, long, default_value = "logger")]
        name: String,

        /// Seconds to wait for buffered messages on shutdown
        #[arg(long, default_value = "5")]
        drain_timeout: u64,
    },

    /// Push one payload onto a channel
    Publish { channel: String, payload: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::new().context("failed to load settings")?;
    if let Some(address) = cli.address {
        settings.queue.redis.address = address;
    }
    settings.otel.json_logs |= cli.json_logs;

    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!(queue = %settings.queue.name, backend = %settings.queue.backend, "Configuration loaded");

    match cli.command {
        Commands::Consume {
            channels,
            name,
            drain_timeout,
        } => {
            settings.queue.channels.extend(channels);
            consume(settings, &name, Duration::from_secs(drain_timeout)).await
        }
        Commands::Publish { channel, payload } => {
            let queue = Queue::new(settings.queue).await?;
            queue.publish(&channel, payload.as_bytes()).await?;
            tracing::info!(channel = %channel, bytes = payload.len(), "Published");
            Ok(())
        }
    }
}

async fn consume(settings: Settings, name: &str, drain_timeout: Duration) -> Result<()> {
    let queue = Queue::new(settings.queue).await?;

    if queue.channels().await.is_empty() {
        tracing::warn!("No channels configured; add some with `nmq consume CHANNEL...`");
    }

    queue
        .add_consumer(name, |msg: Arc<Message>| async move {
            tracing::info!(
                channel = %msg.channel(),
                message_id = %msg.id(),
                payload = %String::from_utf8_lossy(msg.payload()),
                "Message received"
            );
        })
        .await?;

    let engine = queue.start().await?;
    tracing::info!(%queue, channels = ?queue.channels().await, "Consuming");

    shutdown_signal().await;

    engine.stop().await;
    let health = queue.health();
    let stats = queue.consumer_stats(name).await;
    let result = queue.shutdown(drain_timeout).await;

    if let Some(stats) = stats {
        tracing::info!(
            consumer = %name,
            stats = %serde_json::to_string(&stats)?,
            "Consumer stats"
        );
    }
    tracing::info!(
        cycles = health.cycles,
        messages = health.messages,
        poll_failures = health.poll_failures,
        timed_out = ?result.timed_out,
        "Shutdown complete"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
