//! mqtt-relay - MQTT to NATS/Kafka topic relay
//!
//! Usage:
//!   mqtt-relay [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path (default: config/config.toml)
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   -h, --help             Print help

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use mqtt_relay::config::{Config, DEFAULT_CONFIG_PATH};
use mqtt_relay::inbound::InboundSession;
use mqtt_relay::outbound;
use mqtt_relay::relay::Relay;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    fn from_config(level: &str) -> Self {
        match level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }
}

/// mqtt-relay - republish MQTT topics to NATS or Kafka
#[derive(Parser, Debug)]
#[command(name = "mqtt-relay")]
#[command(version)]
#[command(about = "Relay messages from MQTT topics to NATS subjects or Kafka topics")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

/// Log, print and exit with status 1
fn fatal(context: &str, err: impl std::fmt::Display) -> ! {
    error!("{}: {}", context, err);
    eprintln!("{}: {}", context, err);
    std::process::exit(1);
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config file {:?}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // CLI overrides config
    let log_level = args
        .log_level
        .unwrap_or_else(|| LogLevel::from_config(&config.log.level));

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Loaded configuration from {:?}", args.config);
    info!("Starting mqtt-relay");
    info!("  MQTT broker: {}", config.mqtt.broker);
    info!("  Outbound: {} ({})", config.outbound.backend, config.outbound.url);
    for mapping in &config.mqtt.topics {
        info!("  Route: {} -> {}", mapping.mqtt_topic, mapping.queue_topic);
    }

    let publisher = match outbound::connect(&config.outbound).await {
        Ok(publisher) => publisher,
        Err(e) => fatal("Failed to connect to outbound backend", e),
    };

    let relay = Arc::new(Relay::new(publisher.clone(), config.topic_map()));

    let mut session = match InboundSession::new(&config.mqtt, relay) {
        Ok(session) => session,
        Err(e) => fatal("Failed to create MQTT client", e),
    };

    if let Err(e) = session.connect().await {
        fatal("Failed to connect to MQTT broker", e);
    }
    if let Err(e) = session.subscribe().await {
        fatal("Failed to subscribe to MQTT topics", e);
    }
    if let Err(e) = session.start() {
        fatal("Failed to start MQTT session", e);
    }

    info!("Relay running as {}", session.client_id());

    shutdown_signal().await;
    info!("Shutting down");

    session.disconnect().await;

    if let Err(e) = publisher.close().await {
        error!("Error closing {} connection: {}", publisher.name(), e);
    }

    info!("Shutdown complete");
    Ok(())
}
