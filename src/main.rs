//! dht22-publisher - Main Entry Point
//!
//! Samples a DHT22 sensor on a fixed interval and publishes each reading
//! to an MQTT broker over mutually authenticated TLS.

use clap::{Parser, Subcommand};
use dht22_publisher::config::{AgentConfig, ConfigError};
use dht22_publisher::error::{error_chain, AgentError, AgentResult};
use dht22_publisher::observability::{init_logging, AgentStats, LogSettings};
use dht22_publisher::scheduler::{PollingScheduler, SchedulerSettings};
use dht22_publisher::sensor::{IioDht22Driver, RetryPolicy, SensorReader};
use dht22_publisher::telemetry::TelemetryPublisher;
use dht22_publisher::transport::{mqtt::MqttSession, Transport};
use dht22_publisher::{mqtt_span, publish_span, scheduler_span, sensor_span};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Locations tried when no config file is given
const DEFAULT_CONFIG_PATHS: &[&str] = &["config.toml", "/etc/dht22-publisher/config.toml"];

/// DHT22 telemetry publisher
#[derive(Parser)]
#[command(name = "dht22-publisher")]
#[command(about = "Publish DHT22 temperature and humidity readings over MQTT")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "DHT22_PUBLISHER_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the polling loop (default)
    Run,
    /// Validate the configuration and exit
    Config {
        /// Print the resolved configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(LogSettings::from_env().with_verbosity(cli.verbose));

    info!("Starting dht22-publisher v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error_kind = %e.kind(), error = %error_chain(&e), "Failed to load configuration");
            process::exit(1);
        }
    };

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_agent(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        let kind = e.kind();
        if kind.is_fatal() {
            error!(error_kind = %kind, error = %error_chain(&e), "Agent stopped on fatal error");
        } else {
            error!(error_kind = %kind, error = %error_chain(&e), "Agent stopped unexpectedly");
        }
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: Option<&Path>) -> AgentResult<AgentConfig> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(AgentConfig::load_from_file(path)?);
    }

    for candidate in DEFAULT_CONFIG_PATHS {
        let path = Path::new(candidate);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(AgentConfig::load_from_file(path)?);
        }
    }

    Err(ConfigError::InvalidConfig(format!(
        "no configuration file found, tried {}; pass one with -c/--config",
        DEFAULT_CONFIG_PATHS.join(", ")
    ))
    .into())
}

async fn run_agent(config: AgentConfig) -> AgentResult<()> {
    // Without a session the loop must not start; this error is fatal
    let session = Arc::new(
        MqttSession::connect(
            &config.mqtt,
            mqtt_span!(client_id = %config.mqtt.client_id, endpoint = %config.mqtt.endpoint),
        )
        .await?,
    );
    let (endpoint, port) = session.endpoint();
    info!(endpoint, port, client_id = session.client_id(), "MQTT session established");

    let driver = IioDht22Driver::from_config(config.sensor.iio_device.as_deref());
    let reader = SensorReader::new(
        driver,
        RetryPolicy::from_config(&config.sensor),
        sensor_span!(pin = config.main.dht22_pin),
    );
    let publisher = TelemetryPublisher::new(
        session.clone(),
        config.mqtt.topic.clone(),
        publish_span!(topic = %config.mqtt.topic),
    )
    .with_ack_timeout(config.mqtt.publish_timeout_secs.map(Duration::from_secs));

    let scheduler = PollingScheduler::new(
        reader,
        publisher,
        SchedulerSettings::from_config(&config),
        Arc::new(AgentStats::new()),
        scheduler_span!(location = %config.main.location),
    );

    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| AgentError::internal_error(format!("Failed to install SIGINT handler: {e}")))?;
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| AgentError::internal_error(format!("Failed to install SIGTERM handler: {e}")))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut polling = tokio::spawn(scheduler.run(shutdown_rx));

    let stopped_early = tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
            None
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
            None
        }
        finished = &mut polling => Some(finished),
    };

    let finished = match stopped_early {
        Some(finished) => finished,
        None => {
            let _ = shutdown_tx.send(true);
            polling.await
        }
    };

    match finished {
        Ok(stats) => match serde_json::to_string(&stats) {
            Ok(json) => info!(stats = %json, "Final statistics"),
            Err(e) => warn!(error = %e, "Failed to render final statistics"),
        },
        Err(e) => error!(error = %e, "Polling loop ended abnormally"),
    }

    info!(reconnects = session.reconnect_count(), "Closing MQTT session");
    if let Err(e) = session.close().await {
        warn!(error = %error_chain(&e), "Error while closing MQTT session");
    }

    Ok(())
}

fn handle_config_command(config: &AgentConfig, show: bool) -> AgentResult<()> {
    if show {
        let rendered = toml::to_string_pretty(config)
            .map_err(|e| AgentError::internal_error(format!("Failed to render config: {e}")))?;
        println!("{rendered}");
    }

    info!(
        endpoint = %config.mqtt.endpoint,
        port = config.mqtt.port,
        topic = %config.mqtt.topic,
        "Configuration validation complete"
    );
    Ok(())
}
