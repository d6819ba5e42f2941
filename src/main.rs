//! Connio device client - Main Entry Point
//!
//! Bootstraps the device (pre-provisioned credentials or runtime
//! provisioning), opens the operational session and publishes telemetry until
//! the platform configuration or a signal stops it.

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use connio_device::config::{Bootstrap, DeviceConfig};
use connio_device::error::{DeviceError, DeviceResult};
use connio_device::observability::{init_default_logging, init_logging, LogFormat};
use connio_device::protocol::TopicBuilder;
use connio_device::session::{ConfigSnapshot, DeviceSession, SessionContext, SessionHandler};
use connio_device::telemetry::{DataPublisher, TelemetryLoop};
use connio_device::transport::{MqttTransport, SessionClient};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Level};

/// Connio IoT device reference client
#[derive(Parser)]
#[command(name = "connio-device")]
#[command(about = "Reference MQTT device client for the Connio IoT platform")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Broker URL, overrides the configuration file
    #[arg(long, value_name = "URL", env = "CONNIO_BROKER_URL")]
    broker_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap the device and publish telemetry
    Run,
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        verbose => {
            let level = if verbose == 1 { Level::DEBUG } else { Level::TRACE };
            let format = LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_default());
            init_logging(level, format, false);
        }
    }

    info!("Starting Connio device client v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref(), cli.broker_url) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e.sanitized_message(), "Failed to load configuration");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_device(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!(error = %e.sanitized_message(), "Command failed");
        process::exit(1);
    }

    info!("Device client shutdown complete");
}

fn load_configuration(path: Option<&Path>, broker_url: Option<String>) -> DeviceResult<DeviceConfig> {
    let config = match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            DeviceConfig::load_from_file(path)?
        }
        None => {
            let default_paths = ["device.toml", "config/device.toml"];
            match default_paths.iter().map(Path::new).find(|path| path.exists()) {
                Some(path) => {
                    info!("Loading configuration from: {}", path.display());
                    DeviceConfig::load_from_file(path)?
                }
                None => {
                    info!("No configuration file found, using pre-provisioned defaults");
                    DeviceConfig::default()
                }
            }
        }
    };

    match broker_url {
        Some(url) => Ok(config.with_broker_url(url)?),
        None => Ok(config),
    }
}

fn handle_config_command(config: &DeviceConfig, show: bool) -> DeviceResult<()> {
    config.validate()?;
    info!("Configuration is valid");

    if show {
        println!("{}", config.to_toml()?);
    }
    Ok(())
}

async fn run_device(config: DeviceConfig) -> DeviceResult<()> {
    let topics = TopicBuilder::new(config.broker.namespace.clone());
    let mut session = DeviceSession::new(MqttTransport::new(), topics.clone())
        .with_initial_config(config.telemetry.initial_snapshot())
        .with_reconnect_delay(config.reconnect_delay());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(()) => {
                shutdown_tx.send_replace(true);
            }
            Err(e) => error!(error = %e, "Failed to install signal handlers"),
        }
    });

    let params = match config.bootstrap()? {
        Bootstrap::Credentials { params } => params,
        Bootstrap::Provisioning {
            params,
            claim,
            config_property,
            timeout,
            keep_alive,
        } => {
            let provisioned = tokio::select! {
                result = session.provision(
                    params.clone(),
                    &claim,
                    config_property.as_deref(),
                    timeout,
                    keep_alive,
                ) => result,
                _ = shutdown_requested(shutdown_rx.clone()) => {
                    info!("Shutdown requested during provisioning");
                    return Ok(());
                }
            };
            provisioned?.connection_parameters(&params)
        }
    };

    let device_id = params.client_id.clone();
    let handler = DeviceHandler {
        topics: topics.clone(),
        device_id: device_id.clone(),
    };
    let connection = session.connect(params, handler, config.keep_alive())?;

    let telemetry = TelemetryLoop::new(&session.config()).with_shutdown(shutdown_rx);
    let published = connection
        .run_loop(move |handle| telemetry.run(DataPublisher::new(handle, topics, device_id)))
        .await?;

    info!(published, "Device stopped");
    Ok(())
}

/// Callbacks of the reference device
struct DeviceHandler {
    topics: TopicBuilder,
    device_id: String,
}

#[async_trait]
impl<C: SessionClient> SessionHandler<C> for DeviceHandler {
    async fn on_connected(&self, ctx: &SessionContext<C>) {
        let topic = self.topics.data_in(&self.device_id);
        match ctx.connection.subscribe(&topic).await {
            Ok(()) => info!(topic = %topic, "Subscribed to device topics"),
            Err(e) => warn!(topic = %topic, error = %e, "Failed to subscribe to device topics"),
        }
    }

    async fn on_message(&self, _ctx: &SessionContext<C>, topic: &str, data: Value) {
        info!("{topic} <= {data}");
    }

    fn accepts_config_updates(&self) -> bool {
        true
    }

    async fn on_config_updated(&self, _ctx: &SessionContext<C>, snapshot: &ConfigSnapshot) {
        info!(config = ?snapshot.as_map(), "Device configuration updated");
    }

    async fn on_subscribed(&self, _ctx: &SessionContext<C>, packet_id: u16, granted: &[Option<u8>]) {
        debug!(packet_id, granted = ?granted, "Subscription granted");
    }
}

async fn wait_for_signal() -> Result<(), DeviceError> {
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
    }
    Ok(())
}

async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
