//! `status-feed` - watch and publish on the device status bus

use clap::{Parser, Subcommand};
use device_status_feed::client::{ConnectionPhase, LogEntry, PubSubClient};
use device_status_feed::config::FeedConfig;
use device_status_feed::observability::init_default_logging;
use device_status_feed::protocol::{is_status_topic, validate_topic_filter};
use device_status_feed::store::FeedStore;
use device_status_feed::transport::QosLevel;
use device_status_feed::{feed_span, FeedError, FeedResult};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, Instrument};

/// Exit status when the broker or network failed the command
const BROKER_FAILURE: u8 = 2;
const DEFAULT_CONFIG_PATHS: [&str; 2] = ["status-feed.toml", "config/status-feed.toml"];

#[derive(Parser)]
#[command(name = "status-feed")]
#[command(about = "Watch and publish device status updates over MQTT")]
#[command(version)]
struct Cli {
    /// Configuration file path; environment variables override its values
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print connection changes and messages until Ctrl-C
    Watch {
        /// Additional topic filters to subscribe to
        #[arg(short, long = "topic", value_name = "FILTER")]
        topics: Vec<String>,

        /// Also print the client's log entries
        #[arg(long)]
        logs: bool,

        /// Print one JSON object per line instead of text
        #[arg(long)]
        json: bool,
    },
    /// Publish a single message, then disconnect
    Publish {
        topic: String,
        payload: String,

        #[arg(long, default_value_t = 0, value_parser = parse_qos)]
        qos: u8,

        #[arg(long)]
        retain: bool,
    },
    /// Print the effective configuration with the password redacted
    Config,
}

fn parse_qos(value: &str) -> Result<u8, String> {
    let qos: u8 = value.parse().map_err(|_| format!("'{value}' is not a number"))?;
    QosLevel::try_from(qos)
        .map(u8::from)
        .map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_default_logging();

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Watch { topics, logs, json } => {
            run_watch(&config, topics, logs, json)
                .instrument(feed_span!(command = "watch"))
                .await
        }
        Commands::Publish {
            topic,
            payload,
            qos,
            retain,
        } => {
            run_publish(&config, &topic, payload, qos, retain)
                .instrument(feed_span!(command = "publish", topic = %topic))
                .await
        }
        Commands::Config => print_config(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(FeedError::Client(e)) if e.is_transport() => {
            error!(
                broker = %config.connection.broker_url(),
                "Broker request failed: {}", e
            );
            ExitCode::from(BROKER_FAILURE)
        }
        Err(e) => {
            error!("Command failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_configuration(path: Option<&Path>) -> FeedResult<FeedConfig> {
    if let Some(path) = path {
        info!("Loading configuration from: {}", path.display());
        return Ok(FeedConfig::load_from_file(path)?);
    }

    for candidate in DEFAULT_CONFIG_PATHS {
        let path = Path::new(candidate);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(FeedConfig::load_from_file(path)?);
        }
    }

    Ok(FeedConfig::from_env()?)
}

fn print_config(config: &FeedConfig) -> FeedResult<()> {
    let connection = config.connection.redacted();
    let rendered = serde_json::json!({
        "enabled": config.enabled,
        "brokerUrl": connection.broker_url(),
        "connection": connection,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&rendered).map_err(device_status_feed::DecodeError::from)?
    );
    Ok(())
}

fn print_log(entry: &LogEntry, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(&serde_json::json!({ "log": entry })) {
            println!("{line}");
        }
    } else {
        println!(
            "{} [{}] {}",
            entry.timestamp.format("%H:%M:%S%.3f"),
            entry.level,
            entry.message
        );
    }
}

async fn run_watch(
    config: &FeedConfig,
    topics: Vec<String>,
    logs: bool,
    json: bool,
) -> FeedResult<()> {
    for topic in &topics {
        validate_topic_filter(topic)
            .map_err(|e| device_status_feed::ClientError::invalid_topic(topic, e))?;
    }

    let client = PubSubClient::with_rumqttc(config.enabled_connection()?.clone())?;
    let store = FeedStore::new();
    let binding = store.attach(&client);

    // Latest phase, for noticing that reconnecting has given up
    let (phase_tx, mut phase_rx) = watch::channel(ConnectionPhase::Disconnected);
    let on_state = client.add_connection_listener(move |state| {
        let phase = state.phase();
        if json {
            if let Ok(line) = serde_json::to_string(&serde_json::json!({ "connection": state })) {
                println!("{line}");
            }
        } else {
            match &state.connection_error {
                Some(reason) if phase != ConnectionPhase::Connected => {
                    println!("connection: {phase} ({reason})")
                }
                _ => println!("connection: {phase}"),
            }
        }
        let _ = phase_tx.send(phase);
    });

    let on_message = client.add_message_listener(move |message| {
        if json {
            if let Ok(line) = serde_json::to_string(&serde_json::json!({ "message": message })) {
                println!("{line}");
            }
            return;
        }
        match &message.status {
            Some(status) => println!(
                "status: device {} {} ({})",
                status
                    .proxyid
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "?".to_string()),
                status.kind(),
                status.message
            ),
            None if is_status_topic(&message.topic) => {
                println!("status: undecodable update on {}", message.topic)
            }
            None => println!("{}: {}", message.topic, message.payload),
        }
    });

    let on_log = logs.then(|| client.add_log_listener(move |entry| print_log(entry, json)));

    let outcome = watch_until_stopped(&client, &topics, &mut phase_rx).await;

    if let Err(e) = client.disconnect().await {
        error!("Error during disconnect: {}", e);
    }
    info!(summary = ?store.summary(), "Feed closed");

    on_state.remove();
    on_message.remove();
    if let Some(handle) = on_log {
        handle.remove();
    }
    binding.detach();
    outcome
}

async fn watch_until_stopped(
    client: &PubSubClient,
    topics: &[String],
    phase_rx: &mut watch::Receiver<ConnectionPhase>,
) -> FeedResult<()> {
    if let Err(e) = client.connect().await {
        // A scheduled reconnect may still succeed
        if client.phase() != ConnectionPhase::Reconnecting {
            return Err(e.into());
        }
        error!("Initial connect failed, waiting for reconnect: {}", e);
    }

    for topic in topics {
        if client.is_connected() {
            client.subscribe(topic, QosLevel::AtMostOnce).await?;
        }
    }

    info!("Watching status feed, press Ctrl-C to stop");
    tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            info!("Received Ctrl-C, shutting down");
            Ok(())
        }
        reason = given_up(client, phase_rx) => Err(FeedError::Client(
            device_status_feed::ClientError::ConnectionFailed(reason),
        )),
    }
}

/// Resolves once the client is disconnected with no reconnect pending
async fn given_up(
    client: &PubSubClient,
    phase_rx: &mut watch::Receiver<ConnectionPhase>,
) -> String {
    loop {
        if phase_rx.changed().await.is_err() {
            return "Client dropped".to_string();
        }
        // Listeners see Disconnected before Reconnecting; ask the client
        let notified = *phase_rx.borrow();
        if notified == ConnectionPhase::Disconnected
            && client.phase() == ConnectionPhase::Disconnected
        {
            return "Connection lost and not reconnecting".to_string();
        }
    }
}

async fn run_publish(
    config: &FeedConfig,
    topic: &str,
    payload: String,
    qos: u8,
    retain: bool,
) -> FeedResult<()> {
    let qos = QosLevel::try_from(qos).map_err(device_status_feed::ClientError::from)?;
    let client = PubSubClient::with_rumqttc(config.enabled_connection()?.clone())?;

    client.connect().await?;
    let published = client.publish(topic, payload, qos, retain).await;
    client.disconnect().await?;
    published?;

    println!("published to {topic}");
    Ok(())
}
