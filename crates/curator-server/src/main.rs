//! curatord, the unattended exhibit room controller
//!
//! Wires the pieces together for one room: deployment configuration, the
//! broker connection, the media player collaborators, the scene engine, and
//! the watchdog. The process runs until a termination signal arrives or the
//! watchdog declares a liveness failure; the latter exits with a distinct
//! code so the external process manager performs a full restart.

mod control;
mod media;
mod status;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use curator_config::Config;
use curator_engine::{
    engine_channel, CollaboratorError, Dispatcher, Executor, MessagePublisher,
};
use curator_monitor::{Monitor, MonitorSettings, RESTART_EXIT_CODE};
use curator_mqtt::{MqttClient, MqttSettings, ReconnectPolicy, RoomTopics};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Capacity of the inbound broker message queue
const INBOUND_QUEUE_CAPACITY: usize = 256;

/// How long shutdown waits for the engine's final exit actions
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Window for queued dispatch jobs to reach the broker before it closes
const DISPATCH_DRAIN: Duration = Duration::from_millis(250);

/// Window for the retained offline presence to go out
const OFFLINE_ANNOUNCE: Duration = Duration::from_millis(250);

/// Adapts the messaging client to the dispatcher's publish seam
struct EnginePublisher {
    client: MqttClient,
}

impl MessagePublisher for EnginePublisher {
    fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), CollaboratorError> {
        self.client.publish(topic, payload, retain)?;
        Ok(())
    }
}

fn mqtt_settings(config: &Config, topics: &RoomTopics) -> MqttSettings {
    MqttSettings {
        client_id: config.client_id(),
        primary_host: config.mqtt.primary_host.clone(),
        fallback_host: config.mqtt.fallback_host.clone(),
        port: config.mqtt.port,
        keep_alive: config.mqtt.keep_alive(),
        reconnect: ReconnectPolicy {
            first: Duration::from_secs(config.mqtt.reconnect_initial_secs),
            max: Duration::from_secs(config.mqtt.reconnect_max_secs),
            factor: 2.0,
        },
        fallback_after: config.mqtt.fallback_after,
        subscriptions: topics.subscriptions(),
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "curator.yaml".to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("loading configuration from {config_path}"))?;

    let filter = EnvFilter::try_new(&config.log_filter)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(room_id = %config.room_id, "Starting curatord");

    let shutdown = CancellationToken::new();
    // The transport outlives the engine during shutdown so final exit
    // actions still reach the hardware; its token is cancelled last.
    let transport_shutdown = CancellationToken::new();
    let topics = RoomTopics::new(config.room_id.as_str());

    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
    let mqtt = MqttClient::spawn(
        mqtt_settings(&config, &topics),
        inbound_tx,
        transport_shutdown.child_token(),
    );

    let (engine, events) = engine_channel();

    let audio = media::spawn_player(media::MediaKind::Audio, &config.media, engine.clone());
    let video = media::spawn_player(media::MediaKind::Video, &config.media, engine.clone());

    let dispatcher = Dispatcher::spawn(
        Arc::new(EnginePublisher {
            client: mqtt.clone(),
        }),
        Some(Arc::new(audio)),
        Some(Arc::new(video)),
        engine.clone(),
    );

    let executor = Executor::new(events, engine.clone(), dispatcher, shutdown.child_token());
    let status_watch = executor.status_watch();
    let heartbeat_watch = executor.heartbeat_watch();
    let executor_task = tokio::spawn(executor.run());

    let router = control::ControlRouter::new(
        config.room_id.as_str(),
        config.scenes.clone(),
        config.button.debounce(),
        engine.clone(),
    );
    tokio::spawn(router.run(inbound_rx));

    tokio::spawn(status::publish(
        config.client_id(),
        status_watch.clone(),
        mqtt.clone(),
        shutdown.child_token(),
    ));

    let monitor = Monitor::new(
        MonitorSettings {
            check_interval: config.monitor.check_interval(),
            heartbeat_timeout: config.monitor.heartbeat_timeout(),
            max_memory_mb: config.monitor.max_memory_mb,
            max_cpu_percent: config.monitor.max_cpu_percent,
        },
        heartbeat_watch,
        status_watch,
    );

    info!(room_id = %config.room_id, "System ready, awaiting scene commands");

    tokio::select! {
        signal = shutdown_signal() => {
            if let Err(e) = signal {
                error!(error = %e, "Signal handler failed");
            }
            info!("Shutdown requested");
        }
        failure = monitor.run() => {
            // The restart path skips graceful shutdown; recovery belongs to
            // the external process manager.
            error!(failure = %failure, "Liveness failure, requesting restart");
            return Ok(ExitCode::from(RESTART_EXIT_CODE as u8));
        }
    }

    // Cooperative shutdown: the engine finishes its exit actions first,
    // then the broker connection announces offline and closes.
    shutdown.cancel();
    if tokio::time::timeout(SHUTDOWN_GRACE, executor_task).await.is_err() {
        warn!("Executor did not stop in time");
    }
    tokio::time::sleep(DISPATCH_DRAIN).await;
    transport_shutdown.cancel();
    tokio::time::sleep(OFFLINE_ANNOUNCE).await;

    info!("curatord stopped cleanly");
    Ok(ExitCode::SUCCESS)
}
