use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod bus;
mod camera;
mod chat;
mod config;
mod notify;

use bus::{ListenerContext, MqttConnection, Topics};
use camera::{BusSettings, CameraApi, CameraClient, CameraEntry, CameraRegistry, ListenerHandle};
use chat::{ChatId, CommandRouter, Messenger, TelegramBot};
use config::{BusConfig, Config};
use notify::{MotionQueue, NotificationPipeline};

struct RunningListener {
    handle: ListenerHandle,
    supervisor: JoinHandle<()>,
    worker: JoinHandle<()>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("yicam_bridge=debug".parse()?))
        .init();

    let config = Config::load()?;
    tracing::info!(
        cameras = config.cameras.len(),
        recipients = config.telegram.chat_ids.len(),
        "loaded config"
    );

    let recipients: Vec<ChatId> = config
        .telegram
        .chat_ids
        .iter()
        .map(|&id| ChatId(id))
        .collect();
    let bot = Arc::new(TelegramBot::new(
        &config.telegram.bot_token,
        Duration::from_secs(config.telegram.poll_timeout_secs),
    )?);
    let messenger: Arc<dyn Messenger> = bot.clone();
    let pipeline = NotificationPipeline::new(Arc::clone(&messenger), recipients.clone());

    let cancel = CancellationToken::new();
    let mut entries = Vec::with_capacity(config.cameras.len());
    let mut supervisors = Vec::new();
    let mut workers = Vec::new();

    let timeout = config.http.timeout();
    for found in camera::discover_all(&config.cameras, timeout).await {
        let listener = match found.bus {
            Ok(Some(settings)) => {
                let running = start_listener(
                    &found.client,
                    settings,
                    &pipeline,
                    &config.bus,
                    cancel.clone(),
                );
                supervisors.push(running.supervisor);
                workers.push(running.worker);
                Some(running.handle)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(
                    camera = %found.client.name(),
                    "could not read camera config, bus integration disabled: {}",
                    e
                );
                None
            }
        };

        entries.push(CameraEntry {
            client: found.client,
            listener,
        });
    }

    let registry = Arc::new(CameraRegistry::new(entries));
    tracing::info!(
        cameras = registry.len(),
        listening = registry.listening().count(),
        "camera registry ready"
    );

    let router = Arc::new(CommandRouter::new(
        Arc::clone(&registry),
        messenger,
        &recipients,
    ));
    let poller = tokio::spawn(Arc::clone(&bot).poll_commands(router, cancel.clone()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    cancel.cancel();

    for supervisor in supervisors {
        if let Err(e) = supervisor.await {
            tracing::error!("listener supervisor failed: {}", e);
        }
    }
    if let Err(e) = poller.await {
        tracing::error!("command poller failed: {}", e);
    }

    for (name, handle) in registry.listening() {
        tracing::debug!(camera = %name, state = ?handle.state(), "bus listener finished");
    }

    // Listeners are gone, so the queues are closed; let queued deliveries finish.
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!("motion worker failed: {}", e);
        }
    }

    tracing::info!("shutdown complete");
    Ok(())
}

fn start_listener(
    client: &Arc<CameraClient>,
    settings: BusSettings,
    pipeline: &NotificationPipeline,
    bus_config: &BusConfig,
    cancel: CancellationToken,
) -> RunningListener {
    let camera = client.name().to_string();
    let (queue, worker) = MotionQueue::spawn(
        Arc::clone(client) as Arc<dyn CameraApi>,
        pipeline.clone(),
        bus_config.queue_depth,
    );

    tracing::info!(
        camera = %camera,
        broker = %format!("{}:{}", settings.host, settings.port),
        prefix = %settings.prefix,
        "starting bus listener"
    );

    let ctx = ListenerContext {
        camera: camera.clone(),
        topics: Topics::new(&settings.prefix),
        queue,
        pipeline: pipeline.clone(),
        reconnect_delay: bus_config.reconnect_delay(),
    };
    let (handle, supervisor) = bus::spawn_supervised(
        ctx,
        move || MqttConnection::new(&camera, &settings),
        cancel,
    );

    RunningListener {
        handle,
        supervisor,
        worker,
    }
}
