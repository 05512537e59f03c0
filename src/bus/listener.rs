use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::camera::{ListenerHandle, ListenerState};
use crate::notify::{MotionQueue, NotificationPipeline};

use super::connection::{BusConnection, BusError, BusEvent};
use super::message::{BusMessage, Topics};

/// Everything a listener needs besides its connection. Survives restarts.
#[derive(Clone)]
pub struct ListenerContext {
    pub camera: String,
    pub topics: Topics,
    pub queue: MotionQueue,
    pub pipeline: NotificationPipeline,
    pub reconnect_delay: Duration,
}

/// Owns one camera's broker session and routes what arrives on it.
pub struct BusListener<C> {
    ctx: ListenerContext,
    connection: C,
    state: Arc<watch::Sender<ListenerState>>,
    subscribed: bool,
}

impl<C: BusConnection> BusListener<C> {
    pub fn new(
        ctx: ListenerContext,
        connection: C,
        state: Arc<watch::Sender<ListenerState>>,
    ) -> Self {
        Self {
            ctx,
            connection,
            state,
            subscribed: false,
        }
    }

    fn set_state(&self, state: ListenerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(camera = %self.ctx.camera, ?previous, ?state, "listener state");
        }
    }

    /// Runs until `cancel` fires. Connection loss only ever leads back to
    /// `Connecting`.
    pub async fn run(mut self, cancel: CancellationToken) {
        self.set_state(ListenerState::Connecting);
        tracing::info!(camera = %self.ctx.camera, "connecting to bus");

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = self.connection.next_event() => event,
            };

            let result = match event {
                Ok(BusEvent::Connected { session_present }) => {
                    self.on_connected(session_present).await
                }
                Ok(BusEvent::Message { topic, payload }) => {
                    self.on_message(&topic, &payload).await;
                    Ok(())
                }
                Ok(BusEvent::Other) => Ok(()),
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                tracing::warn!(camera = %self.ctx.camera, "{}", e);
                self.set_state(ListenerState::Disconnected);

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.ctx.reconnect_delay) => {}
                }
                tracing::info!(camera = %self.ctx.camera, "reconnecting to bus");
                self.set_state(ListenerState::Connecting);
            }
        }

        self.set_state(ListenerState::Stopped);
        tracing::info!(camera = %self.ctx.camera, "bus listener stopped");
    }

    /// Subscribe once per fresh session; a resumed session keeps its filter.
    async fn on_connected(&mut self, session_present: bool) -> Result<(), BusError> {
        if !(session_present && self.subscribed) {
            let filter = self.ctx.topics.subscription();
            self.connection.subscribe(&filter).await?;
            tracing::info!(camera = %self.ctx.camera, filter = %filter, "subscribed");
        }
        self.subscribed = true;
        self.set_state(ListenerState::Subscribed);
        Ok(())
    }

    // `&mut self` keeps the future `Send` for connections that are not `Sync`.
    async fn on_message(&mut self, topic: &str, payload: &[u8]) {
        tracing::debug!(
            camera = %self.ctx.camera,
            topic,
            size = payload.len(),
            "bus message"
        );

        match self.ctx.topics.decode(topic, payload) {
            Ok(BusMessage::MotionFiles(event)) => {
                self.ctx.queue.submit(event);
            }
            Ok(BusMessage::MotionImage(image)) => {
                self.ctx
                    .pipeline
                    .deliver_image(&self.ctx.camera, &image)
                    .await;
            }
            Ok(BusMessage::Other) => {
                tracing::debug!(camera = %self.ctx.camera, topic, "ignoring topic");
            }
            Err(e) => {
                tracing::warn!(
                    camera = %self.ctx.camera,
                    topic,
                    "undecodable motion payload: {}",
                    e
                );
            }
        }
    }
}

/// Start a listener under a supervisor that restarts it after a panic.
/// `connect` builds a fresh connection for every (re)start.
pub fn spawn_supervised<C, F>(
    ctx: ListenerContext,
    connect: F,
    cancel: CancellationToken,
) -> (ListenerHandle, JoinHandle<()>)
where
    C: BusConnection + 'static,
    F: Fn() -> C + Send + 'static,
{
    let (tx, rx) = watch::channel(ListenerState::Stopped);
    let state = Arc::new(tx);

    let supervisor = tokio::spawn(async move {
        loop {
            let listener = BusListener::new(ctx.clone(), connect(), Arc::clone(&state));
            let task = tokio::spawn(listener.run(cancel.clone()));

            match task.await {
                Ok(()) => break,
                Err(e) if e.is_panic() => {
                    tracing::error!(camera = %ctx.camera, "bus listener crashed, restarting");
                    state.send_replace(ListenerState::Disconnected);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(ctx.reconnect_delay) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(camera = %ctx.camera, "bus listener aborted: {}", e);
                    break;
                }
            }
        }
        state.send_replace(ListenerState::Stopped);
    });

    (ListenerHandle::new(rx), supervisor)
}
