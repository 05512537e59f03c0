use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use thiserror::Error;

use crate::camera::BusSettings;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const REQUEST_CAPACITY: usize = 16;
/// Motion snapshots arrive as single publishes.
const MAX_INCOMING_PACKET: usize = 8 * 1024 * 1024;
const MAX_OUTGOING_PACKET: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus disconnected: {0}")]
    Disconnected(String),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// Broker accepted the connection.
    Connected {
        session_present: bool,
    },
    Message {
        topic: String,
        payload: Vec<u8>,
    },
    Other,
}

/// A broker session that transparently reconnects on the next poll after an
/// error.
#[async_trait]
pub trait BusConnection: Send {
    async fn subscribe(&mut self, filter: &str) -> Result<(), BusError>;

    async fn next_event(&mut self) -> Result<BusEvent, BusError>;
}

pub struct MqttConnection {
    client: AsyncClient,
    eventloop: EventLoop,
}

impl MqttConnection {
    pub fn new(camera: &str, settings: &BusSettings) -> Self {
        let mut options = MqttOptions::new(
            format!("yicam-bridge-{camera}"),
            settings.host.clone(),
            settings.port,
        );
        options
            .set_keep_alive(KEEP_ALIVE)
            .set_clean_session(true)
            .set_max_packet_size(MAX_INCOMING_PACKET, MAX_OUTGOING_PACKET);
        if let Some(username) = &settings.username {
            options.set_credentials(
                username.clone(),
                settings.password.clone().unwrap_or_default(),
            );
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        Self { client, eventloop }
    }
}

#[async_trait]
impl BusConnection for MqttConnection {
    async fn subscribe(&mut self, filter: &str) -> Result<(), BusError> {
        self.client
            .subscribe(filter, QoS::AtMostOnce)
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))
    }

    async fn next_event(&mut self) -> Result<BusEvent, BusError> {
        match self.eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => Ok(BusEvent::Connected {
                session_present: ack.session_present,
            }),
            Ok(Event::Incoming(Packet::Publish(publish))) => Ok(BusEvent::Message {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            }),
            Ok(_) => Ok(BusEvent::Other),
            Err(e) => Err(BusError::Disconnected(e.to_string())),
        }
    }
}
