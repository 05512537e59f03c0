use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::task::JoinSet;

use crate::config::CameraConfig;

use super::types::{
    self, BusSettings, EventDirectories, EventDirectoryEntry, EventFiles, Resolution,
};

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),
    #[error("camera returned HTTP {status} for {path}")]
    Status {
        path: String,
        status: u16,
    },
    #[error("malformed response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("camera bus config is missing {0}")]
    MissingSetting(&'static str),
    #[error("invalid camera url: {0}")]
    InvalidUrl(String),
}

impl CameraError {
    /// The camera answered, but not with something we understand.
    pub fn is_protocol(&self) -> bool {
        !matches!(self, CameraError::Unreachable(_))
    }
}

/// The fixed HTTP surface of a camera. Implementations hold no per-call state
/// and may be shared between the bus listener and command handlers.
#[async_trait]
pub trait CameraApi: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_config(&self, section: &str) -> Result<Map<String, Value>, CameraError>;

    async fn snapshot(
        &self,
        resolution: Resolution,
        watermark: bool,
    ) -> Result<Vec<u8>, CameraError>;

    async fn list_event_directories(&self) -> Result<Vec<EventDirectoryEntry>, CameraError>;

    async fn list_event_files(&self, dirname: &str) -> Result<EventFiles, CameraError>;

    async fn fetch_video(&self, path: &str) -> Result<Vec<u8>, CameraError>;
}

pub struct CameraClient {
    name: String,
    base_url: String,
    credentials: Option<(String, String)>,
    http: reqwest::Client,
}

impl CameraClient {
    pub fn new(config: &CameraConfig, timeout: Duration) -> Result<Self, CameraError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(CameraError::Unreachable)?;

        Ok(Self {
            name: config.name.clone(),
            base_url: config.base_url(),
            credentials: config
                .credentials()
                .map(|(user, pass)| (user.to_string(), pass.to_string())),
            http,
        })
    }

    /// Read the camera's own configuration and return its broker settings
    /// when the MQTT client is switched on.
    pub async fn discover_bus(&self) -> Result<Option<BusSettings>, CameraError> {
        let system = self.fetch_config("system").await?;
        if !types::bus_enabled(&system) {
            tracing::info!(camera = %self.name, "bus integration disabled on camera");
            return Ok(None);
        }

        let mqtt = self.fetch_config("mqtt").await?;
        BusSettings::from_config(&mqtt).map(Some)
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Vec<u8>, CameraError> {
        let url = reqwest::Url::parse_with_params(&format!("{}{}", self.base_url, path), query)
            .map_err(|e| CameraError::InvalidUrl(e.to_string()))?;
        let started = Instant::now();

        let mut request = self.http.get(url);
        if let Some((user, pass)) = &self.credentials {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request.send().await.map_err(CameraError::Unreachable)?;
        let status = response.status();
        tracing::debug!(
            camera = %self.name,
            path,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "camera response"
        );

        if !status.is_success() {
            return Err(CameraError::Status {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(CameraError::Unreachable)?;
        Ok(body.to_vec())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, CameraError> {
        let body = self.get(path, query).await?;
        serde_json::from_slice(&body).map_err(|source| CameraError::Decode {
            path: path.to_string(),
            source,
        })
    }
}

/// A camera client with the outcome of its bus discovery.
pub struct Discovered {
    pub client: Arc<CameraClient>,
    pub bus: Result<Option<BusSettings>, CameraError>,
}

/// Build a client for every camera and discover their bus settings
/// concurrently. Results keep the configured order; a camera whose client
/// cannot be built is left out.
pub async fn discover_all(cameras: &[CameraConfig], timeout: Duration) -> Vec<Discovered> {
    let mut probes = JoinSet::new();
    for (index, config) in cameras.iter().enumerate() {
        let client = match CameraClient::new(config, timeout) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                tracing::error!(camera = %config.name, "failed to create camera client: {}", e);
                continue;
            }
        };
        probes.spawn(async move {
            let bus = client.discover_bus().await;
            (index, Discovered { client, bus })
        });
    }

    let mut found = Vec::with_capacity(probes.len());
    while let Some(joined) = probes.join_next().await {
        match joined {
            Ok(probe) => found.push(probe),
            Err(e) => tracing::error!("camera discovery task failed: {}", e),
        }
    }
    found.sort_by_key(|(index, _)| *index);
    found.into_iter().map(|(_, discovered)| discovered).collect()
}

#[async_trait]
impl CameraApi for CameraClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_config(&self, section: &str) -> Result<Map<String, Value>, CameraError> {
        tracing::info!(camera = %self.name, section, "requesting config");
        self.get_json("/cgi-bin/get_configs.sh", &[("conf", section)])
            .await
    }

    async fn snapshot(
        &self,
        resolution: Resolution,
        watermark: bool,
    ) -> Result<Vec<u8>, CameraError> {
        tracing::info!(camera = %self.name, ?resolution, watermark, "requesting snapshot");
        let watermark = if watermark { "yes" } else { "no" };
        self.get(
            "/cgi-bin/snapshot.sh",
            &[("res", resolution.as_query()), ("watermark", watermark)],
        )
        .await
    }

    async fn list_event_directories(&self) -> Result<Vec<EventDirectoryEntry>, CameraError> {
        tracing::info!(camera = %self.name, "requesting event directories");
        let dirs: EventDirectories = self.get_json("/cgi-bin/eventsdir.sh", &[]).await?;
        Ok(dirs.records)
    }

    async fn list_event_files(&self, dirname: &str) -> Result<EventFiles, CameraError> {
        tracing::info!(camera = %self.name, dirname, "requesting event files");
        self.get_json("/cgi-bin/eventsfile.sh", &[("dirname", dirname)])
            .await
    }

    async fn fetch_video(&self, path: &str) -> Result<Vec<u8>, CameraError> {
        tracing::info!(camera = %self.name, path, "requesting video");
        let path = format!("/record/{}", path.trim_start_matches('/'));
        self.get(&path, &[]).await
    }
}
