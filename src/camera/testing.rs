use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::types::{EventDirectoryEntry, EventFileEntry, EventFiles};
use super::{CameraApi, CameraError, Resolution};

/// In-memory camera that records every call made against it.
pub struct FakeCamera {
    name: String,
    directories: Vec<EventDirectoryEntry>,
    files: HashMap<String, Vec<EventFileEntry>>,
    broken_videos: HashSet<String>,
    flaky_videos: Mutex<HashSet<String>>,
    snapshot_delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl FakeCamera {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            directories: Vec::new(),
            files: HashMap::new(),
            broken_videos: HashSet::new(),
            flaky_videos: Mutex::new(HashSet::new()),
            snapshot_delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_directory(mut self, dirname: &str, files: &[&str]) -> Self {
        self.directories.push(EventDirectoryEntry {
            datetime: format!("Date: {dirname}"),
            dirname: dirname.to_string(),
        });
        self.files.insert(
            dirname.to_string(),
            files
                .iter()
                .map(|f| EventFileEntry {
                    time: "00:00".to_string(),
                    filename: f.to_string(),
                })
                .collect(),
        );
        self
    }

    pub fn with_broken_video(mut self, path: &str) -> Self {
        self.broken_videos.insert(path.to_string());
        self
    }

    /// The first fetch of `path` fails, later ones succeed.
    pub fn with_flaky_video(self, path: &str) -> Self {
        self.flaky_videos.lock().unwrap().insert(path.to_string());
        self
    }

    pub fn with_snapshot_delay(mut self, delay: Duration) -> Self {
        self.snapshot_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl CameraApi for FakeCamera {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_config(&self, section: &str) -> Result<Map<String, Value>, CameraError> {
        self.record(format!("config:{section}"));
        Ok(Map::new())
    }

    async fn snapshot(
        &self,
        resolution: Resolution,
        watermark: bool,
    ) -> Result<Vec<u8>, CameraError> {
        self.record(format!("snapshot:{}:{watermark}", resolution.as_query()));
        if let Some(delay) = self.snapshot_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(format!("jpeg:{}", self.name).into_bytes())
    }

    async fn list_event_directories(&self) -> Result<Vec<EventDirectoryEntry>, CameraError> {
        self.record("eventsdir".to_string());
        Ok(self.directories.clone())
    }

    async fn list_event_files(&self, dirname: &str) -> Result<EventFiles, CameraError> {
        self.record(format!("eventsfile:{dirname}"));
        Ok(EventFiles {
            date: dirname.to_string(),
            records: self.files.get(dirname).cloned().unwrap_or_default(),
        })
    }

    async fn fetch_video(&self, path: &str) -> Result<Vec<u8>, CameraError> {
        self.record(format!("video:{path}"));
        let flaky = self.flaky_videos.lock().unwrap().remove(path);
        if flaky || self.broken_videos.contains(path) {
            return Err(CameraError::Status {
                path: path.to_string(),
                status: 500,
            });
        }
        Ok(format!("mp4:{path}").into_bytes())
    }
}
