use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;

use super::CameraApi;

/// Lifecycle of one camera's bus subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Stopped,
    Connecting,
    Subscribed,
    Disconnected,
}

/// Read side of a running listener, kept next to the camera it belongs to.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    state: watch::Receiver<ListenerState>,
}

impl ListenerHandle {
    pub fn new(state: watch::Receiver<ListenerState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }
}

pub struct CameraEntry {
    pub client: Arc<dyn CameraApi>,
    pub listener: Option<ListenerHandle>,
}

/// Cameras by name. Built once at startup and only read afterwards, so it is
/// shared behind a plain `Arc` without locking.
pub struct CameraRegistry {
    order: Vec<String>,
    cameras: HashMap<String, CameraEntry>,
}

impl CameraRegistry {
    pub fn new(entries: Vec<CameraEntry>) -> Self {
        let mut order = Vec::with_capacity(entries.len());
        let mut cameras = HashMap::with_capacity(entries.len());

        for entry in entries {
            let name = entry.client.name().to_string();
            if cameras.contains_key(&name) {
                tracing::warn!(camera = %name, "duplicate camera ignored");
                continue;
            }
            order.push(name.clone());
            cameras.insert(name, entry);
        }

        Self { order, cameras }
    }

    pub fn get(&self, name: &str) -> Option<&CameraEntry> {
        self.cameras.get(name)
    }

    pub fn client(&self, name: &str) -> Option<Arc<dyn CameraApi>> {
        self.get(name).map(|e| Arc::clone(&e.client))
    }

    /// Names in configuration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Cameras that have a bus listener attached.
    pub fn listening(&self) -> impl Iterator<Item = (&str, &ListenerHandle)> {
        self.order.iter().filter_map(|name| {
            let entry = self.cameras.get(name)?;
            entry.listener.as_ref().map(|l| (name.as_str(), l))
        })
    }
}
