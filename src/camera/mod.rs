mod client;
mod registry;
#[cfg(test)]
pub mod testing;
mod types;

pub use client::{discover_all, CameraApi, CameraClient, CameraError};
pub use registry::{CameraEntry, CameraRegistry, ListenerHandle, ListenerState};
pub use types::{BusSettings, Resolution};
