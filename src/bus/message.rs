use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// End of a motion episode, published on `{prefix}/motion_files`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MotionEvent {
    #[serde(default, deserialize_with = "loose_string")]
    pub start: String,
    #[serde(default, deserialize_with = "loose_string")]
    pub end: String,
    /// Recording paths relative to `/record`, oldest first.
    #[serde(default)]
    pub files: Vec<String>,
}

/// JPEG published on `{prefix}/motion_detection_image`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionImageEvent {
    pub image: Vec<u8>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum BusMessage {
    MotionFiles(MotionEvent),
    MotionImage(MotionImageEvent),
    /// Anything else under the camera's prefix.
    Other,
}

/// Topic names inside one camera's namespace.
#[derive(Debug, Clone)]
pub struct Topics {
    prefix: String,
    motion_files: String,
    motion_image: String,
}

impl Topics {
    pub fn new(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        Self {
            prefix: prefix.to_string(),
            motion_files: format!("{prefix}/motion_files"),
            motion_image: format!("{prefix}/motion_detection_image"),
        }
    }

    /// Wildcard filter over the whole namespace.
    pub fn subscription(&self) -> String {
        format!("{}/#", self.prefix)
    }

    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<BusMessage, serde_json::Error> {
        if topic == self.motion_files {
            serde_json::from_slice(payload).map(BusMessage::MotionFiles)
        } else if topic == self.motion_image {
            Ok(BusMessage::MotionImage(MotionImageEvent {
                image: payload.to_vec(),
            }))
        } else {
            Ok(BusMessage::Other)
        }
    }
}

fn loose_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}
