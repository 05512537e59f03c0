mod connection;
mod listener;
mod message;

pub use connection::MqttConnection;
pub use listener::{spawn_supervised, ListenerContext};
pub use message::{MotionEvent, MotionImageEvent, Topics};
