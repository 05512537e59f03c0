mod pipeline;

pub use pipeline::{MotionQueue, NotificationPipeline};
