use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bus::{MotionEvent, MotionImageEvent};
use crate::camera::{CameraApi, CameraError};
use crate::chat::{escape_html, ChatError, ChatId, MediaFile, Messenger};

/// Videos delivered per motion event; the rest of the list is ignored.
pub const MAX_MOTION_FILES: usize = 4;

const MOTION_IMAGE_CAPTION: &str = "Motion detected!";

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("fetch failed: {0}")]
    Camera(#[from] CameraError),
    #[error("send failed: {0}")]
    Chat(#[from] ChatError),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Fans motion notifications out to every recipient.
#[derive(Clone)]
pub struct NotificationPipeline {
    messenger: Arc<dyn Messenger>,
    recipients: Arc<[ChatId]>,
}

impl NotificationPipeline {
    pub fn new(messenger: Arc<dyn Messenger>, recipients: Vec<ChatId>) -> Self {
        Self {
            messenger,
            recipients: recipients.into(),
        }
    }

    /// Status message plus a grouped video reply per recipient. A failure is
    /// logged and only abandons that recipient's batch.
    pub async fn deliver_motion(
        &self,
        camera: &dyn CameraApi,
        event: &MotionEvent,
    ) -> DeliveryReport {
        let files = selected_files(event);
        tracing::info!(
            camera = %camera.name(),
            start = %event.start,
            end = %event.end,
            total = event.files.len(),
            selected = files.len(),
            "delivering motion event"
        );

        let mut report = DeliveryReport::default();
        for &chat in self.recipients.iter() {
            match self.deliver_to(camera, event, files, chat).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        camera = %camera.name(),
                        chat = %chat,
                        "motion delivery abandoned: {}",
                        e
                    );
                }
            }
        }
        report
    }

    async fn deliver_to(
        &self,
        camera: &dyn CameraApi,
        event: &MotionEvent,
        files: &[String],
        chat: ChatId,
    ) -> Result<(), DeliveryError> {
        let status = self
            .messenger
            .send_text(chat, &status_text(event, files.len()), None)
            .await?;

        if files.is_empty() {
            return Ok(());
        }

        let mut videos = Vec::with_capacity(files.len());
        for path in files {
            let data = camera.fetch_video(path).await?;
            let name = path.rsplit('/').next().unwrap_or(path);
            videos.push(
                MediaFile::new(name, data)
                    .with_caption(format!("<code>{}</code>", escape_html(path))),
            );
        }

        self.messenger
            .send_media_group(chat, videos, Some(status))
            .await?;
        Ok(())
    }

    /// Forward the detection snapshot as-is to every recipient.
    pub async fn deliver_image(&self, camera: &str, event: &MotionImageEvent) -> DeliveryReport {
        tracing::info!(camera = %camera, size = event.image.len(), "delivering motion image");

        let mut report = DeliveryReport::default();
        for &chat in self.recipients.iter() {
            let photo = MediaFile::new(format!("{camera}.jpg"), event.image.clone())
                .with_caption(MOTION_IMAGE_CAPTION);
            match self.messenger.send_photo(chat, photo, None).await {
                Ok(_) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(camera = %camera, chat = %chat, "motion image not sent: {}", e);
                }
            }
        }
        report
    }
}

fn selected_files(event: &MotionEvent) -> &[String] {
    &event.files[..event.files.len().min(MAX_MOTION_FILES)]
}

fn status_text(event: &MotionEvent, count: usize) -> String {
    format!(
        "<b>Motion end</b>\n- Start: <code>{}</code>\n- End: <code>{}</code>\nFetching {} videos, please wait...",
        escape_html(&event.start),
        escape_html(&event.end),
        count
    )
}

/// Per-camera queue in front of the pipeline. One worker drains it, so a
/// camera never has more than one delivery in flight.
#[derive(Clone)]
pub struct MotionQueue {
    camera: String,
    tx: mpsc::Sender<MotionEvent>,
}

impl MotionQueue {
    pub fn spawn(
        camera: Arc<dyn CameraApi>,
        pipeline: NotificationPipeline,
        depth: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<MotionEvent>(depth.max(1));
        let name = camera.name().to_string();

        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let report = pipeline.deliver_motion(camera.as_ref(), &event).await;
                tracing::debug!(
                    camera = %camera.name(),
                    delivered = report.delivered,
                    failed = report.failed,
                    "motion event done"
                );
            }
            tracing::debug!(camera = %camera.name(), "motion queue drained");
        });

        (Self { camera: name, tx }, worker)
    }

    /// Enqueue without waiting. Returns false when the event was dropped.
    pub fn submit(&self, event: MotionEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(
                    camera = %self.camera,
                    start = %event.start,
                    "motion queue full, event dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(camera = %self.camera, "motion queue closed, event dropped");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::testing::FakeCamera;
    use crate::chat::testing::{RecordingMessenger, Sent};

    fn event(files: &[&str]) -> MotionEvent {
        MotionEvent {
            start: "12:00:00".into(),
            end: "12:01:00".into(),
            files: files.iter().map(|f| f.to_string()).collect(),
        }
    }

    fn tally(delivered: usize, failed: usize) -> DeliveryReport {
        DeliveryReport { delivered, failed }
    }

    fn pipeline(messenger: &Arc<RecordingMessenger>, recipients: &[i64]) -> NotificationPipeline {
        NotificationPipeline::new(
            Arc::clone(messenger) as Arc<dyn Messenger>,
            recipients.iter().map(|&c| ChatId(c)).collect(),
        )
    }

    #[tokio::test]
    async fn test_truncates_to_first_four_files() {
        let messenger = Arc::new(RecordingMessenger::new());
        let camera = FakeCamera::new("camA");
        let files = [
            "d/1.mp4", "d/2.mp4", "d/3.mp4", "d/4.mp4", "d/5.mp4", "d/6.mp4",
        ];

        let report = pipeline(&messenger, &[1])
            .deliver_motion(&camera, &event(&files))
            .await;

        assert_eq!(report, tally(1, 0));
        assert_eq!(
            camera.calls(),
            vec![
                "video:d/1.mp4",
                "video:d/2.mp4",
                "video:d/3.mp4",
                "video:d/4.mp4"
            ]
        );

        let sent = messenger.sent();
        assert_eq!(sent.len(), 2);
        match &sent[0] {
            Sent::Text { text, .. } => assert!(text.contains("Fetching 4 videos")),
            other => panic!("expected status text, got {other:?}"),
        }
        assert_eq!(
            sent[1],
            Sent::Group {
                chat: 1,
                names: vec![
                    "1.mp4".into(),
                    "2.mp4".into(),
                    "3.mp4".into(),
                    "4.mp4".into()
                ],
                reply_to: Some(1),
            }
        );
    }

    #[tokio::test]
    async fn test_each_recipient_gets_status_and_group() {
        let messenger = Arc::new(RecordingMessenger::new());
        let camera = FakeCamera::new("camA");

        let report = pipeline(&messenger, &[1, 2, 3])
            .deliver_motion(&camera, &event(&["d/1.mp4", "d/2.mp4"]))
            .await;

        assert_eq!(report.delivered, 3);
        let sent = messenger.sent();
        for chat in [1, 2, 3] {
            let per_chat: Vec<&Sent> = sent.iter().filter(|s| s.chat() == chat).collect();
            assert_eq!(per_chat.len(), 2);
            assert!(matches!(per_chat[0], Sent::Text { .. }));
            assert!(matches!(per_chat[1], Sent::Group { names, .. } if names.len() == 2));
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_abandons_batch_and_continues() {
        let messenger = Arc::new(RecordingMessenger::new());
        let camera = FakeCamera::new("camA").with_broken_video("d/2.mp4");

        let report = pipeline(&messenger, &[1, 2])
            .deliver_motion(&camera, &event(&["d/1.mp4", "d/2.mp4"]))
            .await;

        assert_eq!(report, tally(0, 2));
        let sent = messenger.sent();
        let statuses = sent.iter().filter(|s| matches!(s, Sent::Text { .. }));
        assert_eq!(statuses.count(), 2);
        assert!(!sent.iter().any(|s| matches!(s, Sent::Group { .. })));
    }

    #[tokio::test]
    async fn test_blocked_recipient_does_not_stop_others() {
        let messenger = Arc::new(RecordingMessenger::new().failing_for(1));
        let camera = FakeCamera::new("camA");

        let report = pipeline(&messenger, &[1, 2])
            .deliver_motion(&camera, &event(&["d/1.mp4"]))
            .await;

        assert_eq!(report, tally(1, 1));
        let sent = messenger.sent();
        assert!(sent.iter().any(|s| matches!(s, Sent::Group { chat: 2, .. })));
    }

    #[tokio::test]
    async fn test_fetch_failure_for_one_recipient_spares_the_next() {
        let messenger = Arc::new(RecordingMessenger::new());
        let camera = FakeCamera::new("camA").with_flaky_video("d/2.mp4");

        let report = pipeline(&messenger, &[1, 2])
            .deliver_motion(&camera, &event(&["d/1.mp4", "d/2.mp4"]))
            .await;

        assert_eq!(report, tally(1, 1));
        assert_eq!(camera.count("video"), 4);
        let sent = messenger.sent();
        assert!(!sent.iter().any(|s| matches!(s, Sent::Group { chat: 1, .. })));
        assert_eq!(
            sent.last(),
            Some(&Sent::Group {
                chat: 2,
                names: vec!["1.mp4".into(), "2.mp4".into()],
                reply_to: Some(2),
            })
        );
    }

    #[tokio::test]
    async fn test_event_without_files_only_sends_status() {
        let messenger = Arc::new(RecordingMessenger::new());
        let camera = FakeCamera::new("camA");

        pipeline(&messenger, &[1])
            .deliver_motion(&camera, &event(&[]))
            .await;

        assert!(camera.calls().is_empty());
        assert_eq!(messenger.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_motion_image_goes_to_everyone() {
        let messenger = Arc::new(RecordingMessenger::new().failing_for(2));
        let image = MotionImageEvent {
            image: vec![0xff, 0xd8],
        };

        let report = pipeline(&messenger, &[1, 2, 3])
            .deliver_image("camA", &image)
            .await;

        assert_eq!(report, tally(2, 1));
        assert_eq!(
            messenger.sent()[0],
            Sent::Photo {
                chat: 1,
                caption: Some(MOTION_IMAGE_CAPTION.into()),
            }
        );
    }

    #[tokio::test]
    async fn test_queue_drains_after_senders_drop() {
        let messenger = Arc::new(RecordingMessenger::new());
        let camera = Arc::new(FakeCamera::new("camA"));
        let (queue, worker) = MotionQueue::spawn(
            Arc::clone(&camera) as Arc<dyn CameraApi>,
            pipeline(&messenger, &[1]),
            4,
        );

        assert!(queue.submit(event(&["a/1.mp4"])));
        assert!(queue.submit(event(&["b/1.mp4"])));
        drop(queue);
        worker.await.unwrap();

        // one at a time, in submission order
        assert_eq!(camera.calls(), vec!["video:a/1.mp4", "video:b/1.mp4"]);
        assert_eq!(messenger.sent().len(), 4);
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let messenger = Arc::new(RecordingMessenger::new());
        let camera = Arc::new(FakeCamera::new("camA"));
        let (queue, worker) = MotionQueue::spawn(
            Arc::clone(&camera) as Arc<dyn CameraApi>,
            pipeline(&messenger, &[1]),
            1,
        );

        // current-thread runtime: the worker cannot run until we yield
        assert!(queue.submit(event(&["a/1.mp4"])));
        assert!(!queue.submit(event(&["b/1.mp4"])));
        drop(queue);
        worker.await.unwrap();

        assert_eq!(camera.calls(), vec!["video:a/1.mp4"]);
    }
}
