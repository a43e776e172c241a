//! Ordered, fire-and-forget delivery of playback-state reports.
//!
//! The server closes one listening session and opens the next from the
//! sequence of reports it receives, so events are delivered by a single
//! worker strictly in submission order. Callers never wait on the network:
//! `report` only enqueues, and failed deliveries are logged and dropped.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::api::TimelineApi;
use crate::models::TimelineEvent;

enum TimelineMessage {
    Event(TimelineEvent),
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct TimelineReporter {
    tx: Option<mpsc::UnboundedSender<TimelineMessage>>,
}

impl TimelineReporter {
    /// Starts the delivery worker on the current tokio runtime.
    pub fn spawn(api: Arc<dyn TimelineApi>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(delivery_loop(api, rx));
        Self { tx: Some(tx) }
    }

    /// Reporter that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn report(&self, event: TimelineEvent) {
        let Some(tx) = &self.tx else {
            return;
        };

        log::debug!(
            "[Timeline] Queueing {} for item {} at {}ms",
            event.state,
            event.item_id,
            event.position_ms
        );

        if tx.send(TimelineMessage::Event(event)).is_err() {
            log::warn!("[Timeline] Delivery loop is gone, dropping report");
        }
    }

    /// Resolves once every event reported before this call has been attempted.
    pub async fn flush(&self) {
        let Some(tx) = &self.tx else {
            return;
        };
        let (done_tx, done_rx) = oneshot::channel();
        if tx.send(TimelineMessage::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn delivery_loop(
    api: Arc<dyn TimelineApi>,
    mut rx: mpsc::UnboundedReceiver<TimelineMessage>,
) {
    log::info!("[Timeline] Delivery loop started");

    while let Some(message) = rx.recv().await {
        match message {
            TimelineMessage::Event(event) => {
                if let Err(e) = api.report_timeline(&event).await {
                    log::warn!(
                        "[Timeline] Lost {} report for item {}: {}",
                        event.state,
                        event.item_id,
                        e
                    );
                }
            }
            TimelineMessage::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    log::info!("[Timeline] Delivery loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::track;
    use crate::models::PlaybackState;
    use crate::testing::RecordingTimeline;

    fn event(item_id: u64, state: PlaybackState) -> TimelineEvent {
        TimelineEvent {
            queue_id: 7,
            item_id,
            state,
            position_ms: 0,
            track: track(item_id),
        }
    }

    #[tokio::test]
    async fn test_delivers_in_order() {
        let sink = Arc::new(RecordingTimeline::default());
        let reporter = TimelineReporter::spawn(sink.clone());

        reporter.report(event(1, PlaybackState::Stopped));
        reporter.report(event(2, PlaybackState::Playing));
        reporter.report(event(2, PlaybackState::Paused));
        reporter.flush().await;

        assert_eq!(
            sink.calls(),
            vec![
                (1, PlaybackState::Stopped),
                (2, PlaybackState::Playing),
                (2, PlaybackState::Paused)
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_delivery() {
        let sink = Arc::new(RecordingTimeline::failing_for(1));
        let reporter = TimelineReporter::spawn(sink.clone());

        reporter.report(event(1, PlaybackState::Stopped));
        reporter.report(event(2, PlaybackState::Playing));
        reporter.flush().await;

        assert_eq!(
            sink.calls(),
            vec![(1, PlaybackState::Stopped), (2, PlaybackState::Playing)]
        );
        assert_eq!(sink.delivered(), vec![(2, PlaybackState::Playing)]);
    }

    #[tokio::test]
    async fn test_disabled_reporter_is_inert() {
        let reporter = TimelineReporter::disabled();
        reporter.report(event(1, PlaybackState::Playing));
        reporter.flush().await;
    }
}
