use async_trait::async_trait;

use crate::errors::QueueError;
use crate::models::{MovePosition, PlayQueue, ShuffleMode, SourceSelector, TimelineEvent};

/// Request/response access to the server's play-queue resource.
///
/// Implementations hold no queue state. Every call returns the server's full
/// snapshot after the operation, which the caller adopts wholesale.
#[async_trait]
pub trait PlayQueueApi: Send + Sync {
    /// Fails with `QueueGone` when the server has expired `queue_id`.
    async fn fetch_queue(&self, queue_id: u64) -> Result<PlayQueue, QueueError>;

    async fn create_queue(
        &self,
        source: &SourceSelector,
        shuffle: bool,
    ) -> Result<PlayQueue, QueueError>;

    /// Appends `source` to the end, or right after the selected item when
    /// `play_next` is set.
    async fn add_items(
        &self,
        queue_id: u64,
        source: &SourceSelector,
        play_next: bool,
    ) -> Result<PlayQueue, QueueError>;

    /// Relocates `item_ids` as one contiguous block, in the order given.
    async fn move_items(
        &self,
        queue_id: u64,
        item_ids: &[u64],
        position: MovePosition,
    ) -> Result<PlayQueue, QueueError>;

    async fn remove_items(&self, queue_id: u64, item_ids: &[u64])
        -> Result<PlayQueue, QueueError>;

    /// With `preserve_current` the selected item stays selected, wherever it
    /// lands in the new order.
    async fn set_shuffle(
        &self,
        queue_id: u64,
        mode: ShuffleMode,
        preserve_current: bool,
    ) -> Result<PlayQueue, QueueError>;

    /// Points the server's selection at `item_id`.
    async fn select_item(&self, queue_id: u64, item_id: u64) -> Result<PlayQueue, QueueError>;
}

#[async_trait]
pub trait TimelineApi: Send + Sync {
    async fn report_timeline(&self, event: &TimelineEvent) -> Result<(), QueueError>;
}

/// Checks a move request before anything is sent.
pub fn validate_move(item_ids: &[u64], position: MovePosition) -> Result<(), QueueError> {
    if item_ids.is_empty() {
        return Err(QueueError::InvalidRequest("No items to move".to_string()));
    }
    if let MovePosition::After(target) = position {
        if item_ids.contains(&target) {
            return Err(QueueError::InvalidRequest(format!(
                "Cannot move item {} after itself",
                target
            )));
        }
    }
    Ok(())
}
