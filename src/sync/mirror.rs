use crate::models::{PlayQueue, PlayQueueItem, Track, NO_QUEUE};

/// Projection of the adopted play queue as loaded into the audio engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackMirror {
    queue_id: u64,
    shuffled: bool,
    items: Vec<PlayQueueItem>,
    cursor: Option<usize>,
}

impl PlaybackMirror {
    pub fn adopt(&mut self, queue: &PlayQueue) {
        self.queue_id = queue.id;
        self.shuffled = queue.shuffled;
        self.items = queue.items.clone();
        self.cursor = queue.selected_index();
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn queue_id(&self) -> u64 {
        self.queue_id
    }

    pub fn shuffled(&self) -> bool {
        self.shuffled
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[PlayQueueItem] {
        &self.items
    }

    pub fn item_ids(&self) -> Vec<u64> {
        self.items.iter().map(|item| item.id).collect()
    }

    pub fn tracks(&self) -> Vec<Track> {
        self.items.iter().map(|item| item.track.clone()).collect()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn current(&self) -> Option<&PlayQueueItem> {
        self.cursor.and_then(|idx| self.items.get(idx))
    }

    /// True when the mirror is an exact projection of `queue`.
    pub fn matches(&self, queue: Option<&PlayQueue>) -> bool {
        match queue {
            None => self.queue_id == NO_QUEUE && self.items.is_empty() && self.cursor.is_none(),
            Some(queue) => {
                self.queue_id == queue.id
                    && self.items == queue.items
                    && self.cursor == queue.selected_index()
            }
        }
    }
}
