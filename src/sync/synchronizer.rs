use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::api::PlayQueueApi;
use crate::config::SyncConfig;
use crate::engine::AudioEngine;
use crate::errors::QueueError;
use crate::models::{
    MovePosition, PlayQueue, PlayQueueItem, Playable, PlaybackState, ShuffleMode, SourceKind,
    SourceSelector, TimelineEvent, Track, NO_QUEUE,
};
use crate::timeline::TimelineReporter;

use super::mirror::PlaybackMirror;
use super::reconcile::{self, Patch};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Idle,
    Mutating,
    Reconciling,
}

/// Notifications for whatever UI sits on top of the synchronizer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    QueueChanged {
        queue_id: u64,
        selected_item_id: Option<u64>,
        version: u32,
    },
    QueueEnded {
        queue_id: u64,
        reason: String,
    },
    PlaybackEnded {
        queue_id: u64,
    },
    MutationFailed {
        queue_id: u64,
        operation: String,
        error: QueueError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PreviousOutcome {
    /// The current item was re-cued at position 0.
    Restarted,
    /// The selection moved back one item.
    Moved(PlayQueue),
}

struct SyncInner {
    phase: SyncPhase,
    /// Bumped whenever a new queue supersedes the current one. Responses
    /// issued under an older epoch are discarded.
    epoch: u64,
    queue: Option<PlayQueue>,
    mirror: PlaybackMirror,
}

/// Returns the phase to `Idle` if the owning operation is dropped mid-flight.
struct MutationGuard<'a> {
    inner: &'a Mutex<SyncInner>,
    epoch: u64,
    queue_id: u64,
    creation: bool,
    armed: bool,
}

impl MutationGuard<'_> {
    /// Hands phase bookkeeping over to the caller. Must be called before
    /// taking the state lock, since `Drop` takes it too.
    fn disarm(mut self) -> (u64, u64, bool) {
        self.armed = false;
        (self.epoch, self.queue_id, self.creation)
    }
}

impl Drop for MutationGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.epoch == self.epoch && inner.phase != SyncPhase::Idle {
            inner.phase = SyncPhase::Idle;
        }
    }
}

/// Owns the adopted play queue and the engine's loaded list, and keeps them
/// consistent across every queue mutation.
///
/// Mutations are serialized: while one is in flight, another fails with
/// [`QueueError::Busy`]. Creating a queue is always accepted and supersedes
/// whatever is in flight.
pub struct QueueSynchronizer {
    api: Arc<dyn PlayQueueApi>,
    engine: Arc<dyn AudioEngine>,
    timeline: TimelineReporter,
    config: SyncConfig,
    inner: Mutex<SyncInner>,
    events: broadcast::Sender<QueueEvent>,
}

impl QueueSynchronizer {
    pub fn new(
        api: Arc<dyn PlayQueueApi>,
        engine: Arc<dyn AudioEngine>,
        timeline: TimelineReporter,
        config: SyncConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            api,
            engine,
            timeline,
            config,
            inner: Mutex::new(SyncInner {
                phase: SyncPhase::Idle,
                epoch: 0,
                queue: None,
                mirror: PlaybackMirror::default(),
            }),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn phase(&self) -> SyncPhase {
        self.inner.lock().phase
    }

    pub fn active_queue_id(&self) -> u64 {
        self.inner
            .lock()
            .queue
            .as_ref()
            .map_or(NO_QUEUE, |queue| queue.id)
    }

    pub fn snapshot(&self) -> Option<PlayQueue> {
        self.inner.lock().queue.clone()
    }

    pub fn mirror_tracks(&self) -> Vec<Track> {
        self.inner.lock().mirror.tracks()
    }

    pub fn current_item(&self) -> Option<PlayQueueItem> {
        self.inner.lock().mirror.current().cloned()
    }

    /// True when the mirror is an exact projection of the adopted snapshot.
    pub fn is_consistent(&self) -> bool {
        let inner = self.inner.lock();
        inner.mirror.matches(inner.queue.as_ref())
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // ---- queue operations ----

    /// Replaces whatever is playing with a new queue built from `source`.
    pub async fn play_source(
        &self,
        source: SourceSelector,
        shuffle: bool,
    ) -> Result<PlayQueue, QueueError> {
        let guard = self.begin_creation();
        let result = self.api.create_queue(&source, shuffle).await;
        self.complete(guard, "create_queue", result)
    }

    /// Re-reads the queue from the server and adopts it.
    pub async fn refresh(&self) -> Result<PlayQueue, QueueError> {
        let (guard, current) = self.begin_mutation("refresh")?;
        let result = self.api.fetch_queue(current.id).await;
        self.complete(guard, "refresh", result)
    }

    /// Selects the following item. Returns `None` at the end of the queue,
    /// after stopping playback.
    pub async fn next(&self) -> Result<Option<PlayQueue>, QueueError> {
        let (guard, current) = self.begin_mutation("next")?;

        let next_id = current
            .selected_index()
            .and_then(|idx| current.items.get(idx + 1))
            .map(|item| item.id);

        let Some(next_id) = next_id else {
            self.end_of_queue(&current);
            drop(guard);
            return Ok(None);
        };

        let result = self.api.select_item(current.id, next_id).await;
        self.complete(guard, "next", result).map(Some)
    }

    /// Called when the engine played the current item to its end.
    pub async fn track_finished(&self) -> Result<Option<PlayQueue>, QueueError> {
        self.next().await
    }

    /// Goes back one item, or restarts the current one when it has played
    /// for at least `previous_threshold_ms` or is the first item.
    pub async fn previous(&self) -> Result<PreviousOutcome, QueueError> {
        let (guard, current) = self.begin_mutation("previous")?;

        let position = self.engine.current_position();
        let previous_id = match current.selected_index() {
            Some(idx) if idx > 0 && position < self.config.previous_threshold_ms => {
                Some(current.items[idx - 1].id)
            }
            _ => None,
        };

        let Some(previous_id) = previous_id else {
            self.restart_in_place();
            drop(guard);
            return Ok(PreviousOutcome::Restarted);
        };

        let result = self.api.select_item(current.id, previous_id).await;
        self.complete(guard, "previous", result)
            .map(PreviousOutcome::Moved)
    }

    /// Re-cues the current item at position 0.
    pub fn restart_current(&self) -> Result<(), QueueError> {
        let (guard, _) = self.begin_mutation("restart")?;
        self.restart_in_place();
        drop(guard);
        Ok(())
    }

    /// Jumps to an arbitrary item of the active queue.
    pub async fn play_item(&self, item_id: u64) -> Result<PlayQueue, QueueError> {
        let (guard, current) = self.begin_mutation("play_item")?;
        if current.position_of(item_id).is_none() {
            return Err(QueueError::InvalidRequest(format!(
                "Item {} is not in queue {}",
                item_id, current.id
            )));
        }
        let result = self.api.select_item(current.id, item_id).await;
        self.complete(guard, "play_item", result)
    }

    /// Queues `playable` right after the current item. A library track is
    /// added; an entry already in the queue is moved.
    pub async fn play_next(&self, playable: Playable) -> Result<PlayQueue, QueueError> {
        let (guard, current) = self.begin_mutation("play_next")?;

        let result = match playable {
            Playable::Track(track) => {
                let source = SourceSelector::new(SourceKind::Track {
                    rating_key: track.rating_key,
                });
                self.api.add_items(current.id, &source, true).await
            }
            Playable::QueueItem(item) => {
                let Some(selected) = current.selected_item_id else {
                    return Err(QueueError::InvalidRequest(
                        "Nothing is selected".to_string(),
                    ));
                };
                if item.id == selected {
                    return Err(QueueError::InvalidRequest(
                        "The current item is already playing".to_string(),
                    ));
                }
                self.api
                    .move_items(current.id, &[item.id], MovePosition::After(selected))
                    .await
            }
        };
        self.complete(guard, "play_next", result)
    }

    pub async fn add_to_queue(
        &self,
        source: SourceSelector,
        play_next: bool,
    ) -> Result<PlayQueue, QueueError> {
        let (guard, current) = self.begin_mutation("add_items")?;
        let result = self.api.add_items(current.id, &source, play_next).await;
        self.complete(guard, "add_items", result)
    }

    pub async fn move_items(
        &self,
        item_ids: Vec<u64>,
        position: MovePosition,
    ) -> Result<PlayQueue, QueueError> {
        let (guard, current) = self.begin_mutation("move_items")?;
        let result = self.api.move_items(current.id, &item_ids, position).await;
        self.complete(guard, "move_items", result)
    }

    pub async fn remove_items(&self, item_ids: Vec<u64>) -> Result<PlayQueue, QueueError> {
        let (guard, current) = self.begin_mutation("remove_items")?;
        let result = self.api.remove_items(current.id, &item_ids).await;
        self.complete(guard, "remove_items", result)
    }

    pub async fn set_shuffle(
        &self,
        mode: ShuffleMode,
        preserve_current: bool,
    ) -> Result<PlayQueue, QueueError> {
        let (guard, current) = self.begin_mutation("set_shuffle")?;
        if mode == ShuffleMode::Shuffle && !current.allow_shuffle {
            return Err(QueueError::InvalidRequest(format!(
                "Queue {} does not allow shuffling",
                current.id
            )));
        }
        let result = self
            .api
            .set_shuffle(current.id, mode, preserve_current)
            .await;
        self.complete(guard, "set_shuffle", result)
    }

    /// Stops playback and forgets the active queue. Responses still in
    /// flight are discarded.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        if let Some(item) = inner.mirror.current().cloned() {
            let position = self.engine.current_position();
            self.report(inner.mirror.queue_id(), &item, PlaybackState::Stopped, position);
            self.engine.pause();
        }
        let queue_id = inner.queue.as_ref().map_or(NO_QUEUE, |queue| queue.id);
        inner.epoch += 1;
        inner.phase = SyncPhase::Idle;
        inner.queue = None;
        inner.mirror.clear();
        log::info!("[QueueSync] Cleared queue {}", queue_id);
        self.emit(QueueEvent::QueueEnded {
            queue_id,
            reason: "cleared".to_string(),
        });
    }

    // ---- transport ----

    pub fn play(&self) {
        let inner = self.inner.lock();
        if let Some(item) = inner.mirror.current() {
            self.engine.play();
            let position = self.engine.current_position();
            self.report(inner.mirror.queue_id(), item, PlaybackState::Playing, position);
        }
    }

    pub fn pause(&self) {
        let inner = self.inner.lock();
        if let Some(item) = inner.mirror.current() {
            self.engine.pause();
            let position = self.engine.current_position();
            self.report(inner.mirror.queue_id(), item, PlaybackState::Paused, position);
        }
    }

    pub fn seek(&self, position_ms: u64) {
        let inner = self.inner.lock();
        if let Some(item) = inner.mirror.current() {
            self.engine.seek(position_ms);
            let state = self.engine_state();
            self.report(inner.mirror.queue_id(), item, state, position_ms);
        }
    }

    /// Periodic heartbeat with the current item's state and position.
    pub fn report_progress(&self) {
        let inner = self.inner.lock();
        if let Some(item) = inner.mirror.current() {
            let position = self.engine.current_position();
            let state = self.engine_state();
            self.report(inner.mirror.queue_id(), item, state, position);
        }
    }

    // ---- internals ----

    fn begin_mutation(
        &self,
        operation: &str,
    ) -> Result<(MutationGuard<'_>, PlayQueue), QueueError> {
        let mut inner = self.inner.lock();
        if inner.phase != SyncPhase::Idle {
            log::info!(
                "[QueueSync] Rejecting {}: {:?} in progress",
                operation,
                inner.phase
            );
            return Err(QueueError::Busy);
        }
        let current = inner.queue.clone().ok_or(QueueError::NoActiveQueue)?;

        inner.phase = SyncPhase::Mutating;
        log::debug!("[QueueSync] {} on queue {}", operation, current.id);
        let guard = MutationGuard {
            inner: &self.inner,
            epoch: inner.epoch,
            queue_id: current.id,
            creation: false,
            armed: true,
        };
        Ok((guard, current))
    }

    fn begin_creation(&self) -> MutationGuard<'_> {
        let mut inner = self.inner.lock();
        if inner.phase != SyncPhase::Idle {
            log::info!("[QueueSync] New queue supersedes the operation in flight");
        }
        inner.epoch += 1;
        inner.phase = SyncPhase::Mutating;
        MutationGuard {
            inner: &self.inner,
            epoch: inner.epoch,
            queue_id: NO_QUEUE,
            creation: true,
            armed: true,
        }
    }

    fn complete(
        &self,
        guard: MutationGuard<'_>,
        operation: &str,
        result: Result<PlayQueue, QueueError>,
    ) -> Result<PlayQueue, QueueError> {
        let (epoch, queue_id, creation) = guard.disarm();
        let mut inner = self.inner.lock();

        if inner.epoch != epoch {
            log::info!(
                "[QueueSync] Discarding stale {} response for queue {}",
                operation,
                queue_id
            );
            return Err(QueueError::Superseded);
        }

        match result {
            Ok(snapshot) => match self.adopt(&mut inner, &snapshot, queue_id, operation, creation) {
                Ok(()) => Ok(snapshot),
                Err(e) => Err(self.fail(&mut inner, queue_id, operation, creation, e)),
            },
            Err(e) => {
                // The server changed before the error; local state follows it
                // so a retry starts from what the server actually holds.
                if let Some(snapshot) = e.server_snapshot() {
                    if let Err(invalid) =
                        self.adopt(&mut inner, snapshot, queue_id, operation, creation)
                    {
                        return Err(self.fail(&mut inner, queue_id, operation, creation, invalid));
                    }
                }
                Err(self.fail(&mut inner, queue_id, operation, creation, e))
            }
        }
    }

    /// Validates `snapshot` and makes it the adopted queue.
    fn adopt(
        &self,
        inner: &mut SyncInner,
        snapshot: &PlayQueue,
        queue_id: u64,
        operation: &str,
        creation: bool,
    ) -> Result<(), QueueError> {
        snapshot.validate()?;
        if !creation && snapshot.id != queue_id {
            return Err(QueueError::InvalidSnapshot(format!(
                "{} on queue {} returned queue {}",
                operation, queue_id, snapshot.id
            )));
        }

        inner.phase = SyncPhase::Reconciling;
        self.reconcile(inner, snapshot, creation);
        inner.phase = SyncPhase::Idle;

        self.emit(QueueEvent::QueueChanged {
            queue_id: snapshot.id,
            selected_item_id: snapshot.selected_item_id,
            version: snapshot.version,
        });
        Ok(())
    }

    fn fail(
        &self,
        inner: &mut SyncInner,
        queue_id: u64,
        operation: &str,
        creation: bool,
        error: QueueError,
    ) -> QueueError {
        // A source that cannot be queued says nothing about the queue that
        // is already playing.
        if error.is_terminal() && !creation {
            self.teardown(inner, &error);
            return error;
        }

        if error.is_retryable() {
            log::warn!("[QueueSync] {} failed, state kept: {}", operation, error);
        } else {
            log::error!("[QueueSync] {} failed: {}", operation, error);
        }
        inner.phase = SyncPhase::Idle;
        self.emit(QueueEvent::MutationFailed {
            queue_id,
            operation: operation.to_string(),
            error: error.clone(),
        });
        error
    }

    /// Drops all local queue state. The engine is left alone.
    fn teardown(&self, inner: &mut SyncInner, reason: &QueueError) {
        let queue_id = inner.queue.as_ref().map_or(NO_QUEUE, |queue| queue.id);
        log::warn!("[QueueSync] Tearing down queue {}: {}", queue_id, reason);
        inner.queue = None;
        inner.mirror.clear();
        inner.phase = SyncPhase::Idle;
        self.emit(QueueEvent::QueueEnded {
            queue_id,
            reason: reason.to_string(),
        });
    }

    fn reconcile(&self, inner: &mut SyncInner, snapshot: &PlayQueue, creation: bool) {
        let outgoing = inner
            .mirror
            .current()
            .cloned()
            .map(|item| (inner.mirror.queue_id(), item));
        let incoming = snapshot.selected_item().cloned();
        let was_playing = self.engine.is_playing();
        let position = self.engine.current_position();

        let same_item = match (&outgoing, &incoming) {
            (Some((queue_id, out)), Some(inc)) => *queue_id == snapshot.id && out.id == inc.id,
            (None, None) => true,
            _ => false,
        };

        let patch = reconcile::plan(&inner.mirror, snapshot);
        log::debug!("[QueueSync] Queue {} patch: {:?}", snapshot.id, patch);

        if !same_item {
            if let Some((queue_id, item)) = &outgoing {
                self.report(*queue_id, item, PlaybackState::Stopped, position);
            }
        }

        match patch {
            Patch::None => {}
            Patch::Advance => self.engine.advance_to_next(),
            Patch::Retreat => self.engine.advance_to_previous(),
            Patch::Jump(index) => self.engine.skip_to(index),
            Patch::Reorder { moves, select } => {
                for (from, to) in moves {
                    self.engine.move_track(from, to);
                }
                if let Some(index) = select {
                    self.engine.skip_to(index);
                }
            }
            Patch::Reload { start_index } => {
                self.engine.load_tracks(&snapshot.tracks(), start_index);
                if same_item && position > 0 {
                    self.engine.seek(position);
                }
                if was_playing || (creation && self.config.auto_play) {
                    self.engine.play();
                }
            }
            Patch::Clear => {
                self.engine.pause();
                self.engine.load_tracks(&[], 0);
            }
        }

        inner.mirror.adopt(snapshot);
        inner.queue = Some(snapshot.clone());

        if !same_item {
            if let Some(item) = &incoming {
                let state = self.engine_state();
                self.report(snapshot.id, item, state, 0);
            }
        }
    }

    fn restart_in_place(&self) {
        let inner = self.inner.lock();
        let Some(item) = inner.mirror.current() else {
            return;
        };
        let queue_id = inner.mirror.queue_id();
        let position = self.engine.current_position();

        self.report(queue_id, item, PlaybackState::Stopped, position);
        self.engine.seek(0);
        let state = self.engine_state();
        self.report(queue_id, item, state, 0);
    }

    fn end_of_queue(&self, current: &PlayQueue) {
        let inner = self.inner.lock();
        if let Some(item) = inner.mirror.current() {
            let position = self.engine.current_position();
            self.report(inner.mirror.queue_id(), item, PlaybackState::Stopped, position);
        }
        self.engine.pause();
        log::info!("[QueueSync] Reached the end of queue {}", current.id);
        self.emit(QueueEvent::PlaybackEnded {
            queue_id: current.id,
        });
    }

    fn engine_state(&self) -> PlaybackState {
        if self.engine.is_playing() {
            PlaybackState::Playing
        } else {
            PlaybackState::Paused
        }
    }

    fn report(&self, queue_id: u64, item: &PlayQueueItem, state: PlaybackState, position_ms: u64) {
        self.timeline.report(TimelineEvent {
            queue_id,
            item_id: item.id,
            state,
            position_ms,
            track: item.track.clone(),
        });
    }

    fn emit(&self, event: QueueEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
