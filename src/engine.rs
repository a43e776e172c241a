//! Capability interface of the audio engine the synchronizer drives, plus a
//! clock-driven headless implementation used by the command-line driver.

use parking_lot::Mutex;
use std::time::Instant;

use crate::models::Track;

/// Everything the synchronizer needs from a playback pipeline.
///
/// The engine owns the loaded list and a cursor into it. The synchronizer is
/// its only writer.
pub trait AudioEngine: Send + Sync {
    /// Replaces the loaded list and cues `start_index` at position 0, paused.
    fn load_tracks(&self, tracks: &[Track], start_index: usize);
    fn advance_to_next(&self);
    fn advance_to_previous(&self);
    /// Cues the item at `index` at position 0 without touching the list.
    fn skip_to(&self, index: usize);
    /// Moves one entry of the loaded list. The cursor follows the entry it
    /// pointed at, so the current item keeps its decode state.
    fn move_track(&self, from: usize, to: usize);
    fn seek(&self, position_ms: u64);
    fn play(&self);
    fn pause(&self);
    fn current_position(&self) -> u64;
    fn is_playing(&self) -> bool;
    fn current_index(&self) -> Option<usize>;
}

struct HeadlessState {
    tracks: Vec<Track>,
    index: Option<usize>,
    playing: bool,
    base_position_ms: u64,
    resumed_at: Instant,
}

impl HeadlessState {
    fn position(&self) -> u64 {
        let elapsed = if self.playing {
            self.resumed_at.elapsed().as_millis() as u64
        } else {
            0
        };
        let position = self.base_position_ms + elapsed;
        match self.current_track() {
            Some(track) if track.duration_ms > 0 => position.min(track.duration_ms),
            _ => position,
        }
    }

    fn current_track(&self) -> Option<&Track> {
        self.index.and_then(|idx| self.tracks.get(idx))
    }

    fn cue(&mut self, index: Option<usize>) {
        self.index = index;
        self.base_position_ms = 0;
        self.resumed_at = Instant::now();
    }
}

/// Engine that keeps time but produces no audio.
pub struct HeadlessEngine {
    state: Mutex<HeadlessState>,
}

impl Default for HeadlessEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HeadlessState {
                tracks: Vec::new(),
                index: None,
                playing: false,
                base_position_ms: 0,
                resumed_at: Instant::now(),
            }),
        }
    }

    /// True once the current track has played to its end.
    pub fn finished(&self) -> bool {
        let state = self.state.lock();
        match state.current_track() {
            Some(track) => state.playing && track.duration_ms > 0 && state.position() >= track.duration_ms,
            None => false,
        }
    }

    pub fn loaded_tracks(&self) -> Vec<Track> {
        self.state.lock().tracks.clone()
    }
}

impl AudioEngine for HeadlessEngine {
    fn load_tracks(&self, tracks: &[Track], start_index: usize) {
        let mut state = self.state.lock();
        state.tracks = tracks.to_vec();
        state.playing = false;
        let index = if tracks.is_empty() {
            None
        } else {
            Some(start_index.min(tracks.len() - 1))
        };
        state.cue(index);
        log::debug!("[HeadlessEngine] Loaded {} tracks at {:?}", tracks.len(), index);
    }

    fn advance_to_next(&self) {
        let mut state = self.state.lock();
        let next = match state.index {
            Some(idx) if idx + 1 < state.tracks.len() => Some(idx + 1),
            other => other,
        };
        state.cue(next);
    }

    fn advance_to_previous(&self) {
        let mut state = self.state.lock();
        let prev = state.index.map(|idx| idx.saturating_sub(1));
        state.cue(prev);
    }

    fn skip_to(&self, index: usize) {
        let mut state = self.state.lock();
        if index < state.tracks.len() {
            state.cue(Some(index));
        }
    }

    fn move_track(&self, from: usize, to: usize) {
        let mut state = self.state.lock();
        if from >= state.tracks.len() || to >= state.tracks.len() || from == to {
            return;
        }
        let track = state.tracks.remove(from);
        state.tracks.insert(to, track);

        state.index = state.index.map(|idx| {
            if idx == from {
                to
            } else if from < idx && to >= idx {
                idx - 1
            } else if from > idx && to <= idx {
                idx + 1
            } else {
                idx
            }
        });
    }

    fn seek(&self, position_ms: u64) {
        let mut state = self.state.lock();
        state.base_position_ms = position_ms;
        state.resumed_at = Instant::now();
    }

    fn play(&self) {
        let mut state = self.state.lock();
        if state.index.is_some() && !state.playing {
            state.playing = true;
            state.resumed_at = Instant::now();
        }
    }

    fn pause(&self) {
        let mut state = self.state.lock();
        if state.playing {
            state.base_position_ms = state.position();
            state.playing = false;
        }
    }

    fn current_position(&self) -> u64 {
        self.state.lock().position()
    }

    fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    fn current_index(&self) -> Option<usize> {
        self.state.lock().index
    }
}
