use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::errors::QueueError;

/// Local id meaning "nothing is playing".
pub const NO_QUEUE: u64 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub rating_key: String,
    pub key: String,
    pub title: String,
    pub artist: String,
    pub artist_key: Option<String>,
    pub album: String,
    pub album_key: Option<String>,
    pub duration_ms: u64,
    pub thumb: Option<String>,
}

/// One entry of a play queue. `id` is scoped to the queue, so the same track
/// can be queued twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayQueueItem {
    pub id: u64,
    pub track: Track,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayQueue {
    pub id: u64,
    pub items: Vec<PlayQueueItem>,
    pub selected_item_id: Option<u64>,
    pub shuffled: bool,
    pub allow_shuffle: bool,
    pub last_added_item_id: Option<u64>,
    pub version: u32,
}

impl PlayQueue {
    /// Checks the snapshot invariants: unique item ids, and a selection that
    /// points into `items` whenever the queue is non-empty.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.id == NO_QUEUE {
            return Err(QueueError::InvalidSnapshot(
                "Play queue has no id".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(self.items.len());
        for item in &self.items {
            if !seen.insert(item.id) {
                return Err(QueueError::InvalidSnapshot(format!(
                    "Duplicate play queue item id {} in queue {}",
                    item.id, self.id
                )));
            }
        }

        match self.selected_item_id {
            Some(selected) if !seen.contains(&selected) => {
                Err(QueueError::InvalidSnapshot(format!(
                    "Selected item {} is not part of queue {}",
                    selected, self.id
                )))
            }
            None if !self.items.is_empty() => Err(QueueError::InvalidSnapshot(format!(
                "Queue {} has {} items but no selection",
                self.id,
                self.items.len()
            ))),
            _ => Ok(()),
        }
    }

    pub fn selected_index(&self) -> Option<usize> {
        let selected = self.selected_item_id?;
        self.position_of(selected)
    }

    pub fn selected_item(&self) -> Option<&PlayQueueItem> {
        self.selected_index().map(|idx| &self.items[idx])
    }

    pub fn position_of(&self, item_id: u64) -> Option<usize> {
        self.items.iter().position(|item| item.id == item_id)
    }

    pub fn item(&self, item_id: u64) -> Option<&PlayQueueItem> {
        self.items.iter().find(|item| item.id == item_id)
    }

    pub fn item_ids(&self) -> Vec<u64> {
        self.items.iter().map(|item| item.id).collect()
    }

    pub fn tracks(&self) -> Vec<Track> {
        self.items.iter().map(|item| item.track.clone()).collect()
    }
}

/// Anything the UI can hand to a queue operation: a bare library track, or an
/// entry that already lives in the active queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Playable {
    Track(Track),
    QueueItem(PlayQueueItem),
}

impl Playable {
    pub fn track(&self) -> &Track {
        match self {
            Playable::Track(track) => track,
            Playable::QueueItem(item) => &item.track,
        }
    }

    pub fn queue_item_id(&self) -> Option<u64> {
        match self {
            Playable::Track(_) => None,
            Playable::QueueItem(item) => Some(item.id),
        }
    }

    pub fn into_track(self) -> Track {
        match self {
            Playable::Track(track) => track,
            Playable::QueueItem(item) => item.track,
        }
    }
}

impl From<Track> for Playable {
    fn from(track: Track) -> Self {
        Playable::Track(track)
    }
}

impl From<PlayQueueItem> for Playable {
    fn from(item: PlayQueueItem) -> Self {
        Playable::QueueItem(item)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
    Stopped,
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub queue_id: u64,
    pub item_id: u64,
    pub state: PlaybackState,
    pub position_ms: u64,
    pub track: Track,
}

/// What a new play queue is built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceKind {
    Album { rating_key: String },
    Artist { rating_key: String },
    Track { rating_key: String },
    Playlist { playlist_id: String },
    Genre { section_id: String, genre_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSelector {
    pub kind: SourceKind,
    /// Rating key of the track playback should start from.
    pub start_key: Option<String>,
}

impl SourceSelector {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            start_key: None,
        }
    }

    pub fn starting_at(mut self, rating_key: impl Into<String>) -> Self {
        self.start_key = Some(rating_key.into());
        self
    }
}

impl FromStr for SourceKind {
    type Err = String;

    /// Parses `album:<key>`, `artist:<key>`, `track:<key>`, `playlist:<id>`
    /// and `genre:<section>:<id>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = s
            .split_once(':')
            .ok_or_else(|| format!("Invalid source '{}': expected <kind>:<key>", s))?;
        if rest.is_empty() {
            return Err(format!("Invalid source '{}': missing key", s));
        }

        match kind.to_lowercase().as_str() {
            "album" => Ok(SourceKind::Album {
                rating_key: rest.to_string(),
            }),
            "artist" => Ok(SourceKind::Artist {
                rating_key: rest.to_string(),
            }),
            "track" => Ok(SourceKind::Track {
                rating_key: rest.to_string(),
            }),
            "playlist" => Ok(SourceKind::Playlist {
                playlist_id: rest.to_string(),
            }),
            "genre" => {
                let (section_id, genre_id) = rest
                    .split_once(':')
                    .ok_or_else(|| format!("Invalid genre source '{}': expected genre:<section>:<id>", s))?;
                Ok(SourceKind::Genre {
                    section_id: section_id.to_string(),
                    genre_id: genre_id.to_string(),
                })
            }
            _ => Err(format!(
                "Invalid source kind: '{}'. Valid: album, artist, track, playlist, genre",
                kind
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShuffleMode {
    Shuffle,
    Unshuffle,
}

/// Where a block of moved items lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "to", content = "item_id", rename_all = "lowercase")]
pub enum MovePosition {
    Start,
    After(u64),
    End,
}
