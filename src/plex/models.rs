use serde::Deserialize;

use crate::models::{PlayQueue, PlayQueueItem, Track};

#[derive(Debug, Deserialize)]
pub struct PlexResponse {
    #[serde(rename = "MediaContainer")]
    pub media_container: MediaContainer,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaContainer {
    #[serde(rename = "playQueueID", deserialize_with = "deserialize_u64_from_any")]
    pub play_queue_id: u64,
    #[serde(
        rename = "playQueueSelectedItemID",
        default,
        deserialize_with = "deserialize_option_u64_from_any"
    )]
    pub play_queue_selected_item_id: Option<u64>,
    #[serde(default)]
    pub play_queue_shuffled: bool,
    #[serde(default)]
    pub allow_shuffle: bool,
    #[serde(
        rename = "playQueueLastAddedItemID",
        default,
        deserialize_with = "deserialize_option_u64_from_any"
    )]
    pub play_queue_last_added_item_id: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_option_u64_from_any")]
    pub play_queue_version: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_option_u64_from_any")]
    pub play_queue_total_count: Option<u64>,
    #[serde(rename = "Metadata", default)]
    pub metadata: Vec<PlayQueueMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayQueueMetadata {
    #[serde(rename = "playQueueItemID", deserialize_with = "deserialize_u64_from_any")]
    pub play_queue_item_id: u64,
    #[serde(deserialize_with = "deserialize_string_from_any")]
    pub rating_key: String,
    pub key: String,
    #[serde(default)]
    pub title: String,
    /// Artist name for tracks.
    pub grandparent_title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_string_from_any")]
    pub grandparent_rating_key: Option<String>,
    /// Album name for tracks.
    pub parent_title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_string_from_any")]
    pub parent_rating_key: Option<String>,
    /// Some compilations carry the track artist here instead.
    pub original_title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_u64_from_any")]
    pub duration: Option<u64>,
    pub thumb: Option<String>,
    pub parent_thumb: Option<String>,
}

impl From<PlayQueueMetadata> for PlayQueueItem {
    fn from(meta: PlayQueueMetadata) -> Self {
        let artist = meta
            .original_title
            .or(meta.grandparent_title)
            .unwrap_or_else(|| "Unknown Artist".to_string());

        PlayQueueItem {
            id: meta.play_queue_item_id,
            track: Track {
                rating_key: meta.rating_key,
                key: meta.key,
                title: meta.title,
                artist,
                artist_key: meta.grandparent_rating_key,
                album: meta
                    .parent_title
                    .unwrap_or_else(|| "Unknown Album".to_string()),
                album_key: meta.parent_rating_key,
                duration_ms: meta.duration.unwrap_or(0),
                thumb: meta.thumb.or(meta.parent_thumb),
            },
        }
    }
}

impl From<MediaContainer> for PlayQueue {
    fn from(container: MediaContainer) -> Self {
        if let Some(total) = container.play_queue_total_count {
            if total as usize != container.metadata.len() {
                log::warn!(
                    "[PlexClient] Queue {} window holds {} of {} items",
                    container.play_queue_id,
                    container.metadata.len(),
                    total
                );
            }
        }

        PlayQueue {
            id: container.play_queue_id,
            items: container.metadata.into_iter().map(PlayQueueItem::from).collect(),
            selected_item_id: container.play_queue_selected_item_id,
            shuffled: container.play_queue_shuffled,
            allow_shuffle: container.allow_shuffle,
            last_added_item_id: container.play_queue_last_added_item_id,
            version: container.play_queue_version.unwrap_or(0) as u32,
        }
    }
}

// Plex mixes numeric and string encodings for ids across endpoints.

fn deserialize_u64_from_any<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum AnyValue {
        Number(u64),
        String(String),
    }

    match AnyValue::deserialize(deserializer)? {
        AnyValue::Number(n) => Ok(n),
        AnyValue::String(s) => s.parse::<u64>().map_err(serde::de::Error::custom),
    }
}

fn deserialize_option_u64_from_any<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum AnyValue {
        Number(u64),
        String(String),
    }

    match Option::<AnyValue>::deserialize(deserializer)? {
        Some(AnyValue::Number(n)) => Ok(Some(n)),
        Some(AnyValue::String(s)) if s.is_empty() => Ok(None),
        Some(AnyValue::String(s)) => s.parse::<u64>().map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

fn deserialize_string_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum AnyValue {
        String(String),
        Number(i64),
    }

    match AnyValue::deserialize(deserializer)? {
        AnyValue::String(s) => Ok(s),
        AnyValue::Number(n) => Ok(n.to_string()),
    }
}

fn deserialize_option_string_from_any<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum AnyValue {
        String(String),
        Number(i64),
    }

    match Option::<AnyValue>::deserialize(deserializer)? {
        Some(AnyValue::String(s)) => Ok(Some(s)),
        Some(AnyValue::Number(n)) => Ok(Some(n.to_string())),
        None => Ok(None),
    }
}
