use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::{Client, Method, StatusCode};
use std::time::Duration;

use crate::api::traits::{validate_move, PlayQueueApi, TimelineApi};
use crate::config::{ServerConfig, PRODUCT_NAME, PRODUCT_VERSION, REQUEST_TIMEOUT_SECONDS};
use crate::errors::QueueError;
use crate::models::{
    MovePosition, PlayQueue, PlaybackState, ShuffleMode, SourceKind, SourceSelector,
    TimelineEvent,
};

use super::models::PlexResponse;

const LIBRARY_IDENTIFIER: &str = "com.plexapp.plugins.library";
/// Item window requested on every fetch, large enough for whole albums and
/// most playlists.
const QUEUE_WINDOW: &str = "500";

pub struct PlexClient {
    client: Client,
    server_url: String,
    machine_identifier: String,
}

impl PlexClient {
    pub fn new(config: &ServerConfig) -> Result<Self, QueueError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .default_headers(Self::build_headers(config)?)
            .build()?;

        Ok(Self {
            client,
            server_url: config.server_url.trim_end_matches('/').to_string(),
            machine_identifier: config.machine_identifier.clone(),
        })
    }

    fn build_headers(config: &ServerConfig) -> Result<HeaderMap, QueueError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let pairs = [
            ("x-plex-token", config.token.as_str()),
            ("x-plex-client-identifier", config.client_identifier.as_str()),
            ("x-plex-product", PRODUCT_NAME),
            ("x-plex-version", PRODUCT_VERSION),
            ("x-plex-device-name", config.device_name.as_str()),
        ];
        for (name, value) in pairs {
            let value = HeaderValue::from_str(value).map_err(|e| {
                QueueError::Config(format!("Invalid value for {}: {}", name, e))
            })?;
            headers.insert(HeaderName::from_static(name), value);
        }
        Ok(headers)
    }

    /// `server://` URI the server resolves into a list of tracks.
    fn library_uri(&self, kind: &SourceKind) -> String {
        let path = match kind {
            SourceKind::Album { rating_key }
            | SourceKind::Artist { rating_key }
            | SourceKind::Track { rating_key } => format!("/library/metadata/{}", rating_key),
            SourceKind::Playlist { playlist_id } => format!("/playlists/{}/items", playlist_id),
            SourceKind::Genre {
                section_id,
                genre_id,
            } => format!(
                "/library/sections/{}/all?type=10&genre={}",
                section_id,
                urlencoding::encode(genre_id)
            ),
        };
        format!(
            "server://{}/{}{}",
            self.machine_identifier, LIBRARY_IDENTIFIER, path
        )
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        operation: &str,
    ) -> Result<String, QueueError> {
        let url = format!("{}{}", self.server_url, path);
        log::debug!("[PlexClient] {} {} {} {:?}", operation, method, url, params);

        let response = self
            .client
            .request(method, &url)
            .query(params)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if let Some(err) = map_status(status, &text, operation) {
            log::warn!("[PlexClient] {} failed ({}) at {}", operation, status, url);
            return Err(err);
        }
        Ok(text)
    }

    async fn request_queue(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        operation: &str,
    ) -> Result<PlayQueue, QueueError> {
        let text = self.send(method, path, params, operation).await?;
        let resp: PlexResponse = serde_json::from_str(&text).map_err(|e| {
            log::error!("[PlexClient] Failed to parse {} response: {}", operation, e);
            QueueError::from(e)
        })?;
        Ok(PlayQueue::from(resp.media_container))
    }

    /// Maps a failure partway through a multi-request edit. Once some
    /// requests went through, the server's queue is refetched and returned
    /// inside `PartiallyApplied`.
    async fn interrupted(
        &self,
        queue_id: u64,
        operation: &str,
        applied: usize,
        total: usize,
        error: QueueError,
    ) -> QueueError {
        if applied == 0 || error.is_terminal() {
            return error;
        }
        log::warn!(
            "[PlexClient] {} stopped after {} of {} requests: {}",
            operation,
            applied,
            total,
            error
        );

        match self.fetch_queue(queue_id).await {
            Ok(snapshot) => QueueError::PartiallyApplied {
                message: format!(
                    "{} applied {} of {} changes: {}",
                    operation, applied, total, error
                ),
                snapshot: Box::new(snapshot),
            },
            Err(refetch) if refetch.is_terminal() => refetch,
            Err(refetch) => {
                log::error!(
                    "[PlexClient] Could not refetch queue {} after partial {}: {}",
                    queue_id,
                    operation,
                    refetch
                );
                error
            }
        }
    }

    async fn move_one(
        &self,
        queue_id: u64,
        item_id: u64,
        after: Option<u64>,
    ) -> Result<PlayQueue, QueueError> {
        let params: Vec<(&str, String)> = after
            .map(|target| vec![("after", target.to_string())])
            .unwrap_or_default();
        self.request_queue(
            Method::PUT,
            &format!("/playQueues/{}/items/{}/move", queue_id, item_id),
            &params,
            "move_item",
        )
        .await
    }
}

/// Maps a non-success status onto the error taxonomy. `None` means success.
fn map_status(status: StatusCode, body: &str, operation: &str) -> Option<QueueError> {
    if status.is_success() {
        return None;
    }

    let message = format!("{} returned {}", operation, status);
    let err = match status.as_u16() {
        401 | 403 => QueueError::Unauthorized(message),
        400 | 404 | 410 => QueueError::QueueGone(message),
        code => QueueError::Server {
            status: code,
            message: if body.is_empty() {
                message
            } else {
                format!("{}: {}", message, body.trim())
            },
        },
    };
    Some(err)
}

#[async_trait]
impl PlayQueueApi for PlexClient {
    async fn fetch_queue(&self, queue_id: u64) -> Result<PlayQueue, QueueError> {
        self.request_queue(
            Method::GET,
            &format!("/playQueues/{}", queue_id),
            &[("own", "1".to_string()), ("window", QUEUE_WINDOW.to_string())],
            "fetch_queue",
        )
        .await
    }

    async fn create_queue(
        &self,
        source: &SourceSelector,
        shuffle: bool,
    ) -> Result<PlayQueue, QueueError> {
        let mut params = vec![
            ("type", "audio".to_string()),
            ("uri", self.library_uri(&source.kind)),
            ("shuffle", if shuffle { "1" } else { "0" }.to_string()),
            ("repeat", "0".to_string()),
            ("continuous", "0".to_string()),
        ];
        if let Some(start) = &source.start_key {
            params.push(("key", format!("/library/metadata/{}", start)));
        }

        let queue = self
            .request_queue(Method::POST, "/playQueues", &params, "create_queue")
            .await?;
        log::info!(
            "[PlexClient] Created play queue {} with {} items",
            queue.id,
            queue.items.len()
        );
        Ok(queue)
    }

    async fn add_items(
        &self,
        queue_id: u64,
        source: &SourceSelector,
        play_next: bool,
    ) -> Result<PlayQueue, QueueError> {
        self.request_queue(
            Method::PUT,
            &format!("/playQueues/{}", queue_id),
            &[
                ("uri", self.library_uri(&source.kind)),
                ("next", if play_next { "1" } else { "0" }.to_string()),
            ],
            "add_items",
        )
        .await
    }

    async fn move_items(
        &self,
        queue_id: u64,
        item_ids: &[u64],
        position: MovePosition,
    ) -> Result<PlayQueue, QueueError> {
        validate_move(item_ids, position)?;

        // Each item lands after the previous one, which keeps the block
        // contiguous and in the given order.
        let mut anchor = match position {
            MovePosition::Start => None,
            MovePosition::After(target) => Some(target),
            MovePosition::End => {
                let current = self.fetch_queue(queue_id).await?;
                current
                    .items
                    .iter()
                    .rev()
                    .map(|item| item.id)
                    .find(|id| !item_ids.contains(id))
            }
        };

        for (applied, &item_id) in item_ids.iter().enumerate() {
            if let Err(e) = self.move_one(queue_id, item_id, anchor).await {
                return Err(self
                    .interrupted(queue_id, "move_items", applied, item_ids.len(), e)
                    .await);
            }
            anchor = Some(item_id);
        }

        self.fetch_queue(queue_id).await
    }

    async fn remove_items(
        &self,
        queue_id: u64,
        item_ids: &[u64],
    ) -> Result<PlayQueue, QueueError> {
        if item_ids.is_empty() {
            return Err(QueueError::InvalidRequest("No items to remove".to_string()));
        }

        for (applied, item_id) in item_ids.iter().enumerate() {
            let removed = self
                .send(
                    Method::DELETE,
                    &format!("/playQueues/{}/items/{}", queue_id, item_id),
                    &[],
                    "remove_item",
                )
                .await;
            if let Err(e) = removed {
                return Err(self
                    .interrupted(queue_id, "remove_items", applied, item_ids.len(), e)
                    .await);
            }
        }

        self.fetch_queue(queue_id).await
    }

    async fn set_shuffle(
        &self,
        queue_id: u64,
        mode: ShuffleMode,
        preserve_current: bool,
    ) -> Result<PlayQueue, QueueError> {
        let previous_selection = if preserve_current {
            self.fetch_queue(queue_id).await?.selected_item_id
        } else {
            None
        };

        let action = match mode {
            ShuffleMode::Shuffle => "shuffle",
            ShuffleMode::Unshuffle => "unshuffle",
        };
        let queue = self
            .request_queue(
                Method::PUT,
                &format!("/playQueues/{}/{}", queue_id, action),
                &[],
                action,
            )
            .await?;

        let wanted = if preserve_current {
            previous_selection.filter(|id| queue.position_of(*id).is_some())
        } else {
            queue.items.first().map(|item| item.id)
        };

        match wanted {
            Some(item_id) if queue.selected_item_id != Some(item_id) => {
                match self.select_item(queue_id, item_id).await {
                    Ok(selected) => Ok(selected),
                    Err(e) => Err(self.interrupted(queue_id, action, 1, 2, e).await),
                }
            }
            _ => Ok(queue),
        }
    }

    /// The server moves its selection to whichever item the player reports
    /// in a timeline update; `center` only positions the returned window.
    async fn select_item(&self, queue_id: u64, item_id: u64) -> Result<PlayQueue, QueueError> {
        let mut queue = self
            .request_queue(
                Method::GET,
                &format!("/playQueues/{}", queue_id),
                &[
                    ("own", "1".to_string()),
                    ("window", QUEUE_WINDOW.to_string()),
                    ("center", item_id.to_string()),
                ],
                "select_item",
            )
            .await?;

        let Some(item) = queue.item(item_id).cloned() else {
            log::warn!(
                "[PlexClient] Item {} left queue {} before it could be selected",
                item_id,
                queue_id
            );
            return Ok(queue);
        };

        self.report_timeline(&TimelineEvent {
            queue_id,
            item_id,
            state: PlaybackState::Paused,
            position_ms: 0,
            track: item.track,
        })
        .await?;

        queue.selected_item_id = Some(item_id);
        Ok(queue)
    }
}

#[async_trait]
impl TimelineApi for PlexClient {
    async fn report_timeline(&self, event: &TimelineEvent) -> Result<(), QueueError> {
        self.send(
            Method::GET,
            "/:/timeline",
            &[
                ("ratingKey", event.track.rating_key.clone()),
                ("key", event.track.key.clone()),
                ("identifier", LIBRARY_IDENTIFIER.to_string()),
                ("state", event.state.as_str().to_string()),
                ("time", event.position_ms.to_string()),
                ("duration", event.track.duration_ms.to_string()),
                ("playQueueItemID", event.item_id.to_string()),
                ("containerKey", format!("/playQueues/{}", event.queue_id)),
            ],
            "report_timeline",
        )
        .await?;
        Ok(())
    }
}
