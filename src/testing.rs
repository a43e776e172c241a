//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::api::{PlayQueueApi, TimelineApi};
use crate::config::ServerConfig;
use crate::engine::{AudioEngine, HeadlessEngine};
use crate::plex::PlexClient;
use crate::errors::QueueError;
use crate::models::{
    MovePosition, PlayQueue, PlaybackState, ShuffleMode, SourceSelector, TimelineEvent, Track,
};

struct Scripted {
    result: Result<PlayQueue, QueueError>,
    gate: Option<oneshot::Receiver<()>>,
}

/// Answers every call with the next scripted result, in order.
#[derive(Default)]
pub struct FakeQueueApi {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<String>>,
}

impl FakeQueueApi {
    pub fn push(&self, result: Result<PlayQueue, QueueError>) {
        self.script.lock().push_back(Scripted { result, gate: None });
    }

    /// The call consuming this result waits until the sender fires.
    pub fn push_gated(&self, result: Result<PlayQueue, QueueError>) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.script.lock().push_back(Scripted {
            result,
            gate: Some(rx),
        });
        tx
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    async fn answer(&self, call: String) -> Result<PlayQueue, QueueError> {
        self.calls.lock().push(call);
        let next = self.script.lock().pop_front();
        let Some(scripted) = next else {
            return Err(QueueError::Internal("no scripted response".to_string()));
        };
        if let Some(gate) = scripted.gate {
            let _ = gate.await;
        }
        scripted.result
    }
}

#[async_trait]
impl PlayQueueApi for FakeQueueApi {
    async fn fetch_queue(&self, queue_id: u64) -> Result<PlayQueue, QueueError> {
        self.answer(format!("fetch {}", queue_id)).await
    }

    async fn create_queue(
        &self,
        _source: &SourceSelector,
        shuffle: bool,
    ) -> Result<PlayQueue, QueueError> {
        self.answer(format!("create shuffle={}", shuffle)).await
    }

    async fn add_items(
        &self,
        queue_id: u64,
        source: &SourceSelector,
        play_next: bool,
    ) -> Result<PlayQueue, QueueError> {
        self.answer(format!("add {} {:?} next={}", queue_id, source.kind, play_next))
            .await
    }

    async fn move_items(
        &self,
        queue_id: u64,
        item_ids: &[u64],
        position: MovePosition,
    ) -> Result<PlayQueue, QueueError> {
        self.answer(format!("move {} {:?} {:?}", queue_id, item_ids, position))
            .await
    }

    async fn remove_items(
        &self,
        queue_id: u64,
        item_ids: &[u64],
    ) -> Result<PlayQueue, QueueError> {
        self.answer(format!("remove {} {:?}", queue_id, item_ids)).await
    }

    async fn set_shuffle(
        &self,
        queue_id: u64,
        mode: ShuffleMode,
        preserve_current: bool,
    ) -> Result<PlayQueue, QueueError> {
        self.answer(format!(
            "shuffle {} {:?} preserve={}",
            queue_id, mode, preserve_current
        ))
        .await
    }

    async fn select_item(&self, queue_id: u64, item_id: u64) -> Result<PlayQueue, QueueError> {
        self.answer(format!("select {} {}", queue_id, item_id)).await
    }
}

/// Records every report; optionally fails deliveries for one item.
#[derive(Default)]
pub struct RecordingTimeline {
    calls: Mutex<Vec<(u64, PlaybackState)>>,
    delivered: Mutex<Vec<(u64, PlaybackState)>>,
    positions: Mutex<Vec<u64>>,
    fail_item: Option<u64>,
}

impl RecordingTimeline {
    pub fn failing_for(item_id: u64) -> Self {
        Self {
            fail_item: Some(item_id),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<(u64, PlaybackState)> {
        self.calls.lock().clone()
    }

    pub fn delivered(&self) -> Vec<(u64, PlaybackState)> {
        self.delivered.lock().clone()
    }

    pub fn positions(&self) -> Vec<u64> {
        self.positions.lock().clone()
    }
}

#[async_trait]
impl TimelineApi for RecordingTimeline {
    async fn report_timeline(&self, event: &TimelineEvent) -> Result<(), QueueError> {
        self.calls.lock().push((event.item_id, event.state));
        self.positions.lock().push(event.position_ms);
        if self.fail_item == Some(event.item_id) {
            return Err(QueueError::Network("connection reset".to_string()));
        }
        self.delivered.lock().push((event.item_id, event.state));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Load(usize, usize),
    Next,
    Previous,
    SkipTo(usize),
    Move(usize, usize),
    Seek(u64),
    Play,
    Pause,
}

/// Headless engine that logs every mutating call.
#[derive(Default)]
pub struct FakeEngine {
    inner: HeadlessEngine,
    calls: Mutex<Vec<EngineCall>>,
    queries: Mutex<usize>,
}

impl FakeEngine {
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
        *self.queries.lock() = 0;
    }

    pub fn count(&self, wanted: &EngineCall) -> usize {
        self.calls.lock().iter().filter(|c| *c == wanted).count()
    }

    pub fn loads(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, EngineCall::Load(..)))
            .count()
    }

    /// Total of calls of any kind, including read-only queries.
    pub fn touched(&self) -> usize {
        self.calls.lock().len() + *self.queries.lock()
    }

    pub fn loaded_tracks(&self) -> Vec<Track> {
        self.inner.loaded_tracks()
    }

    /// Puts the engine at `position_ms` without logging a call.
    pub fn set_position(&self, position_ms: u64) {
        self.inner.seek(position_ms);
    }

    fn log(&self, call: EngineCall) {
        self.calls.lock().push(call);
    }
}

impl AudioEngine for FakeEngine {
    fn load_tracks(&self, tracks: &[Track], start_index: usize) {
        self.log(EngineCall::Load(tracks.len(), start_index));
        self.inner.load_tracks(tracks, start_index);
    }

    fn advance_to_next(&self) {
        self.log(EngineCall::Next);
        self.inner.advance_to_next();
    }

    fn advance_to_previous(&self) {
        self.log(EngineCall::Previous);
        self.inner.advance_to_previous();
    }

    fn skip_to(&self, index: usize) {
        self.log(EngineCall::SkipTo(index));
        self.inner.skip_to(index);
    }

    fn move_track(&self, from: usize, to: usize) {
        self.log(EngineCall::Move(from, to));
        self.inner.move_track(from, to);
    }

    fn seek(&self, position_ms: u64) {
        self.log(EngineCall::Seek(position_ms));
        self.inner.seek(position_ms);
    }

    fn play(&self) {
        self.log(EngineCall::Play);
        self.inner.play();
    }

    fn pause(&self) {
        self.log(EngineCall::Pause);
        self.inner.pause();
    }

    fn current_position(&self) -> u64 {
        *self.queries.lock() += 1;
        self.inner.current_position()
    }

    fn is_playing(&self) -> bool {
        *self.queries.lock() += 1;
        self.inner.is_playing()
    }

    fn current_index(&self) -> Option<usize> {
        *self.queries.lock() += 1;
        self.inner.current_index()
    }
}

pub type Requests = Arc<Mutex<Vec<String>>>;

/// Local HTTP server answering with `responses` in order, one connection
/// each, recording every request head.
pub async fn serve(responses: Vec<(u16, String)>) -> (String, Requests) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests: Requests = Arc::new(Mutex::new(Vec::new()));
    let seen = requests.clone();

    tokio::spawn(async move {
        for (status, body) in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let head = String::from_utf8_lossy(&buf).to_string();
            seen.lock().push(head);

            let reply = format!(
                "HTTP/1.1 {} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        }
    });

    (format!("http://{}", addr), requests)
}

/// Server-side JSON for a queue shaped like `fixtures::queue`.
pub fn queue_json(id: u64, ids: &[u64], selected: u64) -> String {
    let metadata: Vec<serde_json::Value> = ids
        .iter()
        .map(|item_id| {
            serde_json::json!({
                "playQueueItemID": item_id,
                "ratingKey": format!("{}", 1000 + item_id),
                "key": format!("/library/metadata/{}", 1000 + item_id),
                "title": format!("Track {}", item_id),
                "grandparentTitle": "Artist",
                "parentTitle": "Album",
                "duration": 240000
            })
        })
        .collect();
    serde_json::json!({
        "MediaContainer": {
            "playQueueID": id,
            "playQueueSelectedItemID": selected,
            "playQueueShuffled": false,
            "allowShuffle": true,
            "Metadata": metadata
        }
    })
    .to_string()
}

pub fn client_for(base: &str) -> PlexClient {
    let config = ServerConfig {
        server_url: format!("{}/", base),
        token: "secret".to_string(),
        machine_identifier: "machine1".to_string(),
        client_identifier: "client1".to_string(),
        device_name: "Test".to_string(),
    };
    PlexClient::new(&config).unwrap()
}
