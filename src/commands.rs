//! Line-oriented control surface over the synchronizer.

use std::fmt::Write as _;

use crate::errors::QueueError;
use crate::models::{MovePosition, PlayQueue, ShuffleMode, SourceKind, SourceSelector};
use crate::settings::{RepeatMode, SettingsStore};
use crate::sync::{PreviousOutcome, QueueSynchronizer};

pub const HELP: &str = "\
commands:
  play <source> [shuffle] [from <ratingKey>]   start a new queue
  add <source> [next]                          append, or insert after the current item
  playnext <itemId>                            move a queued item after the current one
  next | prev | restart | jump <itemId>
  move <itemId,...> start|end|after <itemId>
  remove <itemId,...>
  shuffle | unshuffle
  resume | pause | seek <seconds>
  repeat off|all|one
  queue | refresh | clear | quit

sources: album:<key> artist:<key> track:<key> playlist:<id> genre:<section>:<id>
         (or the same with a space instead of ':')";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play {
        source: SourceSelector,
        shuffle: bool,
    },
    Add {
        source: SourceSelector,
        next: bool,
    },
    PlayNext(u64),
    Next,
    Previous,
    Restart,
    Jump(u64),
    Move {
        item_ids: Vec<u64>,
        position: MovePosition,
    },
    Remove(Vec<u64>),
    Shuffle(ShuffleMode),
    Resume,
    Pause,
    Seek(u64),
    Repeat(RepeatMode),
    Queue,
    Refresh,
    Clear,
    Help,
    Quit,
}

/// What the caller should do after a command ran.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Done,
    Listing(String),
    Quit,
}

fn invalid(message: impl Into<String>) -> QueueError {
    QueueError::InvalidRequest(message.into())
}

fn parse_id(raw: &str) -> Result<u64, QueueError> {
    raw.parse()
        .map_err(|_| invalid(format!("Invalid item id: '{}'", raw)))
}

fn parse_ids(raw: &str) -> Result<Vec<u64>, QueueError> {
    let ids = raw
        .split(',')
        .filter(|part| !part.is_empty())
        .map(parse_id)
        .collect::<Result<Vec<_>, _>>()?;
    if ids.is_empty() {
        return Err(invalid("Expected at least one item id"));
    }
    Ok(ids)
}

/// Consumes a source from the front of `args`: either `kind:key` or the
/// spaced form `kind key` (`genre section id`).
fn parse_source(args: &mut std::slice::Iter<'_, &str>) -> Result<SourceKind, QueueError> {
    let first = args.next().ok_or_else(|| invalid("Missing source"))?;
    if first.contains(':') {
        return first.parse::<SourceKind>().map_err(invalid);
    }

    let key = args
        .next()
        .ok_or_else(|| invalid(format!("Missing key for source '{}'", first)))?;
    let joined = if first.eq_ignore_ascii_case("genre") {
        let genre = args
            .next()
            .ok_or_else(|| invalid("Expected genre <section> <id>"))?;
        format!("{}:{}:{}", first, key, genre)
    } else {
        format!("{}:{}", first, key)
    };
    joined.parse::<SourceKind>().map_err(invalid)
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, QueueError> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((name, rest)) = words.split_first() else {
            return Err(invalid("Empty command"));
        };
        let mut args = rest.iter();

        let command = match name.to_lowercase().as_str() {
            "play" => {
                let mut source = SourceSelector::new(parse_source(&mut args)?);
                let mut shuffle = false;
                while let Some(word) = args.next() {
                    match *word {
                        "shuffle" => shuffle = true,
                        "from" => {
                            let key = args
                                .next()
                                .ok_or_else(|| invalid("Expected a rating key after 'from'"))?;
                            source = source.starting_at(*key);
                        }
                        other => return Err(invalid(format!("Unexpected argument '{}'", other))),
                    }
                }
                Command::Play { source, shuffle }
            }
            "add" => {
                let source = SourceSelector::new(parse_source(&mut args)?);
                let next = match args.next() {
                    None => false,
                    Some(&"next") => true,
                    Some(other) => return Err(invalid(format!("Unexpected argument '{}'", other))),
                };
                Command::Add { source, next }
            }
            "playnext" => Command::PlayNext(parse_id(single(&mut args, "playnext <itemId>")?)?),
            "next" | "n" => Command::Next,
            "prev" | "previous" | "p" => Command::Previous,
            "restart" => Command::Restart,
            "jump" => Command::Jump(parse_id(single(&mut args, "jump <itemId>")?)?),
            "move" => {
                let item_ids = parse_ids(single(
                    &mut args,
                    "move <itemId,...> start|end|after <itemId>",
                )?)?;
                let position = match args.next().copied() {
                    Some("start") => MovePosition::Start,
                    Some("end") | None => MovePosition::End,
                    Some("after") => {
                        MovePosition::After(parse_id(single(&mut args, "after <itemId>")?)?)
                    }
                    Some(other) => return Err(invalid(format!("Unknown position '{}'", other))),
                };
                Command::Move { item_ids, position }
            }
            "remove" | "rm" => Command::Remove(parse_ids(single(&mut args, "remove <itemId,...>")?)?),
            "shuffle" => Command::Shuffle(ShuffleMode::Shuffle),
            "unshuffle" => Command::Shuffle(ShuffleMode::Unshuffle),
            "resume" => Command::Resume,
            "pause" => Command::Pause,
            "seek" => {
                let raw = single(&mut args, "seek <seconds>")?;
                let seconds: f64 = raw
                    .parse()
                    .map_err(|_| invalid(format!("Invalid position: '{}'", raw)))?;
                if !seconds.is_finite() || seconds < 0.0 {
                    return Err(invalid(format!("Invalid position: '{}'", raw)));
                }
                Command::Seek((seconds * 1000.0) as u64)
            }
            "repeat" => {
                let raw = single(&mut args, "repeat off|all|one")?;
                Command::Repeat(raw.parse::<RepeatMode>().map_err(invalid)?)
            }
            "queue" | "ls" => Command::Queue,
            "refresh" => Command::Refresh,
            "clear" => Command::Clear,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => return Err(invalid(format!("Unknown command '{}'. Try 'help'", other))),
        };
        Ok(command)
    }
}

fn single<'a>(
    args: &mut std::slice::Iter<'_, &'a str>,
    usage: &str,
) -> Result<&'a str, QueueError> {
    args.next()
        .copied()
        .ok_or_else(|| invalid(format!("Usage: {}", usage)))
}

/// Runs one command against the synchronizer.
pub async fn dispatch(
    sync: &QueueSynchronizer,
    settings: &SettingsStore,
    command: Command,
) -> Result<Outcome, QueueError> {
    match command {
        Command::Play { source, shuffle } => {
            sync.play_source(source, shuffle).await?;
        }
        Command::Add { source, next } => {
            sync.add_to_queue(source, next).await?;
        }
        Command::PlayNext(item_id) => {
            let item = sync
                .snapshot()
                .and_then(|queue| queue.item(item_id).cloned())
                .ok_or_else(|| invalid(format!("Item {} is not queued", item_id)))?;
            sync.play_next(item.into()).await?;
        }
        Command::Next => {
            if sync.next().await?.is_none() {
                return Ok(Outcome::Listing("End of queue".to_string()));
            }
        }
        Command::Previous => {
            if sync.previous().await? == PreviousOutcome::Restarted {
                log::debug!("[Command] Restarted current item");
            }
        }
        Command::Restart => sync.restart_current()?,
        Command::Jump(item_id) => {
            sync.play_item(item_id).await?;
        }
        Command::Move { item_ids, position } => {
            sync.move_items(item_ids, position).await?;
        }
        Command::Remove(item_ids) => {
            sync.remove_items(item_ids).await?;
        }
        Command::Shuffle(mode) => {
            sync.set_shuffle(mode, true).await?;
        }
        Command::Resume => sync.play(),
        Command::Pause => sync.pause(),
        Command::Seek(position_ms) => sync.seek(position_ms),
        Command::Repeat(mode) => settings.set_repeat_mode(mode)?,
        Command::Queue => {
            let listing = match sync.snapshot() {
                Some(queue) => render_queue(&queue, settings.repeat_mode()),
                None => "No active queue".to_string(),
            };
            return Ok(Outcome::Listing(listing));
        }
        Command::Refresh => {
            sync.refresh().await?;
        }
        Command::Clear => sync.clear(),
        Command::Help => return Ok(Outcome::Listing(HELP.to_string())),
        Command::Quit => return Ok(Outcome::Quit),
    }
    Ok(Outcome::Done)
}

/// Applies the repeat mode when the engine reaches the end of the current
/// item. `Ok(None)` means playback stopped at the end of the queue.
pub async fn on_track_end(
    sync: &QueueSynchronizer,
    settings: &SettingsStore,
) -> Result<Option<PlayQueue>, QueueError> {
    let queue = sync.snapshot().ok_or(QueueError::NoActiveQueue)?;

    match settings.repeat_mode() {
        RepeatMode::One => {
            sync.restart_current()?;
            Ok(Some(queue))
        }
        RepeatMode::All if is_last_selected(&queue) => {
            let Some(first) = queue.items.first().map(|item| item.id) else {
                return Ok(None);
            };
            if queue.selected_item_id == Some(first) {
                sync.restart_current()?;
                return Ok(Some(queue));
            }
            log::info!("[Command] Wrapping queue {} to its first item", queue.id);
            sync.play_item(first).await.map(Some)
        }
        RepeatMode::All | RepeatMode::Off => sync.track_finished().await,
    }
}

/// Edge detector for the engine's end-of-track flag. The engine keeps
/// reporting `finished` until something cues another position, so only the
/// first poll of each run fires.
#[derive(Debug, Default)]
pub struct TrackEndWatch {
    handled: bool,
}

impl TrackEndWatch {
    /// True when `finished` just became true.
    pub fn poll(&mut self, finished: bool) -> bool {
        if !finished {
            self.handled = false;
            return false;
        }
        if self.handled {
            return false;
        }
        self.handled = true;
        true
    }
}

fn is_last_selected(queue: &PlayQueue) -> bool {
    queue.selected_index().map(|idx| idx + 1) == Some(queue.items.len())
}

pub fn render_queue(queue: &PlayQueue, repeat: RepeatMode) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "queue {} ({} items, shuffle {}, repeat {:?})",
        queue.id,
        queue.items.len(),
        if queue.shuffled { "on" } else { "off" },
        repeat
    );
    for (idx, item) in queue.items.iter().enumerate() {
        let marker = if Some(item.id) == queue.selected_item_id {
            ">"
        } else {
            " "
        };
        let _ = writeln!(
            out,
            "{} {:>3}. [{}] {} - {} ({})",
            marker,
            idx + 1,
            item.id,
            item.track.title,
            item.track.artist,
            format_duration(item.track.duration_ms)
        );
    }
    out.trim_end().to_string()
}

fn format_duration(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::models::fixtures::queue;
    use crate::testing::{EngineCall, FakeEngine, FakeQueueApi, RecordingTimeline};
    use crate::timeline::TimelineReporter;
    use std::sync::Arc;

    #[test]
    fn test_parse_play_forms() {
        assert_eq!(
            Command::parse("play album 42 shuffle").unwrap(),
            Command::Play {
                source: SourceSelector::new(SourceKind::Album {
                    rating_key: "42".to_string()
                }),
                shuffle: true,
            }
        );
        assert_eq!(
            Command::parse("play artist:7 from 99").unwrap(),
            Command::Play {
                source: SourceSelector::new(SourceKind::Artist {
                    rating_key: "7".to_string()
                })
                .starting_at("99"),
                shuffle: false,
            }
        );
        assert_eq!(
            Command::parse("play genre 3 12").unwrap(),
            Command::Play {
                source: SourceSelector::new(SourceKind::Genre {
                    section_id: "3".to_string(),
                    genre_id: "12".to_string()
                }),
                shuffle: false,
            }
        );
    }

    #[test]
    fn test_parse_queue_edits() {
        assert_eq!(
            Command::parse("move 4,5 after 2").unwrap(),
            Command::Move {
                item_ids: vec![4, 5],
                position: MovePosition::After(2)
            }
        );
        assert_eq!(
            Command::parse("move 4 start").unwrap(),
            Command::Move {
                item_ids: vec![4],
                position: MovePosition::Start
            }
        );
        assert_eq!(Command::parse("rm 1,2").unwrap(), Command::Remove(vec![1, 2]));
        assert_eq!(Command::parse("seek 1.5").unwrap(), Command::Seek(1500));
        assert_eq!(
            Command::parse("repeat ALL").unwrap(),
            Command::Repeat(RepeatMode::All)
        );
        assert_eq!(
            Command::parse("add track:5 next").unwrap(),
            Command::Add {
                source: SourceSelector::new(SourceKind::Track {
                    rating_key: "5".to_string()
                }),
                next: true
            }
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for line in ["", "fly", "play", "play disc:1", "jump x", "seek -3", "move", "repeat twice"] {
            assert!(
                matches!(Command::parse(line), Err(QueueError::InvalidRequest(_))),
                "accepted {:?}",
                line
            );
        }
    }

    #[test]
    fn test_render_marks_selection() {
        let rendered = render_queue(&queue(7, &[1, 2], 2), RepeatMode::Off);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with(' '));
        assert!(lines[2].starts_with('>'));
        assert!(lines[2].contains("Track 2"));
        assert!(lines[2].ends_with("(4:00)"));
    }

    #[test]
    fn test_track_end_fires_once_per_finish() {
        let mut watch = TrackEndWatch::default();
        assert!(!watch.poll(false));
        assert!(watch.poll(true));
        assert!(!watch.poll(true));
        assert!(!watch.poll(true));
        assert!(!watch.poll(false));
        assert!(watch.poll(true));
    }

    struct Rig {
        sync: QueueSynchronizer,
        api: Arc<FakeQueueApi>,
        engine: Arc<FakeEngine>,
        settings: SettingsStore,
    }

    async fn rig(q: PlayQueue) -> Rig {
        let api = Arc::new(FakeQueueApi::default());
        let engine = Arc::new(FakeEngine::default());
        let reporter = TimelineReporter::spawn(Arc::new(RecordingTimeline::default()));
        let sync = QueueSynchronizer::new(
            api.clone(),
            engine.clone(),
            reporter,
            SyncConfig::default(),
        );
        api.push(Ok(q));
        sync.play_source(
            SourceSelector::new(SourceKind::Album {
                rating_key: "100".to_string(),
            }),
            false,
        )
        .await
        .unwrap();
        engine.clear_calls();
        Rig {
            sync,
            api,
            engine,
            settings: SettingsStore::in_memory(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_routes_to_synchronizer() {
        let r = rig(queue(7, &[1, 2, 3], 1)).await;

        r.api.push(Ok(queue(7, &[1, 3, 2], 1)));
        let outcome = dispatch(&r.sync, &r.settings, Command::parse("playnext 3").unwrap())
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Done);
        assert_eq!(r.api.calls().last().unwrap(), "move 7 [3] After(1)");

        let err = dispatch(&r.sync, &r.settings, Command::PlayNext(99))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidRequest(_)));

        match dispatch(&r.sync, &r.settings, Command::Queue).await.unwrap() {
            Outcome::Listing(text) => assert!(text.starts_with("queue 7 (3 items")),
            other => panic!("expected listing, got {:?}", other),
        }
        assert_eq!(
            dispatch(&r.sync, &r.settings, Command::Quit).await.unwrap(),
            Outcome::Quit
        );
    }

    #[tokio::test]
    async fn test_repeat_one_restarts_without_request() {
        let r = rig(queue(7, &[1, 2], 1)).await;
        dispatch(&r.sync, &r.settings, Command::Repeat(RepeatMode::One))
            .await
            .unwrap();

        let q = on_track_end(&r.sync, &r.settings).await.unwrap().unwrap();
        assert_eq!(q.selected_item_id, Some(1));
        assert_eq!(r.api.calls().len(), 1);
        assert_eq!(r.engine.calls(), vec![EngineCall::Seek(0)]);
    }

    #[tokio::test]
    async fn test_repeat_all_wraps_to_first_item() {
        let r = rig(queue(7, &[1, 2, 3], 3)).await;
        r.settings.set_repeat_mode(RepeatMode::All).unwrap();

        r.api.push(Ok(queue(7, &[1, 2, 3], 1)));
        let q = on_track_end(&r.sync, &r.settings).await.unwrap().unwrap();

        assert_eq!(q.selected_item_id, Some(1));
        assert_eq!(r.api.calls().last().unwrap(), "select 7 1");
        assert_eq!(r.engine.calls(), vec![EngineCall::SkipTo(0)]);
    }

    #[tokio::test]
    async fn test_repeat_all_mid_queue_advances() {
        let r = rig(queue(7, &[1, 2, 3], 1)).await;
        r.settings.set_repeat_mode(RepeatMode::All).unwrap();

        r.api.push(Ok(queue(7, &[1, 2, 3], 2)));
        let q = on_track_end(&r.sync, &r.settings).await.unwrap().unwrap();
        assert_eq!(q.selected_item_id, Some(2));
        assert_eq!(r.engine.calls(), vec![EngineCall::Next]);
    }

    #[tokio::test]
    async fn test_failed_track_end_is_not_retried() {
        let r = rig(queue(7, &[1, 2], 1)).await;
        let mut watch = TrackEndWatch::default();

        r.api.push(Err(QueueError::Network("connection reset".to_string())));
        for _ in 0..4 {
            if watch.poll(true) {
                assert!(on_track_end(&r.sync, &r.settings).await.is_err());
            }
        }
        assert_eq!(r.api.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_repeat_off_stops_at_end() {
        let r = rig(queue(7, &[1, 2], 2)).await;

        assert_eq!(on_track_end(&r.sync, &r.settings).await.unwrap(), None);
        assert_eq!(r.api.calls().len(), 1);
        assert_eq!(r.engine.calls(), vec![EngineCall::Pause]);
    }
}
