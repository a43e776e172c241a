use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use plexq::commands::{self, Command, Outcome, TrackEndWatch};
use plexq::config::AppConfig;
use plexq::engine::{AudioEngine, HeadlessEngine};
use plexq::errors::QueueError;
use plexq::plex::PlexClient;
use plexq::settings::SettingsStore;
use plexq::sync::QueueSynchronizer;
use plexq::timeline::TimelineReporter;

const TRACK_END_POLL_MS: u64 = 250;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::load().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    let client = Arc::new(PlexClient::new(&config.server).context("failed to build client")?);
    let engine = Arc::new(HeadlessEngine::new());
    let timeline = TimelineReporter::spawn(client.clone());
    let sync = QueueSynchronizer::new(
        client,
        engine.clone(),
        timeline.clone(),
        config.sync.clone(),
    );
    let settings = SettingsStore::open_default();

    log::info!(
        "[Main] Connected to {} as {}",
        config.server.server_url,
        config.server.device_name
    );
    println!("{}", commands::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut heartbeat =
        tokio::time::interval(Duration::from_secs(config.sync.heartbeat_interval_secs));
    let mut track_end = tokio::time::interval(Duration::from_millis(TRACK_END_POLL_MS));
    let mut events = sync.subscribe();
    let mut end_watch = TrackEndWatch::default();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let command = match Command::parse(line) {
                    Ok(command) => command,
                    Err(e) => {
                        eprintln!("{}", e);
                        continue;
                    }
                };
                match commands::dispatch(&sync, &settings, command).await {
                    Ok(Outcome::Done) => {}
                    Ok(Outcome::Listing(text)) => println!("{}", text),
                    Ok(Outcome::Quit) => break,
                    Err(e) => eprintln!("error: {}", e),
                }
            }
            _ = heartbeat.tick() => sync.report_progress(),
            _ = track_end.tick() => {
                if end_watch.poll(engine.finished()) {
                    match commands::on_track_end(&sync, &settings).await {
                        Ok(_) => {}
                        Err(QueueError::NoActiveQueue) => engine.pause(),
                        Err(e) => {
                            log::warn!("[Main] Could not continue after track end: {}", e);
                            if e.is_terminal() {
                                engine.pause();
                            }
                        }
                    }
                }
            }
            event = events.recv() => match event {
                Ok(event) => log::debug!("[Main] {:?}", event),
                Err(RecvError::Lagged(missed)) => {
                    log::warn!("[Main] Missed {} queue events", missed);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    sync.clear();
    timeline.flush().await;
    log::info!("[Main] Bye");
    Ok(())
}
