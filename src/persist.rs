//! The slice of the data store that survives a restart.
//!
//! Saved as a single JSON document with an explicit schema version, so a
//! format break is detected instead of silently misread. Queue items and
//! history items are base64-encoded since they are raw bytes.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use camino::Utf8Path;
use color_eyre::Result;
use color_eyre::eyre::{Context, eyre};
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::store::{DataStore, HistoryEntry, Item, Shared};


const SCHEMA_VERSION: u32 = 1;

/// How often the save timer fires. Saves are skipped while the queue is
/// unchanged since the previous one.
pub const SAVE_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Serialize, Deserialize)]
struct SavedState {
    version: u32,
    queue: Vec<String>,
    queue_running: bool,
    loop_mode: bool,
    history: Vec<SavedHistoryEntry>,
    max_history: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedHistoryEntry {
    item: String,
    started: f64,
    finished: f64,
}

fn snapshot(store: &DataStore) -> SavedState {
    let mut queue: Vec<String> = Vec::with_capacity(store.queue.len() + 1);
    // The song being played goes back on the head, so a restart replays it.
    if store.queue_running && !store.current.is_empty() {
        queue.push(B64.encode(&store.current));
    }
    queue.extend(store.queue.iter().map(|item| B64.encode(item)));
    SavedState {
        version: SCHEMA_VERSION,
        queue,
        queue_running: store.queue_running,
        loop_mode: store.loop_mode,
        history: store
            .history
            .iter()
            .map(|entry| SavedHistoryEntry {
                item: B64.encode(&entry.item),
                started: entry.started,
                finished: entry.finished,
            })
            .collect(),
        max_history: store.max_history,
    }
}

fn encode(store: &DataStore) -> String {
    // Plain data all the way down, this cannot fail to serialize.
    serde_json::to_string(&snapshot(store)).unwrap_or_default()
}

fn decode(text: &str) -> Result<SavedState> {
    let saved: SavedState =
        serde_json::from_str(text).wrap_err("Could not parse saved state")?;
    if saved.version != SCHEMA_VERSION {
        return Err(eyre!(
            "saved state has schema version {}, expected {SCHEMA_VERSION}",
            saved.version
        ));
    }
    Ok(saved)
}

fn decode_item(encoded: &str) -> Result<Item> {
    B64.decode(encoded)
        .wrap_err("Bad base64 in saved state")
}

/// Applies a saved-state document onto a fresh store.
pub fn restore(store: &mut DataStore, text: &str) -> Result<()> {
    let saved = decode(text)?;
    store.queue = saved
        .queue
        .iter()
        .map(|item| decode_item(item))
        .collect::<Result<_>>()?;
    store.history = saved
        .history
        .iter()
        .map(|entry| {
            Ok(HistoryEntry {
                item: decode_item(&entry.item)?,
                started: entry.started,
                finished: entry.finished,
            })
        })
        .collect::<Result<_>>()?;
    store.queue_running = saved.queue_running;
    store.loop_mode = saved.loop_mode;
    store.max_history = saved.max_history;
    store.trim_history();
    Ok(())
}

/// Loads saved state at startup. Any failure logs a warning and leaves the
/// store at its defaults.
pub fn load(store: &mut DataStore, path: &Utf8Path) {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("no saved state at {path}");
            return;
        }
        Err(e) => {
            warn!("Cannot open saved-state file \"{path}\": {e}");
            return;
        }
    };
    if let Err(e) = restore(store, &text) {
        warn!("Saved-state file \"{path}\" could not be loaded: {e:#}");
    }
}

fn write(document: &str, path: &Utf8Path) {
    let staging = path.with_extension("tmp");
    let result = std::fs::write(&staging, document)
        .and_then(|()| std::fs::rename(&staging, path));
    if let Err(e) = result {
        warn!("Cannot write saved-state file \"{path}\": {e}");
    }
}

/// One immediate save, used during shutdown cleanup.
pub fn save_now(store: &Shared, path: &Utf8Path) {
    let document = encode(&store.lock());
    write(&document, path);
}

/// The periodic save timer. Wakes every [`SAVE_INTERVAL`] and only touches
/// the disk when the queue changed since the last save.
pub async fn save_task(store: Shared, path: camino::Utf8PathBuf) {
    let mut saved_stamp = 0.0;
    let mut ticker = tokio::time::interval(SAVE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // the first tick fires immediately
    loop {
        ticker.tick().await;
        let document = {
            let store = store.lock();
            if store.last_queue_update == saved_stamp {
                continue;
            }
            saved_stamp = store.last_queue_update;
            encode(&store)
        };
        write(&document, &path);
        debug!("state saved to {path}");
    }
}
