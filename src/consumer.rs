//! The queue consumer: a long-running loop that pops songs off the queue
//! and plays each one, blocking until the player child exits.

use std::time::Duration;

use camino::Utf8PathBuf;
use tracing::info;

use crate::player;
use crate::store::Shared;
use crate::util::{display_item, fmt_hms, now_secs};

/// Poll granularity of the idle branch. This bounds the latency between an
/// enqueue and the start of playback when the daemon is otherwise idle.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Runs until `quit` is set. Exits after the in-flight song finishes (which
/// `die` forces promptly by skipping it).
pub async fn run(store: Shared, confdir: Utf8PathBuf) {
    loop {
        let song = {
            let mut s = store.lock();
            if s.quit {
                break;
            }
            s.pop_next_song()
        };
        let Some(song) = song else {
            tokio::time::sleep(IDLE_POLL).await;
            continue;
        };

        info!("Started playing {}", display_item(&song));
        player::run(&store, &confdir, &song).await;
        let played = {
            let mut s = store.lock();
            let now = now_secs();
            let played = s.current_time(now);
            s.finish_current(now);
            played
        };
        info!(
            "Finished playing {} (total playing time: {})",
            display_item(&song),
            fmt_hms(played)
        );
    }
    info!("queue consumer stopped");
}
