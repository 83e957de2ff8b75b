//! In-memory authoritative state.
//!
//! Exactly one `DataStore` exists per process, behind a single mutex. All
//! mutations happen in short critical sections; nothing holds the lock
//! across process spawns, waits, sleeps or socket I/O. Every mutation of the
//! queue bumps `last_queue_update`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::seq::SliceRandom;
use regex::bytes::Regex;
use strum::Display;

use crate::player_config::{self, PlayerConfig};
use crate::range::{Span, clamp_index, overlaps};
use crate::util::now_secs;
use crate::wire::Fault;


/// A queue entry: an opaque byte string naming what to play, usually an
/// absolute path, possibly a URL. Never empty once admitted.
pub type Item = Vec<u8>;

/// One finished (or skipped-as-played) song with its wall-clock timing.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub item: Item,
    pub started: f64,
    pub finished: f64,
}

pub const DEFAULT_MAX_HISTORY: usize = 50;

/// The consumer's view of the player child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum PlayerState {
    None,
    Running,
    Paused,
    Exiting,
}

#[derive(Debug)]
pub struct DataStore {
    /// Songs waiting to be played.
    pub queue: Vec<Item>,
    /// Recently played songs, a FIFO bounded by `max_history`.
    pub history: VecDeque<HistoryEntry>,
    /// The song being played right now; empty when none.
    pub current: Item,
    /// While false the consumer stops popping new work.
    pub queue_running: bool,
    /// When set, finished songs go back to the end of the queue.
    pub loop_mode: bool,
    /// Whether the player child is currently suspended.
    pub paused: bool,
    /// Pid of the player child, while one is running.
    pub player_pid: Option<u32>,
    /// When the current song started playing (epoch seconds).
    pub song_start: f64,
    /// When the current pause began.
    pub last_pause: f64,
    /// Seconds the current song has spent paused.
    pub accumulated_paused: f64,
    /// One-shot: the next song-finished transition skips the history append
    /// and the loop-mode requeue.
    pub ignore_finish: bool,
    /// Tells the consumer to terminate.
    pub quit: bool,
    /// When the queue was last modified, monotonically increasing.
    pub last_queue_update: f64,
    pub config: PlayerConfig,
    pub max_history: usize,
}

impl DataStore {
    pub fn new(config: PlayerConfig) -> Self {
        DataStore {
            queue: Vec::new(),
            history: VecDeque::new(),
            current: Vec::new(),
            queue_running: true,
            loop_mode: false,
            paused: false,
            player_pid: None,
            song_start: 0.0,
            last_pause: 0.0,
            accumulated_paused: 0.0,
            ignore_finish: false,
            quit: false,
            last_queue_update: now_secs(),
            config,
            max_history: DEFAULT_MAX_HISTORY,
        }
    }

    /// Marks the queue as modified. Strictly increasing even when the clock
    /// has not visibly advanced between two mutations.
    pub fn touch_queue(&mut self) {
        let now = now_secs();
        self.last_queue_update = if now > self.last_queue_update {
            now
        } else {
            self.last_queue_update.next_up()
        };
    }

    pub fn player_state(&self) -> PlayerState {
        if self.current.is_empty() || self.player_pid.is_none() {
            PlayerState::None
        } else if self.quit || self.ignore_finish {
            PlayerState::Exiting
        } else if self.paused {
            PlayerState::Paused
        } else {
            PlayerState::Running
        }
    }

    //---- adding ----//

    /// Splices `items` in at `position` (negative wraps, out-of-bounds
    /// clamps). Empty items are filtered out at this single ingress point.
    pub fn insert_items(&mut self, items: Vec<Item>, position: i64) {
        let at = clamp_index(position, self.queue.len());
        let kept = items.into_iter().filter(|item| !item.is_empty());
        self.queue.splice(at..at, kept);
        self.touch_queue();
    }

    pub fn append_items(&mut self, items: Vec<Item>) {
        let end = self.queue.len() as i64;
        self.insert_items(items, end);
    }

    pub fn replace_all(&mut self, items: Vec<Item>) {
        self.queue = items.into_iter().filter(|item| !item.is_empty()).collect();
        self.touch_queue();
    }

    pub fn replace_span(&mut self, span: Span, items: Vec<Item>) {
        let (start, end) = span.resolve(self.queue.len());
        let kept: Vec<Item> = items.into_iter().filter(|item| !item.is_empty()).collect();
        self.queue.splice(start..end, kept);
        self.touch_queue();
    }

    /// Inserts item `i` at position `i * interval`, one after another.
    pub fn interval_add(&mut self, interval: i64, items: Vec<Item>) {
        for (index, item) in items
            .into_iter()
            .filter(|item| !item.is_empty())
            .enumerate()
        {
            self.insert_items(vec![item], index as i64 * interval);
        }
        self.touch_queue();
    }

    //---- removing ----//

    pub fn clear(&mut self) {
        self.queue.clear();
        self.touch_queue();
    }

    pub fn cut_span(&mut self, span: Span) {
        let (start, end) = span.resolve(self.queue.len());
        self.queue.drain(start..end);
        self.touch_queue();
    }

    /// Removes the items at the given positions. Positions are resolved
    /// against the queue before anything is removed, so later indices stay
    /// valid regardless of order.
    pub fn cut_indices(&mut self, indices: &[i64]) -> Result<(), Fault> {
        let mut marked = vec![false; self.queue.len()];
        for &index in indices {
            marked[self.strict_index(index)?] = true;
        }
        let mut position = 0;
        self.queue.retain(|_| {
            let dropped = marked[position];
            position += 1;
            !dropped
        });
        self.touch_queue();
        Ok(())
    }

    pub fn crop_span(&mut self, span: Span) {
        let (start, end) = span.resolve(self.queue.len());
        let kept: Vec<Item> = self.queue.drain(start..end).collect();
        self.queue = kept;
        self.touch_queue();
    }

    /// Keeps exactly the referenced items, in the order the indices appear
    /// (duplicates included).
    pub fn crop_indices(&mut self, indices: &[i64]) -> Result<(), Fault> {
        let mut kept = Vec::with_capacity(indices.len());
        for &index in indices {
            kept.push(self.queue[self.strict_index(index)?].clone());
        }
        self.queue = kept;
        self.touch_queue();
        Ok(())
    }

    /// Within `span`, keeps the items whose match status equals
    /// `keep_matching` (`filter` keeps matches, `remove` keeps the rest).
    pub fn retain_matching(&mut self, pattern: &Regex, span: Span, keep_matching: bool) {
        let (start, end) = span.resolve(self.queue.len());
        let kept: Vec<Item> = self.queue[start..end]
            .iter()
            .filter(|item| pattern.is_match(item) == keep_matching)
            .cloned()
            .collect();
        self.queue.splice(start..end, kept);
        self.touch_queue();
    }

    //---- rearranging ----//

    /// Moves the span to `dest`, where `dest` is interpreted against the
    /// queue with the moved items still (logically) in their old places.
    pub fn move_span(&mut self, span: Span, dest: i64) {
        let (start, end) = span.resolve(self.queue.len());
        let moved: Vec<Item> = self.queue[start..end].to_vec();
        let mut slots: Vec<Option<Item>> = self.queue.drain(..).map(Some).collect();
        for slot in &mut slots[start..end] {
            *slot = None;
        }
        let at = clamp_index(dest, slots.len());
        slots.splice(at..at, moved.into_iter().map(Some));
        self.queue = slots.into_iter().flatten().collect();
        self.touch_queue();
    }

    pub fn move_indices(&mut self, indices: &[i64], dest: i64) -> Result<(), Fault> {
        let resolved: Vec<usize> = indices
            .iter()
            .map(|&index| self.strict_index(index))
            .collect::<Result<_, _>>()?;
        let mut slots: Vec<Option<Item>> = self.queue.drain(..).map(Some).collect();
        let mut moved = Vec::with_capacity(resolved.len());
        for index in resolved {
            if let Some(item) = slots[index].take() {
                moved.push(item);
            }
        }
        let at = clamp_index(dest, slots.len());
        slots.splice(at..at, moved.into_iter().map(Some));
        self.queue = slots.into_iter().flatten().collect();
        self.touch_queue();
        Ok(())
    }

    pub fn swap_spans(&mut self, a: Span, b: Span) -> Result<(), Fault> {
        let ra = a.resolve(self.queue.len());
        let rb = b.resolve(self.queue.len());
        if overlaps(ra, rb) {
            return Err(Fault::invalid_argument(format!(
                "Overlapping ranges may not be swapped: {ra:?} {rb:?}"
            )));
        }
        // Order so the first slice ends before the second begins. An empty
        // range strictly inside the other admits no such order and the swap
        // is meaningless.
        let ((s1, e1), (s2, e2)) = if ra.1 <= rb.0 {
            (ra, rb)
        } else if rb.1 <= ra.0 {
            (rb, ra)
        } else {
            return Err(Fault::invalid_argument(format!(
                "Ranges may not be swapped when one sits inside the other: {ra:?} {rb:?}"
            )));
        };
        let mut swapped = Vec::with_capacity(self.queue.len());
        swapped.extend_from_slice(&self.queue[..s1]);
        swapped.extend_from_slice(&self.queue[s2..e2]);
        swapped.extend_from_slice(&self.queue[e1..s2]);
        swapped.extend_from_slice(&self.queue[s1..e1]);
        swapped.extend_from_slice(&self.queue[e2..]);
        self.queue = swapped;
        self.touch_queue();
        Ok(())
    }

    pub fn shuffle_span(&mut self, span: Span) {
        let (start, end) = span.resolve(self.queue.len());
        self.queue[start..end].shuffle(&mut rand::thread_rng());
        self.touch_queue();
    }

    pub fn sort_span(&mut self, span: Span) {
        let (start, end) = span.resolve(self.queue.len());
        self.queue[start..end].sort();
        self.touch_queue();
    }

    pub fn reverse_span(&mut self, span: Span) {
        let (start, end) = span.resolve(self.queue.len());
        self.queue[start..end].reverse();
        self.touch_queue();
    }

    /// Regex substitution over the span, first occurrence per item or
    /// global. Items that become empty are removed.
    pub fn substitute(&mut self, pattern: &Regex, replacement: &[u8], span: Span, global: bool) {
        let template = player_config::translate_replacement(replacement);
        let (start, end) = span.resolve(self.queue.len());
        let replaced: Vec<Item> = self.queue[start..end]
            .iter()
            .map(|item| {
                if global {
                    pattern.replace_all(item, &template[..]).into_owned()
                } else {
                    pattern.replace(item, &template[..]).into_owned()
                }
            })
            .filter(|item| !item.is_empty())
            .collect();
        self.queue.splice(start..end, replaced);
        self.touch_queue();
    }

    //---- playback bookkeeping ----//

    /// Returns the currently playing song to the head of the queue.
    pub fn putback(&mut self) {
        if !self.current.is_empty() {
            self.queue.insert(0, self.current.clone());
            self.touch_queue();
        }
    }

    /// Consumer pop: takes the head of the queue as the new current song and
    /// resets the play-time accounting.
    pub fn pop_next_song(&mut self) -> Option<Item> {
        if !self.queue_running || self.queue.is_empty() {
            return None;
        }
        let song = self.queue.remove(0);
        self.current = song.clone();
        self.song_start = now_secs();
        self.accumulated_paused = 0.0;
        self.touch_queue();
        Some(song)
    }

    /// Consumer bookkeeping once the player child has exited.
    pub fn finish_current(&mut self, now: f64) {
        if self.ignore_finish {
            self.ignore_finish = false;
        } else {
            if self.loop_mode {
                self.queue.push(self.current.clone());
                self.touch_queue();
            }
            self.history.push_back(HistoryEntry {
                item: self.current.clone(),
                started: self.song_start,
                finished: now,
            });
            self.trim_history();
        }
        if !self.quit {
            self.current.clear();
            self.paused = false;
            self.player_pid = None;
        }
    }

    /// The pop-and-record loop behind `next(k)`: skipped songs enter history
    /// as if they had been played, all sharing the current song's start
    /// time.
    pub fn advance(&mut self, count: usize, now: f64) {
        for _ in 0..count {
            if self.queue.is_empty() {
                break;
            }
            let song = self.queue.remove(0);
            if self.loop_mode {
                self.queue.push(song.clone());
            }
            self.history.push_back(HistoryEntry {
                item: song,
                started: self.song_start,
                finished: now,
            });
        }
        self.trim_history();
        self.touch_queue();
    }

    /// The rewind loop behind `previous(k)`: history tail back onto the
    /// queue head, or with loop mode on, queue tail rotated to the head.
    pub fn retreat(&mut self, count: usize) {
        for _ in 0..count {
            if self.loop_mode {
                match self.queue.pop() {
                    Some(last) => self.queue.insert(0, last),
                    None => break,
                }
            } else {
                match self.history.pop_back() {
                    Some(entry) => self.queue.insert(0, entry.item),
                    None => break,
                }
            }
        }
        self.touch_queue();
    }

    //---- history ----//

    pub fn trim_history(&mut self) {
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
    }

    /// Clamps the limit at zero and discards any excess entries.
    pub fn set_history_limit(&mut self, limit: i64) {
        self.max_history = limit.max(0) as usize;
        self.trim_history();
    }

    /// The last `limit` history entries; zero means all of them.
    pub fn history_tail(&self, limit: usize) -> Vec<HistoryEntry> {
        let skip = if limit == 0 {
            0
        } else {
            self.history.len().saturating_sub(limit)
        };
        self.history.iter().skip(skip).cloned().collect()
    }

    //---- queries ----//

    /// Seconds the current song has been audibly playing.
    pub fn current_time(&self, now: f64) -> f64 {
        if self.current.is_empty() {
            0.0
        } else if self.paused {
            self.last_pause - self.song_start - self.accumulated_paused
        } else {
            now - self.song_start - self.accumulated_paused
        }
    }

    /// Resolves a single queue position; negative wraps from the end,
    /// anything still out of bounds is an index error.
    fn strict_index(&self, index: i64) -> Result<usize, Fault> {
        let len = self.queue.len() as i64;
        let resolved = if index < 0 { len + index } else { index };
        if (0..len).contains(&resolved) {
            Ok(resolved as usize)
        } else {
            Err(Fault::index_error(format!(
                "queue index {index} out of range"
            )))
        }
    }
}

/// The store as shared between the consumer, the listeners and the timers.
/// Poisoning is ignored: the store holds no invariants a panicking reader
/// could break mid-flight that the next writer would not restore.
#[derive(Clone)]
pub struct Shared(Arc<Mutex<DataStore>>);

impl Shared {
    pub fn new(store: DataStore) -> Self {
        Shared(Arc::new(Mutex::new(store)))
    }

    pub fn lock(&self) -> MutexGuard<'_, DataStore> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
