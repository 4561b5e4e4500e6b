use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::error::OVERFLOW_THRESHOLD;

use super::{Act, TimedItem};

/// How an arrival relates to what is already cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// Later than the tail (or the cache is empty)
    Append,
    /// Same timestamp and payload as the entry at this position
    Duplicate(usize),
    /// Same timestamp as the entry at this position, different payload
    Replace(usize),
    /// Same timestamp, but both items carry different correlation ids:
    /// a second event rather than a correction
    Concurrent(usize),
    /// Earlier than the tail and not cached; belongs at this position
    Late(usize),
}

impl Arrival {
    /// Map to the graph-level action. Only echo nodes may `Insert`; a
    /// computing node rebuilds from any late arrival.
    pub fn act(self, echo: bool) -> Act {
        match self {
            Arrival::Append | Arrival::Concurrent(_) => Act::Add,
            Arrival::Duplicate(_) => Act::Ignore,
            Arrival::Replace(_) => Act::Rebuild,
            Arrival::Late(_) if echo => Act::Insert,
            Arrival::Late(_) => Act::Rebuild,
        }
    }
}

/// Result of evicting the oldest entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pruned {
    /// Timestamp of the newest evicted entry
    pub to: DateTime<Utc>,
    /// Number of evicted entries
    pub count: usize,
}

/// Ordered, bounded cache of timed items.
///
/// Timestamps are strictly increasing. Once the cache holds more than
/// `max_size` entries, the oldest are evicted and reported as [`Pruned`]
/// so callers can trim auxiliary buffers by the same count.
///
/// The cache also tracks consecutive identical arrivals for the overflow
/// guard (see [`StreamCache::track_arrival`]).
#[derive(Debug, Clone)]
pub struct StreamCache<T: TimedItem> {
    items: VecDeque<T>,
    max_size: usize,
    last_arrival: Option<T>,
    repeat_count: u32,
}

impl<T: TimedItem> StreamCache<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size: max_size.max(1),
            last_arrival: None,
            repeat_count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Contiguous view of the cache, oldest first.
    pub fn as_slice(&mut self) -> &[T] {
        self.items.make_contiguous()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn first(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    /// Position of the entry with exactly this timestamp.
    pub fn index_of(&self, timestamp: DateTime<Utc>) -> Option<usize> {
        self.items
            .binary_search_by(|x| x.timestamp().cmp(&timestamp))
            .ok()
    }

    /// Position of the first entry at or after `timestamp` (`len` if none).
    pub fn index_gte(&self, timestamp: DateTime<Utc>) -> usize {
        self.items.partition_point(|x| x.timestamp() < timestamp)
    }

    /// Classify an arrival against the cache.
    pub fn classify(&self, item: &T) -> Arrival {
        let timestamp = item.timestamp();
        match self.items.back() {
            None => return Arrival::Append,
            Some(tail) if timestamp > tail.timestamp() => return Arrival::Append,
            _ => {}
        }

        match self.items.binary_search_by(|x| x.timestamp().cmp(&timestamp)) {
            Ok(index) => {
                let cached = &self.items[index];
                if cached == item {
                    return Arrival::Duplicate(index);
                }
                match (cached.correlation_id(), item.correlation_id()) {
                    (Some(a), Some(b)) if a != b => Arrival::Concurrent(index),
                    _ => Arrival::Replace(index),
                }
            }
            Err(index) => Arrival::Late(index),
        }
    }

    /// Count consecutive identical arrivals. Returns `true` once the same
    /// item has arrived more than [`OVERFLOW_THRESHOLD`] times in a row.
    pub fn track_arrival(&mut self, item: &T) -> bool {
        match &self.last_arrival {
            Some(last) if last == item => {
                self.repeat_count = self.repeat_count.saturating_add(1);
            }
            _ => {
                self.last_arrival = Some(item.clone());
                self.repeat_count = 1;
            }
        }
        self.repeat_count > OVERFLOW_THRESHOLD
    }

    pub fn repeat_count(&self) -> u32 {
        self.repeat_count
    }

    pub fn reset_arrivals(&mut self) {
        self.last_arrival = None;
        self.repeat_count = 0;
    }

    /// Append at the tail, then prune.
    pub fn push(&mut self, item: T) -> Option<Pruned> {
        self.items.push_back(item);
        self.prune()
    }

    /// Insert at `index`, then prune.
    pub fn insert(&mut self, index: usize, item: T) -> Option<Pruned> {
        self.items.insert(index, item);
        self.prune()
    }

    /// Replace the entry at `index`, returning the old one.
    pub fn replace(&mut self, index: usize, item: T) -> Option<T> {
        let slot = self.items.get_mut(index)?;
        Some(std::mem::replace(slot, item))
    }

    /// Place an item by timestamp: append, replace or insert. Used when
    /// replaying, where results normally arrive in order.
    pub fn upsert(&mut self, item: T) {
        match self.classify(&item) {
            Arrival::Append => self.items.push_back(item),
            Arrival::Duplicate(_) => {}
            Arrival::Replace(index) | Arrival::Concurrent(index) => self.items[index] = item,
            Arrival::Late(index) => self.items.insert(index, item),
        }
    }

    pub fn remove_at(&mut self, index: usize) -> Option<T> {
        let removed = self.items.remove(index);
        if removed.is_some() {
            self.reset_arrivals();
        }
        removed
    }

    /// Remove every entry matching `predicate`. Returns the earliest removed
    /// timestamp and the number removed.
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&T) -> bool) -> Option<(DateTime<Utc>, usize)> {
        let mut earliest = None;
        let before = self.items.len();
        self.items.retain(|x| {
            if predicate(x) {
                earliest = Some(earliest.map_or(x.timestamp(), |e: DateTime<Utc>| e.min(x.timestamp())));
                false
            } else {
                true
            }
        });
        let removed = before - self.items.len();
        if removed > 0 {
            self.reset_arrivals();
        }
        earliest.map(|ts| (ts, removed))
    }

    /// Remove every entry at or after `timestamp`. Returns the number removed.
    pub fn truncate_from(&mut self, timestamp: DateTime<Utc>) -> usize {
        let keep = self.index_gte(timestamp);
        let removed = self.items.len() - keep;
        self.items.truncate(keep);
        removed
    }

    /// Remove every entry at or before `timestamp`. Returns the number removed.
    pub fn drop_through(&mut self, timestamp: DateTime<Utc>) -> usize {
        let count = self.items.partition_point(|x| x.timestamp() <= timestamp);
        self.items.drain(..count);
        count
    }

    /// Evict the oldest entries beyond `max_size`.
    pub fn prune(&mut self) -> Option<Pruned> {
        if self.items.len() <= self.max_size {
            return None;
        }
        let count = self.items.len() - self.max_size;
        let to = self.items.drain(..count).last()?.timestamp();
        Some(Pruned { to, count })
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.reset_arrivals();
    }
}
