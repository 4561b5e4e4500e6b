// Root provider: echoes whatever the caller feeds it

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::config::{ConfigValidator, HubConfig};
use crate::data::{Quote, Tick};
use crate::error::{HubError, HubResult};

use super::cache::Arrival;
use super::node::HubNode;
use super::{Act, HubBacked, TimedItem};

/// Root provider of a streaming graph.
///
/// A source hub performs no computation: it keeps an ordered cache of the
/// items it is given and announces every change to its subscribers. Because
/// nothing is derived from its own history, a late item can be inserted in
/// place (`Act::Insert`); subscribers are told to rebuild from that point.
///
/// # Example
///
/// ```rust,ignore
/// let quotes = QuoteHub::new();
/// quotes.add(quote)?;                 // Act::Add
/// quotes.add(quote.clone())?;         // Act::Ignore
/// quotes.insert(late_quote)?;         // Act::Insert, subscribers rebuild
/// ```
pub struct SourceHub<T: TimedItem> {
    node: HubNode<T>,
}

/// Source of OHLCV quotes.
pub type QuoteHub = SourceHub<Quote>;

/// Source of raw trade ticks.
pub type TickHub = SourceHub<Tick>;

impl<T: TimedItem> SourceHub<T> {
    /// Source hub with the default cache bound.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            node: HubNode::new("SOURCE", HubConfig::default()),
        })
    }

    /// Source hub with a label and an explicit cache bound.
    pub fn with_config(name: impl Into<String>, config: HubConfig) -> HubResult<Arc<Self>> {
        ConfigValidator::validate_hub(&config)?;
        Ok(Arc::new(Self {
            node: HubNode::new(name, config),
        }))
    }

    /// Add one item, returning how it was classified.
    ///
    /// - later than the tail: appended, subscribers get `on_add`
    /// - identical to a cached item: ignored
    /// - same timestamp, new payload: replaced, subscribers rebuild
    /// - same timestamp, different correlation id: replaced, subscribers
    ///   get `on_add` so both events are applied
    /// - earlier than the tail and not cached: inserted, subscribers rebuild
    ///
    /// The 101st identical arrival in a row faults the hub, ends
    /// transmission and returns `HubError::Overflow`.
    pub fn add(&self, item: T) -> HubResult<Act> {
        self.node.ensure_active()?;

        let mut cache = self.node.lock();
        if cache.track_arrival(&item) {
            drop(cache);
            return Err(self.node.overflow());
        }

        let timestamp = item.timestamp();
        match cache.classify(&item) {
            Arrival::Append => {
                let pruned = cache.push(item.clone());
                let index = cache.len() - 1;
                drop(cache);
                self.node.announce(&item, index, pruned)?;
                Ok(Act::Add)
            }
            Arrival::Duplicate(_) => {
                trace!("{}: ignored duplicate at {}", self.node.name(), timestamp);
                Ok(Act::Ignore)
            }
            Arrival::Concurrent(index) => {
                cache.replace(index, item.clone());
                drop(cache);
                self.node.notify_add(&item, index)?;
                Ok(Act::Add)
            }
            Arrival::Replace(index) => {
                cache.replace(index, item);
                drop(cache);
                self.node.notify_rebuild(timestamp)?;
                Ok(Act::Rebuild)
            }
            Arrival::Late(index) => {
                let pruned = cache.insert(index, item);
                drop(cache);
                if let Some(pruned) = pruned {
                    self.node.notify_prune(pruned.to)?;
                }
                self.node.notify_rebuild(timestamp)?;
                Ok(Act::Insert)
            }
        }
    }

    /// Add an ordered batch. Timestamps must be strictly ascending; otherwise
    /// the whole batch is rejected before anything is applied.
    pub fn add_batch(&self, items: Vec<T>) -> HubResult<()> {
        self.node.ensure_active()?;
        if let Some(pair) = items
            .windows(2)
            .find(|pair| pair[1].timestamp() <= pair[0].timestamp())
        {
            return Err(HubError::sequence(
                pair[1].timestamp(),
                "batch timestamps must be strictly ascending",
            ));
        }

        debug!("{}: adding batch of {} items", self.node.name(), items.len());
        for item in items {
            self.add(item)?;
        }
        Ok(())
    }

    /// Explicit out-of-order add. Classification is the same as [`add`];
    /// the name documents that the caller expects a late arrival.
    ///
    /// [`add`]: SourceHub::add
    pub fn insert(&self, item: T) -> HubResult<Act> {
        self.add(item)
    }

    /// Remove a cached item. Returns false when it is not cached.
    pub fn remove(&self, item: &T) -> HubResult<bool> {
        self.node.ensure_active()?;
        let timestamp = item.timestamp();
        let mut cache = self.node.lock();
        let Some(index) = cache.index_of(timestamp).filter(|&i| cache.get(i) == Some(item)) else {
            return Ok(false);
        };
        cache.remove_at(index);
        drop(cache);

        self.node.notify_rebuild(timestamp)?;
        Ok(true)
    }

    /// Remove every cached item matching `predicate`; subscribers rebuild
    /// from the earliest removed timestamp.
    pub fn remove_where(&self, predicate: impl FnMut(&T) -> bool) -> HubResult<usize> {
        self.node.ensure_active()?;
        let removed = self.node.lock().remove_where(predicate);
        match removed {
            Some((from, count)) => {
                self.node.notify_rebuild(from)?;
                Ok(count)
            }
            None => Ok(0),
        }
    }

    /// Remove every item at or after `from`.
    pub fn remove_range(&self, from: DateTime<Utc>) -> HubResult<usize> {
        self.node.ensure_active()?;
        let removed = self.node.lock().truncate_from(from);
        if removed > 0 {
            self.node.notify_rebuild(from)?;
        }
        Ok(removed)
    }

    /// Ask subscribers to rebuild from `from`. A source hub has nothing of
    /// its own to recompute.
    pub fn rebuild(&self, from: DateTime<Utc>) -> HubResult<()> {
        self.node.ensure_active()?;
        self.node.notify_rebuild(from)
    }

    /// Clear a fault left by the overflow guard.
    pub fn reset_fault(&self) {
        self.node.reset_fault();
    }
}

impl<T: TimedItem> HubBacked for SourceHub<T> {
    type Item = T;

    fn node(&self) -> &HubNode<T> {
        &self.node
    }
}

impl<T: TimedItem> fmt::Display for SourceHub<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} items", self.node.name(), self.node.len())
    }
}

impl<T: TimedItem> fmt::Debug for SourceHub<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceHub").field("node", &self.node).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::StreamObservable;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, minute, 0).unwrap()
    }

    fn quote(minute: u32, close: Decimal) -> Quote {
        Quote::new(at(minute), close, close, close, close, dec!(100))
    }

    #[test]
    fn test_add_classification() {
        let hub = QuoteHub::new();
        assert_eq!(hub.add(quote(0, dec!(10))).unwrap(), Act::Add);
        assert_eq!(hub.add(quote(2, dec!(12))).unwrap(), Act::Add);
        assert_eq!(hub.add(quote(2, dec!(12))).unwrap(), Act::Ignore);
        assert_eq!(hub.add(quote(2, dec!(13))).unwrap(), Act::Rebuild);
        assert_eq!(hub.add(quote(1, dec!(11))).unwrap(), Act::Insert);

        let closes: Vec<_> = hub.results().iter().map(|q| q.close).collect();
        assert_eq!(closes, vec![dec!(10), dec!(11), dec!(13)]);
    }

    #[test]
    fn test_batch_must_be_ascending() {
        let hub = QuoteHub::new();
        let err = hub
            .add_batch(vec![quote(0, dec!(1)), quote(2, dec!(2)), quote(1, dec!(3))])
            .unwrap_err();
        assert!(matches!(err, HubError::Sequence { .. }));
        assert!(hub.is_empty());

        let err = hub
            .add_batch(vec![quote(0, dec!(1)), quote(0, dec!(2))])
            .unwrap_err();
        assert!(matches!(err, HubError::Sequence { .. }));

        hub.add_batch(vec![quote(0, dec!(1)), quote(1, dec!(2))]).unwrap();
        assert_eq!(hub.len(), 2);
    }

    #[test]
    fn test_remove_variants() {
        let hub = QuoteHub::new();
        hub.add_batch((0..6).map(|m| quote(m, Decimal::from(m))).collect())
            .unwrap();

        assert!(hub.remove(&quote(1, dec!(1))).unwrap());
        assert!(!hub.remove(&quote(1, dec!(1))).unwrap());
        // wrong payload at a cached timestamp is not removed
        assert!(!hub.remove(&quote(2, dec!(99))).unwrap());

        assert_eq!(hub.remove_where(|q| q.close > dec!(3)).unwrap(), 2);
        assert_eq!(hub.remove_range(at(3)).unwrap(), 1);
        assert_eq!(hub.len(), 2);
    }

    #[test]
    fn test_pruning_bound() {
        let hub = QuoteHub::with_config("QUOTES", HubConfig::with_max_cache_size(5)).unwrap();
        for m in 0..12 {
            hub.add(quote(m, Decimal::from(m))).unwrap();
        }
        let results = hub.results();
        assert_eq!(results.len(), 5);
        assert_eq!(results[0].timestamp, at(7));
        assert_eq!(results[4].timestamp, at(11));
    }

    #[test]
    fn test_invalid_config() {
        let err = QuoteHub::with_config("QUOTES", HubConfig::with_max_cache_size(0)).unwrap_err();
        assert!(matches!(
            err,
            HubError::Construction { ref parameter, .. } if parameter == "max_cache_size"
        ));
    }

    #[test]
    fn test_overflow_on_101st_identical_add() {
        let hub = QuoteHub::new();
        let item = quote(0, dec!(10));
        for _ in 0..100 {
            hub.add(item.clone()).unwrap();
        }
        let err = hub.add(item.clone()).unwrap_err();
        assert!(err.is_overflow());
        assert!(hub.is_faulted());
        assert!(matches!(hub.add(quote(1, dec!(11))), Err(HubError::Faulted { .. })));

        hub.reset_fault();
        assert_eq!(hub.add(quote(1, dec!(11))).unwrap(), Act::Add);
    }

    #[test]
    fn test_display_label() {
        let hub = TickHub::with_config("TICKS", HubConfig::default()).unwrap();
        hub.add(Tick::new(at(0), dec!(1), dec!(1))).unwrap();
        assert_eq!(hub.to_string(), "TICKS: 1 items");
    }
}
