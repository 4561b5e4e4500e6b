// Streaming hub graph: providers, observers and computing hubs

//! Providers, observers and hubs.
//!
//! A root [`SourceHub`] owns an ordered cache of incoming items. Hubs
//! subscribe to a provider, compute derived items as data arrives, and are
//! providers to their own subscribers in turn. Every mutation on a root
//! provider cascades synchronously and depth-first through the whole graph
//! before the call returns.
//!
//! ```text
//!   QuoteHub ──► QuoteAggregatorHub ──► StreamHub<Sma> ──► StreamHub<Ema>
//!       │
//!       └──────► StateHub<Highest> ──┐
//!                                    ├──► PairsHub<Spread>
//!   QuoteHub ──► StreamHub<Sma> ─────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use indicator_stream::hub::{QuoteHub, HubExt};
//!
//! let quotes = QuoteHub::new();
//! let sma = quotes.to_sma_hub(20)?;
//! let ema = sma.to_ema_hub(9)?;
//!
//! for quote in feed {
//!     quotes.add(quote)?;
//! }
//! println!("{}: {} results", ema, ema.results().len());
//! ```

mod aggregator;
mod cache;
mod ext;
mod node;
mod upstream;
mod pairs_hub;
mod source;
mod state_hub;
mod stream_hub;

use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};

use crate::config::HubConfig;
use crate::error::{HubError, HubResult};

pub use aggregator::{AggregatorHub, BarSource, DedupWindow, QuoteAggregatorHub, TickAggregatorHub};
pub use cache::{Arrival, Pruned, StreamCache};
pub use ext::{HubExt, QuoteHubExt, TickHubExt};
pub use node::{HubNode, ObserverRegistry, SubscriptionId};
pub use pairs_hub::PairsHub;
pub use source::{QuoteHub, SourceHub, TickHub};
pub use state_hub::StateHub;
pub use stream_hub::StreamHub;

/// Anything that can flow through the graph.
///
/// Items are ordered by timestamp. Two items with the same timestamp and
/// equal payload are duplicates; the same timestamp with a different
/// payload is a correction.
pub trait TimedItem: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    fn timestamp(&self) -> DateTime<Utc>;

    /// Identifier that distinguishes concurrent events sharing a timestamp.
    fn correlation_id(&self) -> Option<&str> {
        None
    }
}

/// Outcome of classifying an arrival against a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Act {
    /// New tail item
    Add,
    /// Exact duplicate; counted toward the overflow guard
    Ignore,
    /// Late item placed in position without downstream recompute of the
    /// node itself (echo nodes only); subscribers rebuild
    Insert,
    /// Replace or insert before the tail; everything after is recomputed
    Rebuild,
}

/// Receives push notifications from a provider.
///
/// Handlers run synchronously inside the provider's mutation call. An error
/// returned from a handler aborts the cascade and reaches the caller.
pub trait StreamObserver<T: TimedItem>: Send + Sync {
    /// A new item was appended (or a concurrent item replaced one in place)
    /// at `index_hint` in the provider's cache. The hint is verified before use.
    fn on_add(&self, item: &T, index_hint: Option<usize>) -> HubResult<()>;

    /// Everything at or after `from` may have changed.
    fn on_rebuild(&self, from: DateTime<Utc>) -> HubResult<()>;

    /// The provider dropped every item at or before `to`.
    fn on_prune(&self, to: DateTime<Utc>) -> HubResult<()>;

    /// The provider ended transmission.
    fn on_complete(&self);

    /// The provider faulted.
    fn on_error(&self, error: &HubError);
}

/// A node exposing an ordered cache and a subscription mechanism.
pub trait StreamObservable: Send + Sync {
    /// Type of the cached items
    type Item: TimedItem;

    /// Diagnostic label
    fn name(&self) -> String;

    /// Cache settings, inherited by hubs built on this provider
    fn config(&self) -> HubConfig;

    /// Register a non-owning observer. Observers are notified in
    /// subscription order; dropped observers are skipped and forgotten.
    fn subscribe(&self, observer: Weak<dyn StreamObserver<Self::Item>>) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    fn observer_count(&self) -> usize;

    /// Run `visitor` over the cache while it is locked.
    fn visit_cache(&self, visitor: &mut dyn FnMut(&[Self::Item]));

    /// Copy of the cache.
    fn results(&self) -> Vec<Self::Item>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_faulted(&self) -> bool;

    /// Notify completion and release every subscriber. Idempotent.
    fn end_transmission(&self);
}

/// Shared, type-erased provider handle.
pub type Provider<T> = Arc<dyn StreamObservable<Item = T>>;

/// Implemented by nodes built around a [`HubNode`]; supplies
/// [`StreamObservable`] for free.
pub trait HubBacked: Send + Sync {
    type Item: TimedItem;

    fn node(&self) -> &HubNode<Self::Item>;
}

impl<H: HubBacked> StreamObservable for H {
    type Item = H::Item;

    fn name(&self) -> String {
        self.node().name().to_string()
    }

    fn config(&self) -> HubConfig {
        self.node().config()
    }

    fn subscribe(&self, observer: Weak<dyn StreamObserver<Self::Item>>) -> SubscriptionId {
        self.node().subscribe(observer)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.node().unsubscribe(id)
    }

    fn observer_count(&self) -> usize {
        self.node().observer_count()
    }

    fn visit_cache(&self, visitor: &mut dyn FnMut(&[Self::Item])) {
        let mut cache = self.node().lock();
        visitor(cache.as_slice());
    }

    fn results(&self) -> Vec<Self::Item> {
        self.node().results()
    }

    fn len(&self) -> usize {
        self.node().len()
    }

    fn is_faulted(&self) -> bool {
        self.node().is_faulted()
    }

    fn end_transmission(&self) {
        self.node().end_transmission()
    }
}

/// Erase a concrete provider into a [`Provider`] handle.
pub fn provider<P>(hub: &Arc<P>) -> Provider<P::Item>
where
    P: StreamObservable + 'static,
{
    hub.clone()
}

/// Position of `item` in a provider cache. The hint is used only when the
/// entry it points at carries the same timestamp.
pub(crate) fn locate<T: TimedItem>(
    cache: &[T],
    timestamp: DateTime<Utc>,
    hint: Option<usize>,
) -> HubResult<usize> {
    if let Some(index) = hint {
        if cache.get(index).map(|x| x.timestamp()) == Some(timestamp) {
            return Ok(index);
        }
    }
    cache
        .binary_search_by(|x| x.timestamp().cmp(&timestamp))
        .map_err(|_| HubError::sequence(timestamp, "item is not cached by its provider"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TimeValue;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, minute, 0).unwrap()
    }

    #[test]
    fn test_locate_verifies_hint() {
        let cache: Vec<TimeValue> = (0..5).map(|m| TimeValue::empty(at(m))).collect();

        assert_eq!(locate(&cache, at(3), Some(3)).unwrap(), 3);
        // stale hint falls back to a search
        assert_eq!(locate(&cache, at(3), Some(1)).unwrap(), 3);
        assert_eq!(locate(&cache, at(4), Some(99)).unwrap(), 4);
        assert!(matches!(
            locate(&cache, at(9), None),
            Err(HubError::Sequence { .. })
        ));
    }
}
