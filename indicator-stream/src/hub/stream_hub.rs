//! Generic computing hub with full-replay rebuilds.

use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{HubError, HubResult};
use crate::transforms::Indicator;

use super::cache::{Arrival, Pruned};
use super::node::HubNode;
use super::upstream::Upstream;
use super::{locate, HubBacked, Provider, StreamObservable, StreamObserver, TimedItem};

/// What a single upstream arrival did to the hub's cache.
pub(crate) enum Step<O> {
    Added(O, usize, Option<Pruned>),
    Ignored,
    Rebuild(DateTime<Utc>),
    Overflow,
}

/// Hub that applies an [`Indicator`] to every item of its provider.
///
/// On `on_add` the indicator computes one result, which is appended when it
/// extends the cache and triggers a rebuild otherwise. On `on_rebuild(T)`
/// every result at or after `T` is discarded and recomputed from the
/// provider's cache. Results are index-aligned with the provider.
///
/// The hub inherits its provider's [`HubConfig`](crate::config::HubConfig)
/// and holds only a weak reference to it.
///
/// # Example
///
/// ```rust,ignore
/// let quotes = QuoteHub::new();
/// let sma = StreamHub::new(&quotes, Sma::new(20)?)?;
/// ```
pub struct StreamHub<I: TimedItem, O: TimedItem, C: Indicator<I, O>> {
    node: HubNode<O>,
    indicator: C,
    upstream: Upstream<I>,
    self_ref: Weak<Self>,
}

impl<I: TimedItem, O: TimedItem, C: Indicator<I, O>> StreamHub<I, O, C> {
    /// Build the hub, compute results for everything the provider already
    /// holds, then subscribe.
    pub fn new<P>(provider: &Arc<P>, indicator: C) -> HubResult<Arc<Self>>
    where
        P: StreamObservable<Item = I> + 'static,
    {
        Self::with_provider(super::provider(provider), indicator)
    }

    /// Same as [`StreamHub::new`] for an already type-erased provider.
    pub fn with_provider(provider: Provider<I>, indicator: C) -> HubResult<Arc<Self>> {
        let node = HubNode::new(indicator.name(), provider.config());
        let hub = Arc::new_cyclic(|self_ref| Self {
            node,
            indicator,
            upstream: Upstream::new(&provider),
            self_ref: self_ref.clone(),
        });

        hub.rebuild()?;
        hub.attach()?;
        Ok(hub)
    }

    pub fn indicator(&self) -> &C {
        &self.indicator
    }

    fn attach(&self) -> HubResult<()> {
        let observer: Weak<dyn StreamObserver<I>> = self.self_ref.clone();
        self.upstream.attach(observer)
    }

    /// Stop receiving upstream notifications.
    pub fn unsubscribe(&self) -> bool {
        self.upstream.detach()
    }

    pub fn is_subscribed(&self) -> bool {
        self.upstream.is_attached()
    }

    pub fn reset_fault(&self) {
        self.node.reset_fault();
    }

    /// Unsubscribe, clear any fault, rebuild everything and resubscribe.
    pub fn reinitialize(&self) -> HubResult<()> {
        self.unsubscribe();
        self.reset_fault();
        self.rebuild()?;
        self.attach()
    }

    /// Recompute every result.
    pub fn rebuild(&self) -> HubResult<()> {
        self.rebuild_from(DateTime::<Utc>::MIN_UTC)
    }

    /// Discard results at or after `from` and recompute them from the
    /// provider's cache, then tell subscribers to rebuild from `from`.
    pub fn rebuild_from(&self, from: DateTime<Utc>) -> HubResult<()> {
        self.node.ensure_active()?;
        let provider = self.upstream.get()?;

        let mut pruned = None;
        provider.visit_cache(&mut |inputs| pruned = self.replay(inputs, from));

        if let Some(pruned) = pruned {
            self.node.notify_prune(pruned.to)?;
        }
        self.node.notify_rebuild(from)
    }

    fn replay(&self, inputs: &[I], from: DateTime<Utc>) -> Option<Pruned> {
        let mut cache = self.node.lock();
        cache.truncate_from(from);

        let start = inputs.partition_point(|x| x.timestamp() < from);
        for index in start..inputs.len() {
            let timestamp = inputs[index].timestamp();
            let outputs = cache.as_slice();
            let prior = outputs.partition_point(|x| x.timestamp() < timestamp);
            let result = self
                .indicator
                .compute(index, &inputs[..=index], &outputs[..prior]);
            cache.upsert(result);
        }
        cache.prune()
    }

    fn step(&self, inputs: &[I], timestamp: DateTime<Utc>, hint: Option<usize>) -> HubResult<Step<O>> {
        let index = locate(inputs, timestamp, hint)?;
        let mut cache = self.node.lock();

        let outputs = cache.as_slice();
        let prior = outputs.partition_point(|x| x.timestamp() < timestamp);
        let result = self
            .indicator
            .compute(index, &inputs[..=index], &outputs[..prior]);

        if cache.track_arrival(&result) {
            return Ok(Step::Overflow);
        }

        Ok(match cache.classify(&result) {
            Arrival::Append => {
                let pruned = cache.push(result.clone());
                Step::Added(result, cache.len() - 1, pruned)
            }
            Arrival::Duplicate(_) => Step::Ignored,
            _ => Step::Rebuild(result.timestamp().min(timestamp)),
        })
    }

    /// Remove the result at `timestamp`; subscribers rebuild from there.
    pub fn remove(&self, timestamp: DateTime<Utc>) -> HubResult<bool> {
        self.node.ensure_active()?;
        let mut cache = self.node.lock();
        let Some(index) = cache.index_of(timestamp) else {
            return Ok(false);
        };
        cache.remove_at(index);
        drop(cache);

        self.node.notify_rebuild(timestamp)?;
        Ok(true)
    }

    /// Remove every result at or after `from`, optionally telling
    /// subscribers to rebuild.
    pub fn remove_range(&self, from: DateTime<Utc>, notify: bool) -> HubResult<usize> {
        self.node.ensure_active()?;
        let removed = self.node.lock().truncate_from(from);
        if notify && removed > 0 {
            self.node.notify_rebuild(from)?;
        }
        Ok(removed)
    }
}

impl<I: TimedItem, O: TimedItem, C: Indicator<I, O>> StreamObserver<I> for StreamHub<I, O, C> {
    fn on_add(&self, item: &I, index_hint: Option<usize>) -> HubResult<()> {
        self.node.ensure_active()?;
        let provider = self.upstream.get()?;

        let mut step = Ok(Step::Ignored);
        provider.visit_cache(&mut |inputs| {
            step = self.step(inputs, item.timestamp(), index_hint);
        });

        match step? {
            Step::Added(result, index, pruned) => self.node.announce(&result, index, pruned),
            Step::Ignored => Ok(()),
            Step::Rebuild(from) => self.rebuild_from(from),
            Step::Overflow => {
                // leave the provider so it keeps serving its other subscribers
                self.upstream.detach();
                Err(self.node.overflow())
            }
        }
    }

    fn on_rebuild(&self, from: DateTime<Utc>) -> HubResult<()> {
        self.rebuild_from(from)
    }

    fn on_prune(&self, to: DateTime<Utc>) -> HubResult<()> {
        let removed = self.node.lock().drop_through(to);
        if removed > 0 {
            self.node.notify_prune(to)?;
        }
        Ok(())
    }

    fn on_complete(&self) {
        self.upstream.forget();
        self.node.end_transmission();
    }

    fn on_error(&self, error: &HubError) {
        warn!("{}: provider error: {}", self.node.name(), error);
        self.node.notify_error(error);
    }
}

impl<I: TimedItem, O: TimedItem, C: Indicator<I, O>> HubBacked for StreamHub<I, O, C> {
    type Item = O;

    fn node(&self) -> &HubNode<O> {
        &self.node
    }
}

impl<I: TimedItem, O: TimedItem, C: Indicator<I, O>> fmt::Display for StreamHub<I, O, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.node.name())
    }
}

impl<I: TimedItem, O: TimedItem, C: Indicator<I, O>> Drop for StreamHub<I, O, C> {
    fn drop(&mut self) {
        if self.upstream.detach() {
            debug!("{}: dropped, unsubscribed from provider", self.node.name());
        }
    }
}
