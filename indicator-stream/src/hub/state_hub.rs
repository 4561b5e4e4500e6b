//! Computing hub that snapshots indicator state per cache position.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{HubError, HubResult};
use crate::transforms::StatefulIndicator;

use super::cache::{Arrival, Pruned};
use super::node::HubNode;
use super::stream_hub::Step;
use super::upstream::Upstream;
use super::{locate, HubBacked, Provider, StreamObservable, StreamObserver, TimedItem};

/// Hub variant that keeps a snapshot of the indicator's rolling state next
/// to every cached result.
///
/// A rebuild from `T` restores the snapshot taken just before `T` instead
/// of rescanning history, then replays forward. Results are identical to a
/// [`StreamHub`](super::StreamHub) running the equivalent stateless
/// indicator; only the cost of rebuilds changes.
///
/// `states[i]` is always the state after computing `results[i]`; pruning
/// drops states and results together.
pub struct StateHub<I: TimedItem, O: TimedItem, C: StatefulIndicator<I, O>> {
    node: HubNode<O>,
    indicator: C,
    states: Mutex<VecDeque<C::State>>,
    upstream: Upstream<I>,
    self_ref: Weak<Self>,
}

impl<I: TimedItem, O: TimedItem, C: StatefulIndicator<I, O>> StateHub<I, O, C> {
    pub fn new<P>(provider: &Arc<P>, indicator: C) -> HubResult<Arc<Self>>
    where
        P: StreamObservable<Item = I> + 'static,
    {
        Self::with_provider(super::provider(provider), indicator)
    }

    pub fn with_provider(provider: Provider<I>, indicator: C) -> HubResult<Arc<Self>> {
        let node = HubNode::new(indicator.name(), provider.config());
        let hub = Arc::new_cyclic(|self_ref| Self {
            node,
            indicator,
            states: Mutex::new(VecDeque::new()),
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

    /// Number of stored state snapshots; always equals the cache length.
    pub fn state_count(&self) -> usize {
        self.states.lock().len()
    }

    /// Snapshot taken after the result at `timestamp`.
    pub fn state_at(&self, timestamp: DateTime<Utc>) -> Option<C::State> {
        let states = self.states.lock();
        let index = self.node.lock().index_of(timestamp)?;
        states.get(index).cloned()
    }

    fn attach(&self) -> HubResult<()> {
        let observer: Weak<dyn StreamObserver<I>> = self.self_ref.clone();
        self.upstream.attach(observer)
    }

    pub fn unsubscribe(&self) -> bool {
        self.upstream.detach()
    }

    pub fn is_subscribed(&self) -> bool {
        self.upstream.is_attached()
    }

    pub fn reset_fault(&self) {
        self.node.reset_fault();
    }

    pub fn reinitialize(&self) -> HubResult<()> {
        self.unsubscribe();
        self.reset_fault();
        self.rebuild()?;
        self.attach()
    }

    pub fn rebuild(&self) -> HubResult<()> {
        self.rebuild_from(DateTime::<Utc>::MIN_UTC)
    }

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

    /// Roll back to the snapshot before `from` and replay.
    fn replay(&self, inputs: &[I], from: DateTime<Utc>) -> Option<Pruned> {
        let mut states = self.states.lock();
        let mut cache = self.node.lock();

        cache.truncate_from(from);
        states.truncate(cache.len());
        let mut state = states
            .back()
            .cloned()
            .unwrap_or_else(|| self.indicator.initial_state());

        let mut last_pruned: Option<Pruned> = None;
        let start = inputs.partition_point(|x| x.timestamp() < from);
        for index in start..inputs.len() {
            let result = self.indicator.compute(index, &inputs[..=index], &mut state);
            if cache.classify(&result) != Arrival::Append {
                warn!(
                    "{}: replayed result at {} is out of order, skipped",
                    self.node.name(),
                    result.timestamp()
                );
                continue;
            }
            states.push_back(state.clone());
            if let Some(pruned) = cache.push(result) {
                states.drain(..pruned.count);
                last_pruned = Some(Pruned {
                    to: pruned.to,
                    count: last_pruned.map_or(0, |p| p.count) + pruned.count,
                });
            }
        }
        last_pruned
    }

    fn step(&self, inputs: &[I], timestamp: DateTime<Utc>, hint: Option<usize>) -> HubResult<Step<O>> {
        let index = locate(inputs, timestamp, hint)?;
        let mut states = self.states.lock();
        let mut cache = self.node.lock();

        let prior = cache.index_gte(timestamp);
        let mut state = match prior {
            0 => self.indicator.initial_state(),
            p => states
                .get(p - 1)
                .cloned()
                .unwrap_or_else(|| self.indicator.initial_state()),
        };
        let result = self.indicator.compute(index, &inputs[..=index], &mut state);

        if cache.track_arrival(&result) {
            return Ok(Step::Overflow);
        }

        Ok(match cache.classify(&result) {
            Arrival::Append => {
                states.push_back(state);
                let pruned = cache.push(result.clone());
                if let Some(pruned) = pruned {
                    states.drain(..pruned.count);
                }
                Step::Added(result, cache.len() - 1, pruned)
            }
            Arrival::Duplicate(_) => Step::Ignored,
            _ => Step::Rebuild(result.timestamp().min(timestamp)),
        })
    }

    pub fn remove(&self, timestamp: DateTime<Utc>) -> HubResult<bool> {
        self.node.ensure_active()?;
        let mut states = self.states.lock();
        let mut cache = self.node.lock();
        let Some(index) = cache.index_of(timestamp) else {
            return Ok(false);
        };
        cache.remove_at(index);
        states.remove(index);
        drop(cache);
        drop(states);

        self.node.notify_rebuild(timestamp)?;
        Ok(true)
    }

    pub fn remove_range(&self, from: DateTime<Utc>, notify: bool) -> HubResult<usize> {
        self.node.ensure_active()?;
        let removed = {
            let mut states = self.states.lock();
            let mut cache = self.node.lock();
            let removed = cache.truncate_from(from);
            states.truncate(cache.len());
            removed
        };
        if notify && removed > 0 {
            self.node.notify_rebuild(from)?;
        }
        Ok(removed)
    }
}

impl<I: TimedItem, O: TimedItem, C: StatefulIndicator<I, O>> StreamObserver<I>
    for StateHub<I, O, C>
{
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
        let removed = {
            let mut states = self.states.lock();
            let mut cache = self.node.lock();
            let removed = cache.drop_through(to);
            let stale = removed.min(states.len());
            states.drain(..stale);
            removed
        };
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

impl<I: TimedItem, O: TimedItem, C: StatefulIndicator<I, O>> HubBacked for StateHub<I, O, C> {
    type Item = O;

    fn node(&self) -> &HubNode<O> {
        &self.node
    }
}

impl<I: TimedItem, O: TimedItem, C: StatefulIndicator<I, O>> fmt::Display for StateHub<I, O, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.node.name())
    }
}

impl<I: TimedItem, O: TimedItem, C: StatefulIndicator<I, O>> Drop for StateHub<I, O, C> {
    fn drop(&mut self) {
        if self.upstream.detach() {
            debug!("{}: dropped, unsubscribed from provider", self.node.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::data::Quote;
    use crate::hub::{QuoteHub, StreamHub};
    use crate::transforms::{Highest, Lowest};
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, minute, 0).unwrap()
    }

    fn quote(minute: u32, close: Decimal) -> Quote {
        Quote::new(at(minute), close, close, close, close, dec!(1))
    }

    #[test]
    fn test_matches_full_replay_under_corrections() {
        let quotes = QuoteHub::new();
        let cached = StateHub::new(&quotes, Highest::new(3).unwrap()).unwrap();
        let replayed = StreamHub::new(&quotes, Highest::new(3).unwrap()).unwrap();

        let closes = [5, 3, 8, 1, 2, 9, 4, 4, 7, 6];
        for (m, c) in closes.iter().enumerate() {
            quotes.add(quote(m as u32, Decimal::from(*c))).unwrap();
        }
        assert_eq!(cached.results(), replayed.results());

        quotes.add(quote(5, dec!(0))).unwrap();
        quotes.remove(&quote(2, dec!(8))).unwrap();
        quotes.insert(quote(2, dec!(10))).unwrap();
        assert_eq!(cached.results(), replayed.results());
        assert_eq!(cached.state_count(), cached.results().len());
    }

    #[test]
    fn test_state_snapshot_restored_on_rebuild() {
        let quotes = QuoteHub::new();
        let lowest = StateHub::new(&quotes, Lowest::new(2).unwrap()).unwrap();
        for (m, c) in [(0, dec!(4)), (1, dec!(2)), (2, dec!(6)), (3, dec!(5))] {
            quotes.add(quote(m, c)).unwrap();
        }
        let values: Vec<_> = lowest.results().iter().map(|r| r.value).collect();
        assert_eq!(values, vec![None, Some(dec!(2)), Some(dec!(2)), Some(dec!(5))]);

        // correct the last bar only; earlier snapshots are reused
        quotes.add(quote(3, dec!(1))).unwrap();
        assert_eq!(lowest.results()[3].value, Some(dec!(1)));
        assert!(lowest.state_at(at(2)).is_some());
    }

    #[test]
    fn test_pruning_keeps_states_aligned() {
        let quotes = QuoteHub::with_config("QUOTES", HubConfig::with_max_cache_size(4)).unwrap();
        let highest = StateHub::new(&quotes, Highest::new(2).unwrap()).unwrap();

        for m in 0..10 {
            quotes.add(quote(m, Decimal::from(m % 3))).unwrap();
            assert_eq!(highest.state_count(), highest.results().len());
        }
        assert_eq!(highest.results().len(), 4);
        assert_eq!(highest.results()[0].timestamp, at(6));
    }
}
