//! Hub over two synchronized providers.

use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{HubError, HubResult};
use crate::transforms::PairIndicator;

use super::cache::{Arrival, Pruned};
use super::node::HubNode;
use super::upstream::Upstream;
use super::{HubBacked, Provider, StreamObservable, StreamObserver, TimedItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => f.write_str("left"),
            Side::Right => f.write_str("right"),
        }
    }
}

/// Observer registered with one of the two providers; forwards to the hub
/// with the side it came from.
struct PairSide<I: TimedItem, O: TimedItem, C: PairIndicator<I, O>> {
    hub: Weak<PairsHub<I, O, C>>,
    side: Side,
}

/// Results of one merge pass, announced after every lock is released.
struct Merged<O> {
    added: Vec<(O, usize, Option<Pruned>)>,
    mismatch: Option<HubError>,
}

/// Hub that applies a [`PairIndicator`] to two providers in lockstep.
///
/// A result for timestamp `T` is computed only once both providers hold an
/// item at `T`; until then the leading side waits. When both sides hold
/// items past the merged tail but their next timestamps differ, the streams
/// can no longer be paired and the triggering call fails with
/// `HubError::Sequence`. Results already matched in the same pass are still
/// announced first.
///
/// The configuration is inherited from the left provider.
///
/// # Example
///
/// ```rust,ignore
/// let spy = QuoteHub::new();
/// let qqq = QuoteHub::new();
/// let spread = PairsHub::new(&spy, &qqq, Spread::new())?;
/// ```
pub struct PairsHub<I: TimedItem, O: TimedItem, C: PairIndicator<I, O>> {
    node: HubNode<O>,
    indicator: C,
    left: Upstream<I>,
    right: Upstream<I>,
    left_side: Arc<PairSide<I, O, C>>,
    right_side: Arc<PairSide<I, O, C>>,
}

impl<I: TimedItem, O: TimedItem, C: PairIndicator<I, O>> PairsHub<I, O, C> {
    pub fn new<A, B>(left: &Arc<A>, right: &Arc<B>, indicator: C) -> HubResult<Arc<Self>>
    where
        A: StreamObservable<Item = I> + 'static,
        B: StreamObservable<Item = I> + 'static,
    {
        Self::with_providers(super::provider(left), super::provider(right), indicator)
    }

    /// # Errors
    ///
    /// `HubError::Construction` when both sides are the same provider.
    pub fn with_providers(left: Provider<I>, right: Provider<I>, indicator: C) -> HubResult<Arc<Self>> {
        let left_link = Upstream::new(&left);
        let right_link = Upstream::new(&right);
        if left_link.same_provider(&right_link) {
            return Err(HubError::construction(
                "provider",
                "pairs hub needs two distinct providers",
            ));
        }

        let node = HubNode::new(indicator.name(), left.config());
        let hub = Arc::new_cyclic(|hub| Self {
            node,
            indicator,
            left: left_link,
            right: right_link,
            left_side: Arc::new(PairSide {
                hub: hub.clone(),
                side: Side::Left,
            }),
            right_side: Arc::new(PairSide {
                hub: hub.clone(),
                side: Side::Right,
            }),
        });

        hub.rebuild()?;
        hub.attach()?;
        Ok(hub)
    }

    pub fn indicator(&self) -> &C {
        &self.indicator
    }

    fn attach(&self) -> HubResult<()> {
        let left = Arc::downgrade(&self.left_side);
        let right = Arc::downgrade(&self.right_side);
        let left: Weak<dyn StreamObserver<I>> = left;
        let right: Weak<dyn StreamObserver<I>> = right;
        self.left.attach(left)?;
        self.right.attach(right)
    }

    /// Stop receiving notifications from both providers.
    pub fn unsubscribe(&self) -> bool {
        let left = self.left.detach();
        let right = self.right.detach();
        left || right
    }

    pub fn is_subscribed(&self) -> bool {
        self.left.is_attached() && self.right.is_attached()
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

    /// Discard results at or after `from` and re-pair both providers from
    /// there.
    pub fn rebuild_from(&self, from: DateTime<Utc>) -> HubResult<()> {
        self.node.ensure_active()?;
        let merged = self.merge_providers(Some(from))?;

        let mut pruned: Option<Pruned> = None;
        for (_, _, p) in &merged.added {
            if let Some(p) = p {
                pruned = Some(Pruned {
                    to: p.to,
                    count: pruned.map_or(0, |x| x.count) + p.count,
                });
            }
        }
        if let Some(pruned) = pruned {
            self.node.notify_prune(pruned.to)?;
        }
        self.node.notify_rebuild(from)?;
        self.fail_on_mismatch(merged.mismatch)
    }

    /// Pair whatever both providers hold past the merged tail.
    fn sync(&self) -> HubResult<()> {
        self.node.ensure_active()?;
        let merged = self.merge_providers(None)?;
        for (result, index, pruned) in &merged.added {
            self.node.announce(result, *index, *pruned)?;
        }
        self.fail_on_mismatch(merged.mismatch)
    }

    fn merge_providers(&self, truncate: Option<DateTime<Utc>>) -> HubResult<Merged<O>> {
        let left = self.left.get()?;
        let right = self.right.get()?;

        let mut merged = None;
        left.visit_cache(&mut |a| {
            right.visit_cache(&mut |b| merged = Some(self.merge(a, b, truncate)));
        });
        Ok(merged.unwrap_or(Merged {
            added: Vec::new(),
            mismatch: None,
        }))
    }

    fn merge(&self, left: &[I], right: &[I], truncate: Option<DateTime<Utc>>) -> Merged<O> {
        let mut merged = Merged {
            added: Vec::new(),
            mismatch: None,
        };
        let mut cache = self.node.lock();
        if let Some(from) = truncate {
            cache.truncate_from(from);
        }
        let (Some(first_left), Some(first_right)) = (left.first(), right.first()) else {
            return merged;
        };

        // resume after the merged tail; an empty hub starts where both sides overlap
        let (mut i, mut j) = match cache.last().map(|x| x.timestamp()) {
            Some(tail) => (
                left.partition_point(|x| x.timestamp() <= tail),
                right.partition_point(|x| x.timestamp() <= tail),
            ),
            None => {
                let start = first_left.timestamp().max(first_right.timestamp());
                (
                    left.partition_point(|x| x.timestamp() < start),
                    right.partition_point(|x| x.timestamp() < start),
                )
            }
        };

        while i < left.len() && j < right.len() {
            let (a, b) = (left[i].timestamp(), right[j].timestamp());
            if a != b {
                let (missing, side) = if a < b { (a, Side::Right) } else { (b, Side::Left) };
                merged.mismatch = Some(HubError::sequence(
                    missing,
                    format!("{} provider advanced past this timestamp without it", side),
                ));
                break;
            }

            let outputs = cache.as_slice();
            let result = self.indicator.compute(&left[..=i], &right[..=j], outputs);
            if cache.classify(&result) == Arrival::Append {
                let pruned = cache.push(result.clone());
                merged.added.push((result, cache.len() - 1, pruned));
            } else {
                warn!(
                    "{}: paired result at {} is out of order, skipped",
                    self.node.name(),
                    result.timestamp()
                );
            }
            i += 1;
            j += 1;
        }
        merged
    }

    fn fail_on_mismatch(&self, mismatch: Option<HubError>) -> HubResult<()> {
        match mismatch {
            Some(error) => {
                warn!("{}: {}", self.node.name(), error);
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn handle_add(&self, item: &I) -> HubResult<()> {
        // a concurrent replacement at an already paired timestamp
        let tail = self.node.lock().last().map(|x| x.timestamp());
        match tail {
            Some(tail) if item.timestamp() <= tail => self.rebuild_from(item.timestamp()),
            _ => self.sync(),
        }
    }

    fn handle_prune(&self, to: DateTime<Utc>) -> HubResult<()> {
        let removed = self.node.lock().drop_through(to);
        if removed > 0 {
            self.node.notify_prune(to)?;
        }
        Ok(())
    }

    fn handle_complete(&self, side: Side) {
        match side {
            Side::Left => self.left.forget(),
            Side::Right => self.right.forget(),
        }
        debug!("{}: {} provider completed", self.node.name(), side);
        self.node.end_transmission();
    }

    fn handle_error(&self, side: Side, error: &HubError) {
        warn!("{}: {} provider error: {}", self.node.name(), side, error);
        self.node.notify_error(error);
    }
}

impl<I: TimedItem, O: TimedItem, C: PairIndicator<I, O>> PairSide<I, O, C> {
    fn hub(&self) -> HubResult<Arc<PairsHub<I, O, C>>> {
        self.hub.upgrade().ok_or_else(|| HubError::null_input("hub"))
    }
}

impl<I: TimedItem, O: TimedItem, C: PairIndicator<I, O>> StreamObserver<I> for PairSide<I, O, C> {
    fn on_add(&self, item: &I, _index_hint: Option<usize>) -> HubResult<()> {
        self.hub()?.handle_add(item)
    }

    fn on_rebuild(&self, from: DateTime<Utc>) -> HubResult<()> {
        self.hub()?.rebuild_from(from)
    }

    fn on_prune(&self, to: DateTime<Utc>) -> HubResult<()> {
        self.hub()?.handle_prune(to)
    }

    fn on_complete(&self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.handle_complete(self.side);
        }
    }

    fn on_error(&self, error: &HubError) {
        if let Some(hub) = self.hub.upgrade() {
            hub.handle_error(self.side, error);
        }
    }
}

impl<I: TimedItem, O: TimedItem, C: PairIndicator<I, O>> HubBacked for PairsHub<I, O, C> {
    type Item = O;

    fn node(&self) -> &HubNode<O> {
        &self.node
    }
}

impl<I: TimedItem, O: TimedItem, C: PairIndicator<I, O>> fmt::Display for PairsHub<I, O, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.node.name())
    }
}

impl<I: TimedItem, O: TimedItem, C: PairIndicator<I, O>> Drop for PairsHub<I, O, C> {
    fn drop(&mut self) {
        if self.unsubscribe() {
            debug!("{}: dropped, unsubscribed from providers", self.node.name());
        }
    }
}
