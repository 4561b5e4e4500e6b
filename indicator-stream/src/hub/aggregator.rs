//! Aggregator hubs: roll quotes or ticks up into fixed-period bars.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::{ConfigValidator, DedupConfig};
use crate::data::{floor_to_period, format_period, Quote, Tick, Timeframe};
use crate::error::{HubError, HubResult};

use super::cache::Pruned;
use super::node::HubNode;
use super::upstream::Upstream;
use super::{HubBacked, Provider, StreamObservable, StreamObserver, TimedItem};

/// Input that can be folded into an OHLCV bar.
pub trait BarSource: TimedItem {
    /// Label prefix, e.g. `QUOTE` in `QUOTE-AGG(00:05:00)`
    const LABEL: &'static str;

    /// First bar of a bucket, built from this item alone.
    fn open_bar(&self, bucket: DateTime<Utc>) -> Quote;

    /// Fold this item into the bar of its bucket.
    fn merge_into(&self, bar: &mut Quote);
}

impl BarSource for Quote {
    const LABEL: &'static str = "QUOTE";

    fn open_bar(&self, bucket: DateTime<Utc>) -> Quote {
        Quote {
            timestamp: bucket,
            ..self.clone()
        }
    }

    fn merge_into(&self, bar: &mut Quote) {
        bar.high = bar.high.max(self.high);
        bar.low = bar.low.min(self.low);
        bar.close = self.close;
        bar.volume += self.volume;
    }
}

impl BarSource for Tick {
    const LABEL: &'static str = "TICK";

    fn open_bar(&self, bucket: DateTime<Utc>) -> Quote {
        Quote::new(bucket, self.price, self.price, self.price, self.price, self.volume)
    }

    fn merge_into(&self, bar: &mut Quote) {
        bar.high = bar.high.max(self.price);
        bar.low = bar.low.min(self.price);
        bar.close = self.price;
        bar.volume += self.volume;
    }
}

/// Bounded memory of recently seen correlation ids.
///
/// Ids older than `window` relative to the incoming item are forgotten
/// first; above `capacity` the oldest ids are evicted.
#[derive(Debug, Clone)]
pub struct DedupWindow {
    window: Duration,
    capacity: usize,
    seen: HashMap<String, DateTime<Utc>>,
    order: VecDeque<(DateTime<Utc>, String)>,
}

impl DedupWindow {
    pub fn new(config: &DedupConfig) -> Self {
        Self {
            window: Duration::from_std(config.window()).unwrap_or(Duration::MAX),
            capacity: config.capacity,
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Record `id` seen at `timestamp`. Returns false when the id is
    /// already remembered.
    pub fn check_and_record(&mut self, id: &str, timestamp: DateTime<Utc>) -> bool {
        if let Some(horizon) = timestamp.checked_sub_signed(self.window) {
            while self.order.front().is_some_and(|(ts, _)| *ts < horizon) {
                self.evict_front();
            }
        }

        if self.seen.contains_key(id) {
            return false;
        }
        self.seen.insert(id.to_string(), timestamp);
        self.order.push_back((timestamp, id.to_string()));
        while self.order.len() > self.capacity {
            self.evict_front();
        }
        true
    }

    fn evict_front(&mut self) {
        if let Some((ts, id)) = self.order.pop_front() {
            if self.seen.get(&id) == Some(&ts) {
                self.seen.remove(&id);
            }
        }
    }

    /// Forget every id recorded at or after `from`.
    pub fn rollback(&mut self, from: DateTime<Utc>) {
        self.order.retain(|(ts, _)| *ts < from);
        self.seen.retain(|_, ts| *ts < from);
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }
}

/// The bar currently being built.
#[derive(Debug, Clone)]
struct BucketState {
    bucket: DateTime<Utc>,
    bar: Quote,
}

/// Change made to the cache by one input, announced once locks are released.
enum Emit {
    Added(Quote, usize, Option<Pruned>),
    Updated(DateTime<Utc>),
}

/// Hub that rolls items of its provider up into bars of a fixed period.
///
/// - an item in a later bucket closes the current bar and opens a new one;
///   with `fill_gaps`, every skipped bucket gets a flat, zero-volume bar at
///   the last close
/// - an item in the current bucket updates the bar in place and subscribers
///   rebuild from the bar's timestamp
/// - an item in an earlier bucket is a correction: bars from that bucket on
///   are rebuilt from the provider's cache
///
/// Items carrying a correlation id (ticks with an execution id) pass through
/// a [`DedupWindow`], so a re-delivered execution is applied once.
pub struct AggregatorHub<I: BarSource> {
    node: HubNode<Quote>,
    upstream: Upstream<I>,
    period: Duration,
    origin: Duration,
    fill_gaps: bool,
    bucket: Mutex<Option<BucketState>>,
    dedup: Mutex<DedupWindow>,
    self_ref: Weak<Self>,
}

/// Aggregates quotes into larger bars.
pub type QuoteAggregatorHub = AggregatorHub<Quote>;

/// Aggregates trade ticks into bars.
pub type TickAggregatorHub = AggregatorHub<Tick>;

impl<I: BarSource> AggregatorHub<I> {
    /// Aggregate to an arbitrary positive period, aligned to the Unix epoch.
    pub fn new<P>(provider: &Arc<P>, period: Duration, fill_gaps: bool) -> HubResult<Arc<Self>>
    where
        P: StreamObservable<Item = I> + 'static,
    {
        Self::with_settings(
            super::provider(provider),
            period,
            Duration::zero(),
            fill_gaps,
            DedupConfig::default(),
        )
    }

    /// Aggregate to a preset timeframe; weekly bars start on Monday.
    pub fn for_timeframe<P>(provider: &Arc<P>, timeframe: Timeframe, fill_gaps: bool) -> HubResult<Arc<Self>>
    where
        P: StreamObservable<Item = I> + 'static,
    {
        Self::with_settings(
            super::provider(provider),
            timeframe.as_duration(),
            timeframe.origin_offset(),
            fill_gaps,
            DedupConfig::default(),
        )
    }

    /// # Errors
    ///
    /// `HubError::Construction` for a non-positive or unrepresentable
    /// period or invalid dedup settings.
    pub fn with_settings(
        provider: Provider<I>,
        period: Duration,
        origin: Duration,
        fill_gaps: bool,
        dedup: DedupConfig,
    ) -> HubResult<Arc<Self>> {
        if period <= Duration::zero() {
            return Err(HubError::construction(
                "period",
                "aggregation period must be greater than zero",
            ));
        }
        if period.num_microseconds().is_none() {
            return Err(HubError::construction("period", "aggregation period is too large"));
        }
        ConfigValidator::validate_dedup(&dedup)?;

        let name = format!("{}-AGG({})", I::LABEL, format_period(period));
        let node = HubNode::new(name, provider.config());
        let hub = Arc::new_cyclic(|self_ref| Self {
            node,
            upstream: Upstream::new(&provider),
            period,
            origin,
            fill_gaps,
            bucket: Mutex::new(None),
            dedup: Mutex::new(DedupWindow::new(&dedup)),
            self_ref: self_ref.clone(),
        });

        hub.rebuild()?;
        hub.attach()?;
        Ok(hub)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn fill_gaps(&self) -> bool {
        self.fill_gaps
    }

    /// Number of correlation ids currently remembered.
    pub fn dedup_len(&self) -> usize {
        self.dedup.lock().len()
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

    fn bucket_of(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        floor_to_period(timestamp, self.period, self.origin)
    }

    pub fn rebuild(&self) -> HubResult<()> {
        self.rebuild_from(DateTime::<Utc>::MIN_UTC)
    }

    /// Rebuild every bar from the bucket containing `from`.
    pub fn rebuild_from(&self, from: DateTime<Utc>) -> HubResult<()> {
        self.node.ensure_active()?;
        let provider = self.upstream.get()?;
        let bucket = self.bucket_of(from);

        let mut pruned = None;
        provider.visit_cache(&mut |inputs| pruned = self.replay(inputs, bucket));

        if let Some(pruned) = pruned {
            self.node.notify_prune(pruned.to)?;
        }
        self.node.notify_rebuild(bucket)
    }

    fn replay(&self, inputs: &[I], bucket: DateTime<Utc>) -> Option<Pruned> {
        self.dedup.lock().rollback(bucket);
        {
            let mut state = self.bucket.lock();
            let mut cache = self.node.lock();
            cache.truncate_from(bucket);
            *state = cache.last().map(|bar| BucketState {
                bucket: bar.timestamp,
                bar: bar.clone(),
            });
        }

        let mut emits = Vec::new();
        let start = inputs.partition_point(|x| x.timestamp() < bucket);
        for item in &inputs[start..] {
            if let Some(earlier) = self.apply(item, &mut emits) {
                warn!("{}: replayed item in closed bucket {}, skipped", self.node.name(), earlier);
            }
        }

        emits.into_iter().fold(None, |acc: Option<Pruned>, emit| match emit {
            Emit::Added(_, _, Some(p)) => Some(Pruned {
                to: p.to,
                count: acc.map_or(0, |a| a.count) + p.count,
            }),
            _ => acc,
        })
    }

    /// Fold one item into the bars. Returns the item's bucket when it falls
    /// before the current bar and needs a rebuild instead.
    fn apply(&self, item: &I, emits: &mut Vec<Emit>) -> Option<DateTime<Utc>> {
        let bucket = self.bucket_of(item.timestamp());

        if let Some(id) = item.correlation_id() {
            if !self.dedup.lock().check_and_record(id, item.timestamp()) {
                trace!("{}: ignored repeated id {}", self.node.name(), id);
                return None;
            }
        }

        let mut state = self.bucket.lock();
        let mut cache = self.node.lock();

        match state.as_mut() {
            Some(current) if bucket == current.bucket => {
                item.merge_into(&mut current.bar);
                if let Some(index) = cache.len().checked_sub(1) {
                    cache.replace(index, current.bar.clone());
                }
                emits.push(Emit::Updated(bucket));
                return None;
            }
            Some(current) if bucket < current.bucket => return Some(bucket),
            Some(current) if self.fill_gaps => {
                let close = current.bar.close;
                let mut next = current.bucket + self.period;
                while next < bucket {
                    let gap = Quote::flat(next, close);
                    let pruned = cache.push(gap.clone());
                    emits.push(Emit::Added(gap, cache.len() - 1, pruned));
                    next = next + self.period;
                }
            }
            _ => {}
        }

        let bar = item.open_bar(bucket);
        let pruned = cache.push(bar.clone());
        emits.push(Emit::Added(bar.clone(), cache.len() - 1, pruned));
        *state = Some(BucketState { bucket, bar });
        None
    }
}

impl<I: BarSource> StreamObserver<I> for AggregatorHub<I> {
    fn on_add(&self, item: &I, _index_hint: Option<usize>) -> HubResult<()> {
        self.node.ensure_active()?;

        let mut emits = Vec::new();
        let correction = self.apply(item, &mut emits);
        for emit in emits {
            match emit {
                Emit::Added(bar, index, pruned) => self.node.announce(&bar, index, pruned)?,
                Emit::Updated(bucket) => self.node.notify_rebuild(bucket)?,
            }
        }

        match correction {
            Some(bucket) => {
                debug!("{}: correction in bucket {}", self.node.name(), bucket);
                self.rebuild_from(bucket)
            }
            None => Ok(()),
        }
    }

    fn on_rebuild(&self, from: DateTime<Utc>) -> HubResult<()> {
        self.rebuild_from(from)
    }

    fn on_prune(&self, to: DateTime<Utc>) -> HubResult<()> {
        // bars outlive the inputs they were built from
        trace!("{}: provider pruned through {}", self.node.name(), to);
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

impl<I: BarSource> HubBacked for AggregatorHub<I> {
    type Item = Quote;

    fn node(&self) -> &HubNode<Quote> {
        &self.node
    }
}

impl<I: BarSource> fmt::Display for AggregatorHub<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.node.name())
    }
}

impl<I: BarSource> Drop for AggregatorHub<I> {
    fn drop(&mut self) {
        if self.upstream.detach() {
            debug!("{}: dropped, unsubscribed from provider", self.node.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{QuoteHub, TickHub};
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 11, 9, 10, minute, 0).unwrap()
    }

    fn minute_quotes() -> Vec<Quote> {
        vec![
            Quote::new(at(0), dec!(100), dec!(105), dec!(99), dec!(102), dec!(1000)),
            Quote::new(at(1), dec!(102), dec!(106), dec!(101), dec!(104), dec!(1100)),
            Quote::new(at(2), dec!(104), dec!(107), dec!(103), dec!(105), dec!(1200)),
            Quote::new(at(3), dec!(105), dec!(108), dec!(104), dec!(106), dec!(1300)),
            Quote::new(at(4), dec!(106), dec!(109), dec!(105), dec!(107), dec!(1400)),
            Quote::new(at(5), dec!(107), dec!(110), dec!(106), dec!(108), dec!(1500)),
            Quote::new(at(6), dec!(108), dec!(111), dec!(107), dec!(109), dec!(1600)),
        ]
    }

    fn tick(minute: u32, second: u32, price: Decimal, id: &str) -> Tick {
        let ts = Utc.with_ymd_and_hms(2023, 11, 9, 10, minute, second).unwrap();
        Tick::new(ts, price, dec!(1)).with_execution_id(id)
    }

    #[test]
    fn test_five_minute_bars() {
        let quotes = QuoteHub::new();
        let bars = QuoteAggregatorHub::for_timeframe(&quotes, Timeframe::FiveMinutes, false).unwrap();
        for q in minute_quotes() {
            quotes.add(q).unwrap();
        }

        let results = bars.results();
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[0],
            Quote::new(at(0), dec!(100), dec!(109), dec!(99), dec!(107), dec!(6000))
        );
        assert_eq!(
            results[1],
            Quote::new(at(5), dec!(107), dec!(111), dec!(106), dec!(109), dec!(3100))
        );
        assert_eq!(bars.to_string(), "QUOTE-AGG(00:05:00)");
    }

    #[test]
    fn test_prefilled_provider() {
        let quotes = QuoteHub::new();
        quotes.add_batch(minute_quotes()).unwrap();
        let bars = QuoteAggregatorHub::new(&quotes, Duration::minutes(5), false).unwrap();
        assert_eq!(bars.results().len(), 2);
        assert_eq!(bars.results()[0].volume, dec!(6000));
    }

    #[test]
    fn test_gap_fill() {
        let quotes = QuoteHub::new();
        let bars = QuoteAggregatorHub::new(&quotes, Duration::minutes(1), true).unwrap();
        let data = minute_quotes();
        quotes.add(data[0].clone()).unwrap();
        quotes.add(data[3].clone()).unwrap();

        let results = bars.results();
        assert_eq!(results.len(), 4);
        assert_eq!(results[1], Quote::flat(at(1), dec!(102)));
        assert_eq!(results[2], Quote::flat(at(2), dec!(102)));
        assert_eq!(results[3].open, dec!(105));
    }

    #[test]
    fn test_late_quote_rebuilds_bucket() {
        let quotes = QuoteHub::new();
        let bars = QuoteAggregatorHub::new(&quotes, Duration::minutes(5), false).unwrap();
        let data = minute_quotes();
        for q in [&data[0], &data[1], &data[3], &data[5]] {
            quotes.add(q.clone()).unwrap();
        }
        assert_eq!(bars.results()[0].volume, dec!(3400));

        quotes.insert(data[2].clone()).unwrap();
        quotes.insert(data[4].clone()).unwrap();
        let results = bars.results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].volume, dec!(6000));
        assert_eq!(results[0].close, dec!(107));
        assert_eq!(results[1].volume, dec!(1500));
    }

    #[test]
    fn test_ticks_with_concurrent_and_repeated_ids() {
        let ticks = TickHub::new();
        let bars = TickAggregatorHub::new(&ticks, Duration::minutes(1), false).unwrap();

        ticks.add(tick(0, 5, dec!(10), "a")).unwrap();
        // same timestamp, different execution: both apply
        ticks.add(tick(0, 5, dec!(12), "b")).unwrap();
        // re-delivered execution with a shifted timestamp: ignored
        ticks.add(tick(0, 9, dec!(12), "b")).unwrap();
        ticks.add(tick(0, 30, dec!(9), "c")).unwrap();

        let bar = &bars.results()[0];
        assert_eq!(bar.open, dec!(10));
        assert_eq!(bar.high, dec!(12));
        assert_eq!(bar.low, dec!(9));
        assert_eq!(bar.close, dec!(9));
        assert_eq!(bar.volume, dec!(3));
        assert_eq!(bars.dedup_len(), 3);
        assert_eq!(bars.to_string(), "TICK-AGG(00:01:00)");
    }

    #[test]
    fn test_invalid_period() {
        let quotes = QuoteHub::new();
        let result = QuoteAggregatorHub::new(&quotes, Duration::zero(), false);
        assert!(matches!(result, Err(HubError::Construction { .. })));
    }

    #[test]
    fn test_dedup_window_expiry_and_capacity() {
        let mut dedup = DedupWindow::new(&DedupConfig {
            window_secs: 60,
            capacity: 2,
        });
        assert!(dedup.check_and_record("a", at(0)));
        assert!(!dedup.check_and_record("a", at(0)));
        assert!(dedup.check_and_record("b", at(0)));
        assert!(dedup.check_and_record("c", at(0)));
        // capacity 2: "a" was evicted
        assert!(dedup.check_and_record("a", at(0)));
        assert_eq!(dedup.len(), 2);

        // two minutes later everything has expired
        assert!(dedup.check_and_record("b", at(2)));
        assert_eq!(dedup.len(), 1);

        dedup.rollback(at(1));
        assert!(dedup.is_empty());
    }
}
