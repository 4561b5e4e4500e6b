//! Graph lifecycle tests: pruning, overflow, completion and teardown.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use indicator_stream::config::HubConfig;
use indicator_stream::error::{ErrorClassification, HubError, OVERFLOW_THRESHOLD};
use indicator_stream::hub::{Act, HubExt, PairsHub, QuoteHub, StateHub, StreamHub, TickHub};
use indicator_stream::series;
use indicator_stream::transforms::{Highest, PriceSource, Sma, Spread};
use indicator_stream::{HubResult, Quote, StreamObservable, StreamObserver, Tick};

fn at(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap() + Duration::minutes(minute)
}

fn quote(minute: i64, close: Decimal) -> Quote {
    Quote::new(at(minute), close, close + dec!(1), close - dec!(1), close, dec!(10))
}

/// Records every notification it receives.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl StreamObserver<Quote> for Recorder {
    fn on_add(&self, item: &Quote, _index_hint: Option<usize>) -> HubResult<()> {
        self.events.lock().push(format!("add {}", item.timestamp.format("%H:%M")));
        Ok(())
    }

    fn on_rebuild(&self, from: DateTime<Utc>) -> HubResult<()> {
        self.events.lock().push(format!("rebuild {}", from.format("%H:%M")));
        Ok(())
    }

    fn on_prune(&self, to: DateTime<Utc>) -> HubResult<()> {
        self.events.lock().push(format!("prune {}", to.format("%H:%M")));
        Ok(())
    }

    fn on_complete(&self) {
        self.events.lock().push("complete".to_string());
    }

    fn on_error(&self, error: &HubError) {
        self.events.lock().push(format!("error {}", error));
    }
}

fn subscribe(quotes: &Arc<QuoteHub>) -> Arc<Recorder> {
    let recorder = Arc::new(Recorder::default());
    let weak = Arc::downgrade(&recorder);
    let weak: Weak<dyn StreamObserver<Quote>> = weak;
    quotes.subscribe(weak);
    recorder
}

#[test]
fn test_pruning_bounds_every_cache() {
    let quotes = QuoteHub::with_config("QUOTES", HubConfig::with_max_cache_size(5)).unwrap();
    let sma = quotes.to_sma_hub(2).unwrap();
    let highest = StateHub::new(&quotes, Highest::new(3).unwrap()).unwrap();

    let data: Vec<Quote> = (0..20).map(|m| quote(m, Decimal::from(100 + m % 7))).collect();
    for q in &data {
        quotes.add(q.clone()).unwrap();
        assert!(quotes.len() <= 5);
        assert!(sma.len() <= 5);
        assert_eq!(highest.state_count(), highest.len());
    }

    // every surviving result was computed with a full window
    let batch = series::sma(&data, 2, PriceSource::Close).unwrap();
    assert_eq!(sma.results(), batch[15..].to_vec());
    assert_eq!(sma.results()[0].timestamp, at(15));
}

#[test]
fn test_prune_is_announced_before_add() {
    let quotes = QuoteHub::with_config("QUOTES", HubConfig::with_max_cache_size(2)).unwrap();
    let recorder = subscribe(&quotes);

    for m in 0..3 {
        quotes.add(quote(m, dec!(100))).unwrap();
    }
    assert_eq!(
        recorder.events(),
        vec!["add 09:30", "add 09:31", "prune 09:30", "add 09:32"]
    );
}

#[test]
fn test_notification_kinds() {
    let quotes = QuoteHub::new();
    let recorder = subscribe(&quotes);

    assert_eq!(quotes.add(quote(0, dec!(100))).unwrap(), Act::Add);
    assert_eq!(quotes.add(quote(2, dec!(101))).unwrap(), Act::Add);
    assert_eq!(quotes.add(quote(2, dec!(101))).unwrap(), Act::Ignore);
    assert_eq!(quotes.add(quote(2, dec!(102))).unwrap(), Act::Rebuild);
    assert_eq!(quotes.add(quote(1, dec!(99))).unwrap(), Act::Insert);
    assert!(quotes.remove(&quote(0, dec!(100))).unwrap());

    assert_eq!(
        recorder.events(),
        vec!["add 09:30", "add 09:32", "rebuild 09:32", "rebuild 09:31", "rebuild 09:30"]
    );
}

#[test]
fn test_overflow_faults_and_ends_transmission() {
    let quotes = QuoteHub::new();
    let sma = StreamHub::new(&quotes, Sma::new(1).unwrap()).unwrap();
    let recorder = subscribe(&quotes);
    let q = quote(0, dec!(100));

    for _ in 0..OVERFLOW_THRESHOLD {
        quotes.add(q.clone()).unwrap();
    }
    let err = quotes.add(q.clone()).unwrap_err();
    assert!(err.is_overflow());
    assert!(err.requires_reset());
    assert!(quotes.is_faulted());

    let events = recorder.events();
    assert!(events.iter().any(|e| e.starts_with("error")));
    assert_eq!(events.last().map(String::as_str), Some("complete"));
    assert!(!sma.is_subscribed());
    assert_eq!(quotes.observer_count(), 0);

    assert!(matches!(quotes.add(quote(1, dec!(1))), Err(HubError::Faulted { .. })));
    quotes.reset_fault();
    assert_eq!(quotes.add(quote(1, dec!(1))).unwrap(), Act::Add);
}

#[test]
fn test_failing_subscriber_does_not_starve_siblings() {
    let left = QuoteHub::new();
    let right = QuoteHub::new();
    let spread = PairsHub::new(&left, &right, Spread::new()).unwrap();
    let sma = right.to_sma_hub(1).unwrap();

    left.add(quote(0, dec!(10))).unwrap();
    right.add(quote(0, dec!(8))).unwrap();
    left.add(quote(1, dec!(11))).unwrap();

    // right skips 09:31, so the pair can no longer be matched
    let err = right.add(quote(2, dec!(9))).unwrap_err();
    assert!(matches!(err, HubError::Sequence { timestamp, .. } if timestamp == at(1)));
    assert_eq!(spread.len(), 1);

    // the SMA subscribed after the pairs hub still saw the new quote
    assert_eq!(right.len(), 2);
    assert_eq!(sma.len(), 2);
    assert_eq!(sma.results()[1].value, Some(dec!(9)));
}

#[test]
fn test_overflowing_hub_leaves_its_provider() {
    let ticks = TickHub::new();
    let sma = ticks.to_sma_hub(1).unwrap();
    let ema = sma.to_ema_hub(1).unwrap();

    // distinct executions at one timestamp all compute the same SMA value
    for n in 0..OVERFLOW_THRESHOLD {
        let tick = Tick::new(at(0), dec!(100), dec!(1)).with_execution_id(format!("x{}", n));
        ticks.add(tick).unwrap();
    }
    let tick = Tick::new(at(0), dec!(100), dec!(1)).with_execution_id("last");
    let err = ticks.add(tick).unwrap_err();
    assert!(err.is_overflow());
    assert!(sma.is_faulted());
    assert!(!sma.is_subscribed());
    assert!(!ema.is_subscribed());
    assert_eq!(ticks.observer_count(), 0);

    // the root keeps accepting data
    assert!(!ticks.is_faulted());
    assert_eq!(ticks.add(Tick::new(at(1), dec!(101), dec!(1))).unwrap(), Act::Add);
    assert_eq!(ticks.len(), 2);
    assert_eq!(sma.len(), 1);

    sma.reinitialize().unwrap();
    assert!(sma.is_subscribed());
    assert_eq!(sma.len(), 2);
    assert_eq!(sma.results()[1].value, Some(dec!(101)));
}

#[test]
fn test_removed_item_can_be_readded() {
    let quotes = QuoteHub::new();
    let q = quote(0, dec!(100));
    quotes.add(q.clone()).unwrap();
    assert!(quotes.remove(&q).unwrap());
    assert_eq!(quotes.add(q).unwrap(), Act::Add);
    assert_eq!(quotes.len(), 1);
}

#[test]
fn test_batch_validation_happens_first() {
    let quotes = QuoteHub::new();
    let recorder = subscribe(&quotes);

    let err = quotes
        .add_batch(vec![quote(0, dec!(1)), quote(2, dec!(2)), quote(1, dec!(3))])
        .unwrap_err();
    assert!(matches!(err, HubError::Sequence { .. }));
    assert!(quotes.is_empty());
    assert!(recorder.events().is_empty());
}

#[test]
fn test_dropped_hub_is_released() {
    let quotes = QuoteHub::new();
    let sma = quotes.to_sma_hub(3).unwrap();
    assert_eq!(quotes.observer_count(), 1);

    drop(sma);
    assert_eq!(quotes.observer_count(), 0);
    quotes.add(quote(0, dec!(1))).unwrap();
}

#[test]
fn test_end_transmission_is_idempotent() {
    let quotes = QuoteHub::new();
    let recorder = subscribe(&quotes);

    quotes.end_transmission();
    quotes.end_transmission();
    assert_eq!(recorder.events(), vec!["complete"]);
}
