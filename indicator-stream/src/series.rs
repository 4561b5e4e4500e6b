// Batch computation over complete, ordered series
//
// Each function computes a whole result series in one pass. Streaming hubs
// must produce exactly the same values for the same input, so these double
// as the reference when testing the incremental path.

use std::collections::HashSet;

use chrono::Duration;
use rust_decimal::Decimal;

use crate::data::{floor_to_period, Quote, TimeValue};
use crate::error::{HubError, HubResult};
use crate::hub::{BarSource, TimedItem};
use crate::transforms::{PriceSource, PriceValue};

/// Check that timestamps are strictly ascending.
pub fn validate_sequence<I: TimedItem>(items: &[I]) -> HubResult<()> {
    for pair in items.windows(2) {
        if pair[1].timestamp() <= pair[0].timestamp() {
            return Err(HubError::sequence(
                pair[1].timestamp(),
                "timestamps must be strictly ascending",
            ));
        }
    }
    Ok(())
}

fn check_period(period: usize) -> HubResult<()> {
    if period == 0 {
        return Err(HubError::construction("period", "period must be > 0"));
    }
    Ok(())
}

fn prices<I: PriceValue>(items: &[I], source: PriceSource) -> Vec<Option<Decimal>> {
    items.iter().map(|x| x.price(source)).collect()
}

/// Simple moving average.
pub fn sma<I: TimedItem + PriceValue>(items: &[I], period: usize, source: PriceSource) -> HubResult<Vec<TimeValue>> {
    check_period(period)?;
    validate_sequence(items)?;

    let values = prices(items, source);
    let divisor = Decimal::from(period);
    Ok(items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let value = if i + 1 < period {
                None
            } else {
                values[i + 1 - period..=i]
                    .iter()
                    .copied()
                    .sum::<Option<Decimal>>()
                    .map(|sum| sum / divisor)
            };
            TimeValue::new(item.timestamp(), value)
        })
        .collect())
}

/// Exponential moving average, seeded with the SMA of the first window.
pub fn ema<I: TimedItem + PriceValue>(items: &[I], period: usize, source: PriceSource) -> HubResult<Vec<TimeValue>> {
    check_period(period)?;
    let seeds = sma(items, period, source)?;

    let k = Decimal::TWO / Decimal::from(period + 1);
    let mut results: Vec<TimeValue> = Vec::with_capacity(items.len());
    let mut prev: Option<Decimal> = None;
    for (i, item) in items.iter().enumerate() {
        let value = if i + 1 < period {
            None
        } else {
            match (prev, item.price(source)) {
                (Some(p), Some(price)) => Some((price * k) + (p * (Decimal::ONE - k))),
                (Some(_), None) => None,
                (None, _) => seeds[i].value,
            }
        };
        prev = value;
        results.push(TimeValue::new(item.timestamp(), value));
    }
    Ok(results)
}

fn extreme<I: TimedItem + PriceValue>(
    items: &[I],
    period: usize,
    source: PriceSource,
    pick: fn(Decimal, Decimal) -> Decimal,
) -> HubResult<Vec<TimeValue>> {
    check_period(period)?;
    validate_sequence(items)?;

    let values = prices(items, source);
    Ok(items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let value = if i + 1 < period {
                None
            } else {
                values[i + 1 - period..=i]
                    .iter()
                    .copied()
                    .collect::<Option<Vec<Decimal>>>()
                    .and_then(|w| w.into_iter().reduce(pick))
            };
            TimeValue::new(item.timestamp(), value)
        })
        .collect())
}

/// Highest value over the trailing window.
pub fn highest<I: TimedItem + PriceValue>(items: &[I], period: usize, source: PriceSource) -> HubResult<Vec<TimeValue>> {
    extreme(items, period, source, Decimal::max)
}

/// Lowest value over the trailing window.
pub fn lowest<I: TimedItem + PriceValue>(items: &[I], period: usize, source: PriceSource) -> HubResult<Vec<TimeValue>> {
    extreme(items, period, source, Decimal::min)
}

/// Difference between two series sharing the same timestamps.
pub fn spread<I: TimedItem + PriceValue>(left: &[I], right: &[I], source: PriceSource) -> HubResult<Vec<TimeValue>> {
    validate_sequence(left)?;
    validate_sequence(right)?;

    left.iter()
        .zip(right.iter())
        .map(|(a, b)| {
            if a.timestamp() != b.timestamp() {
                return Err(HubError::sequence(
                    a.timestamp().min(b.timestamp()),
                    "series are not aligned",
                ));
            }
            let value = match (a.price(source), b.price(source)) {
                (Some(x), Some(y)) => Some(x - y),
                _ => None,
            };
            Ok(TimeValue::new(a.timestamp(), value))
        })
        .collect()
}

/// Roll items up into bars of `period`, aligned to the epoch shifted by
/// `origin`. Timestamps may repeat (concurrent executions) but must not
/// decrease; each correlation id is applied once.
pub fn aggregate<I: BarSource>(items: &[I], period: Duration, origin: Duration, fill_gaps: bool) -> HubResult<Vec<Quote>> {
    if period <= Duration::zero() || period.num_microseconds().is_none() {
        return Err(HubError::construction("period", "aggregation period must be greater than zero"));
    }
    for pair in items.windows(2) {
        if pair[1].timestamp() < pair[0].timestamp() {
            return Err(HubError::sequence(pair[1].timestamp(), "timestamps must not decrease"));
        }
    }

    let mut seen = HashSet::new();
    let mut bars: Vec<Quote> = Vec::new();
    for item in items {
        if let Some(id) = item.correlation_id() {
            if !seen.insert(id.to_string()) {
                continue;
            }
        }

        let bucket = floor_to_period(item.timestamp(), period, origin);
        match bars.last_mut() {
            Some(bar) if bar.timestamp == bucket => {
                item.merge_into(bar);
                continue;
            }
            Some(bar) if fill_gaps => {
                let close = bar.close;
                let mut next = bar.timestamp + period;
                while next < bucket {
                    bars.push(Quote::flat(next, close));
                    next = next + period;
                }
            }
            _ => {}
        }
        bars.push(item.open_bar(bucket));
    }
    Ok(bars)
}
