// Rolling highest and lowest values

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::data::TimeValue;
use crate::error::{HubError, HubResult};
use crate::hub::TimedItem;

use super::source::{PriceSource, PriceValue};
use super::{window, Indicator, StatefulIndicator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Highest,
    Lowest,
}

impl Direction {
    /// `candidate` makes `held` irrelevant for the rest of the window.
    fn dominates(self, candidate: Decimal, held: Decimal) -> bool {
        match self {
            Direction::Highest => candidate >= held,
            Direction::Lowest => candidate <= held,
        }
    }

    fn pick(self, a: Decimal, b: Decimal) -> Decimal {
        match self {
            Direction::Highest => a.max(b),
            Direction::Lowest => a.min(b),
        }
    }
}

/// Rolling state for [`Highest`] and [`Lowest`].
///
/// `window` is a monotonic deque of (timestamp, value): the front is the
/// current extreme, later entries are candidates for when it expires.
/// `last_missing` remembers the newest item without a value, which blanks
/// every result whose window still covers it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtremeState {
    window: VecDeque<(DateTime<Utc>, Decimal)>,
    last_missing: Option<DateTime<Utc>>,
}

impl ExtremeState {
    /// Number of candidates held.
    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Extreme {
    period: usize,
    source: PriceSource,
    direction: Direction,
}

impl Extreme {
    fn new(period: usize, source: PriceSource, direction: Direction) -> HubResult<Self> {
        if period == 0 {
            return Err(HubError::construction("period", "lookback period must be > 0"));
        }
        Ok(Self {
            period,
            source,
            direction,
        })
    }

    fn label(&self) -> String {
        let prefix = match self.direction {
            Direction::Highest => "HIGHEST",
            Direction::Lowest => "LOWEST",
        };
        format!("{}({})", prefix, self.period)
    }

    fn scan<I: TimedItem + PriceValue>(&self, inputs: &[I]) -> TimeValue {
        let timestamp = inputs[inputs.len() - 1].timestamp();
        let value = window(inputs, self.period).and_then(|items| {
            items
                .iter()
                .map(|x| x.price(self.source))
                .try_fold(None, |acc: Option<Decimal>, v| {
                    let v = v?;
                    Some(Some(acc.map_or(v, |a| self.direction.pick(a, v))))
                })
                .flatten()
        });
        TimeValue::new(timestamp, value)
    }

    fn step<I: TimedItem + PriceValue>(&self, inputs: &[I], state: &mut ExtremeState) -> TimeValue {
        let n = inputs.len();
        let current = &inputs[n - 1];
        let timestamp = current.timestamp();

        match current.price(self.source) {
            Some(value) => {
                while let Some(&(_, held)) = state.window.back() {
                    if !self.direction.dominates(value, held) {
                        break;
                    }
                    state.window.pop_back();
                }
                state.window.push_back((timestamp, value));
            }
            None => state.last_missing = Some(timestamp),
        }

        if n < self.period {
            return TimeValue::empty(timestamp);
        }

        let start = inputs[n - self.period].timestamp();
        while state.window.front().is_some_and(|(ts, _)| *ts < start) {
            state.window.pop_front();
        }
        if state.last_missing.is_some_and(|ts| ts >= start) {
            return TimeValue::empty(timestamp);
        }
        TimeValue::new(timestamp, state.window.front().map(|(_, v)| *v))
    }
}

macro_rules! extreme_indicator {
    ($name:ident, $direction:expr, $default_source:expr, $doc:literal) => {
        #[doc = $doc]
        ///
        /// Empty until `period` items are available, and while any item in
        /// the window has no value. Usable both as a stateless
        /// [`Indicator`] and as a [`StatefulIndicator`] whose state is a
        /// monotonic deque, which avoids rescanning the window.
        #[derive(Debug, Clone)]
        pub struct $name {
            inner: Extreme,
        }

        impl $name {
            pub fn new(period: usize) -> HubResult<Self> {
                Self::with_source(period, $default_source)
            }

            pub fn with_source(period: usize, source: PriceSource) -> HubResult<Self> {
                Ok(Self {
                    inner: Extreme::new(period, source, $direction)?,
                })
            }

            pub fn period(&self) -> usize {
                self.inner.period
            }

            pub fn source(&self) -> PriceSource {
                self.inner.source
            }
        }

        impl<I: TimedItem + PriceValue> Indicator<I, TimeValue> for $name {
            fn name(&self) -> String {
                self.inner.label()
            }

            fn compute(&self, _index: usize, inputs: &[I], _outputs: &[TimeValue]) -> TimeValue {
                self.inner.scan(inputs)
            }
        }

        impl<I: TimedItem + PriceValue> StatefulIndicator<I, TimeValue> for $name {
            type State = ExtremeState;

            fn name(&self) -> String {
                self.inner.label()
            }

            fn initial_state(&self) -> ExtremeState {
                ExtremeState::default()
            }

            fn compute(&self, _index: usize, inputs: &[I], state: &mut ExtremeState) -> TimeValue {
                self.inner.step(inputs, state)
            }
        }
    };
}

extreme_indicator!(
    Highest,
    Direction::Highest,
    PriceSource::High,
    "Highest value of the selected price over the last N items (high by default)."
);

extreme_indicator!(
    Lowest,
    Direction::Lowest,
    PriceSource::Low,
    "Lowest value of the selected price over the last N items (low by default)."
);
