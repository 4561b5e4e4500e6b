// Price Source Selection for Indicators
//
// Lets an indicator read any OHLCV component of a quote, or the single
// value of a tick or of another indicator's output.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::data::{Quote, Tick, TimeValue};

/// Selects which price an indicator reads from each input item.
///
/// # Example
///
/// ```ignore
/// use indicator_stream::transforms::{Sma, PriceSource};
///
/// let sma_close = Sma::new(20)?;
/// let sma_typical = Sma::with_source(20, PriceSource::Typical)?;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PriceSource {
    Open,
    High,
    Low,
    /// Close price (default for most indicators)
    #[default]
    Close,
    Volume,
    /// Typical Price: (High + Low + Close) / 3
    Typical,
    /// Weighted Close: (High + Low + Close + Close) / 4
    WeightedClose,
    /// Median Price: (High + Low) / 2
    Median,
}

impl PriceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceSource::Open => "open",
            PriceSource::High => "high",
            PriceSource::Low => "low",
            PriceSource::Close => "close",
            PriceSource::Volume => "volume",
            PriceSource::Typical => "typical",
            PriceSource::WeightedClose => "weighted_close",
            PriceSource::Median => "median",
        }
    }
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Items an indicator can read a price from.
pub trait PriceValue {
    /// Value for `source`; `None` when the item has no value yet.
    fn price(&self, source: PriceSource) -> Option<Decimal>;
}

impl PriceValue for Quote {
    fn price(&self, source: PriceSource) -> Option<Decimal> {
        let value = match source {
            PriceSource::Open => self.open,
            PriceSource::High => self.high,
            PriceSource::Low => self.low,
            PriceSource::Close => self.close,
            PriceSource::Volume => self.volume,
            PriceSource::Typical => (self.high + self.low + self.close) / Decimal::from(3),
            PriceSource::WeightedClose => {
                (self.high + self.low + self.close + self.close) / Decimal::from(4)
            }
            PriceSource::Median => (self.high + self.low) / Decimal::TWO,
        };
        Some(value)
    }
}

impl PriceValue for Tick {
    fn price(&self, source: PriceSource) -> Option<Decimal> {
        match source {
            PriceSource::Volume => Some(self.volume),
            _ => Some(self.price),
        }
    }
}

/// Indicator outputs carry a single value regardless of source.
impl PriceValue for TimeValue {
    fn price(&self, _source: PriceSource) -> Option<Decimal> {
        self.value
    }
}
