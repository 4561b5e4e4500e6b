// Exponential Moving Average

use rust_decimal::Decimal;

use crate::data::TimeValue;
use crate::error::{HubError, HubResult};
use crate::hub::TimedItem;

use super::source::{PriceSource, PriceValue};
use super::sma::Sma;
use super::Indicator;

/// Exponential Moving Average.
///
/// Seeded with the SMA of the first N prices, then smoothed with
/// multiplier k = 2 / (N + 1). Reads its own previous result from the
/// hub's cache, so a rebuild recomputes the chain from the rebuild point.
///
/// # Formula
///
/// EMA = (Price * k) + (PrevEMA * (1 - k))
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    source: PriceSource,
    multiplier: Decimal,
    name: String,
}

impl Ema {
    pub fn new(period: usize) -> HubResult<Self> {
        Self::with_source(period, PriceSource::Close)
    }

    pub fn with_source(period: usize, source: PriceSource) -> HubResult<Self> {
        if period == 0 {
            return Err(HubError::construction("period", "EMA period must be > 0"));
        }
        let multiplier = Decimal::TWO / Decimal::from(period + 1);
        let name = if source == PriceSource::Close {
            format!("EMA({})", period)
        } else {
            format!("EMA({},{})", period, source)
        };
        Ok(Self {
            period,
            source,
            multiplier,
            name,
        })
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Smoothing multiplier k
    pub fn multiplier(&self) -> Decimal {
        self.multiplier
    }

    /// One EMA step from the previous value.
    pub(crate) fn smooth(price: Decimal, prev: Decimal, multiplier: Decimal) -> Decimal {
        (price * multiplier) + (prev * (Decimal::ONE - multiplier))
    }
}

impl<I: TimedItem + PriceValue> Indicator<I, TimeValue> for Ema {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn compute(&self, _index: usize, inputs: &[I], outputs: &[TimeValue]) -> TimeValue {
        let current = &inputs[inputs.len() - 1];
        let timestamp = current.timestamp();
        if inputs.len() < self.period {
            return TimeValue::empty(timestamp);
        }

        let value = match (outputs.last().and_then(|prev| prev.value), current.price(self.source)) {
            (Some(prev), Some(price)) => Some(Self::smooth(price, prev, self.multiplier)),
            (Some(_), None) => None,
            // Initialize with SMA
            (None, _) => Sma::mean(inputs, self.period, self.source),
        };
        TimeValue::new(timestamp, value)
    }
}
