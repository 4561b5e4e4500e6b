// Simple Moving Average

use rust_decimal::Decimal;

use crate::data::TimeValue;
use crate::error::{HubError, HubResult};
use crate::hub::TimedItem;

use super::source::{PriceSource, PriceValue};
use super::{window, Indicator};

/// Simple Moving Average.
///
/// Arithmetic mean of the selected price over the last N items. Empty
/// (`None`) until N items are available, and while any price in the
/// window is missing.
///
/// # Formula
///
/// SMA = (P1 + P2 + ... + Pn) / n
///
/// # Example
///
/// ```no_run
/// use indicator_stream::transforms::{Sma, PriceSource};
///
/// let sma = Sma::new(20).unwrap();
/// let sma_high = Sma::with_source(20, PriceSource::High).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    source: PriceSource,
    name: String,
}

impl Sma {
    /// SMA of close prices.
    ///
    /// # Errors
    ///
    /// `HubError::Construction` if period is 0.
    pub fn new(period: usize) -> HubResult<Self> {
        Self::with_source(period, PriceSource::Close)
    }

    /// SMA of a custom price source.
    pub fn with_source(period: usize, source: PriceSource) -> HubResult<Self> {
        if period == 0 {
            return Err(HubError::construction("period", "SMA period must be > 0"));
        }
        let name = if source == PriceSource::Close {
            format!("SMA({})", period)
        } else {
            format!("SMA({},{})", period, source)
        };
        Ok(Self {
            period,
            source,
            name,
        })
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn source(&self) -> PriceSource {
        self.source
    }

    /// Mean of the selected price over the last `period` inputs.
    pub(crate) fn mean<I: PriceValue>(inputs: &[I], period: usize, source: PriceSource) -> Option<Decimal> {
        let sum: Decimal = window(inputs, period)?
            .iter()
            .map(|x| x.price(source))
            .sum::<Option<Decimal>>()?;
        Some(sum / Decimal::from(period))
    }
}

impl<I: TimedItem + PriceValue> Indicator<I, TimeValue> for Sma {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn compute(&self, _index: usize, inputs: &[I], _outputs: &[TimeValue]) -> TimeValue {
        let current = &inputs[inputs.len() - 1];
        TimeValue::new(
            current.timestamp(),
            Self::mean(inputs, self.period, self.source),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Quote;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn quotes(closes: &[Decimal]) -> Vec<Quote> {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| Quote::new(start + Duration::minutes(i as i64), *c, *c, *c, *c, dec!(100)))
            .collect()
    }

    #[test]
    fn test_sma_warmup() {
        let sma = Sma::new(3).unwrap();
        let data = quotes(&[dec!(10), dec!(20)]);
        assert_eq!(sma.compute(1, &data, &[]).value, None);
    }

    #[test]
    fn test_sma_basic() {
        let sma = Sma::new(3).unwrap();
        let data = quotes(&[dec!(10), dec!(20), dec!(30), dec!(40)]);
        assert_eq!(sma.compute(2, &data[..3], &[]).value, Some(dec!(20)));
        assert_eq!(sma.compute(3, &data, &[]).value, Some(dec!(30)));
        assert_eq!(sma.compute(3, &data, &[]).timestamp, data[3].timestamp);
    }

    #[test]
    fn test_sma_missing_value_in_window() {
        let sma = Sma::new(2).unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let values = vec![
            TimeValue::empty(ts),
            TimeValue::new(ts + Duration::minutes(1), Some(dec!(4))),
            TimeValue::new(ts + Duration::minutes(2), Some(dec!(6))),
        ];
        assert_eq!(sma.compute(1, &values[..2], &[]).value, None);
        assert_eq!(sma.compute(2, &values, &[]).value, Some(dec!(5)));
    }

    #[test]
    fn test_sma_invalid_period() {
        assert!(matches!(Sma::new(0), Err(HubError::Construction { .. })));
    }

    #[test]
    fn test_sma_name() {
        assert_eq!(Indicator::<Quote, TimeValue>::name(&Sma::new(20).unwrap()), "SMA(20)");
        let sma = Sma::with_source(5, PriceSource::High).unwrap();
        assert_eq!(Indicator::<Quote, TimeValue>::name(&sma), "SMA(5,high)");
    }
}
