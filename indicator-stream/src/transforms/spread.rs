// Price spread between two synchronized series

use crate::data::TimeValue;
use crate::hub::TimedItem;

use super::source::{PriceSource, PriceValue};
use super::PairIndicator;

/// Difference between the left and right series' prices at each shared
/// timestamp. Empty when either side has no value.
#[derive(Debug, Clone)]
pub struct Spread {
    source: PriceSource,
}

impl Spread {
    pub fn new() -> Self {
        Self::with_source(PriceSource::Close)
    }

    pub fn with_source(source: PriceSource) -> Self {
        Self { source }
    }

    pub fn source(&self) -> PriceSource {
        self.source
    }
}

impl Default for Spread {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: TimedItem + PriceValue> PairIndicator<I, TimeValue> for Spread {
    fn name(&self) -> String {
        format!("SPREAD({})", self.source)
    }

    fn compute(&self, left: &[I], right: &[I], _outputs: &[TimeValue]) -> TimeValue {
        let a = &left[left.len() - 1];
        let b = &right[right.len() - 1];
        let value = match (a.price(self.source), b.price(self.source)) {
            (Some(x), Some(y)) => Some(x - y),
            _ => None,
        };
        TimeValue::new(a.timestamp(), value)
    }
}
