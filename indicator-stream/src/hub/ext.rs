//! Chaining helpers: build hubs directly from a provider handle.

use std::sync::Arc;

use chrono::Duration;

use crate::data::{Quote, Tick, TimeValue, Timeframe};
use crate::error::HubResult;
use crate::transforms::{
    Ema, Highest, Indicator, Lowest, PairIndicator, PriceValue, Sma, StatefulIndicator,
};

use super::aggregator::{QuoteAggregatorHub, TickAggregatorHub};
use super::pairs_hub::PairsHub;
use super::state_hub::StateHub;
use super::stream_hub::StreamHub;
use super::{StreamObservable, TimedItem};

/// Fluent construction of hubs on top of any provider.
///
/// ```rust,ignore
/// let quotes = QuoteHub::new();
/// let ema = quotes.to_sma_hub(20)?.to_ema_hub(9)?;
/// ```
pub trait HubExt<T: TimedItem> {
    fn to_hub<O, C>(&self, indicator: C) -> HubResult<Arc<StreamHub<T, O, C>>>
    where
        O: TimedItem,
        C: Indicator<T, O>;

    fn to_state_hub<O, C>(&self, indicator: C) -> HubResult<Arc<StateHub<T, O, C>>>
    where
        O: TimedItem,
        C: StatefulIndicator<T, O>;

    fn to_pairs_hub<B, O, C>(&self, other: &Arc<B>, indicator: C) -> HubResult<Arc<PairsHub<T, O, C>>>
    where
        B: StreamObservable<Item = T> + 'static,
        O: TimedItem,
        C: PairIndicator<T, O>;

    fn to_sma_hub(&self, period: usize) -> HubResult<Arc<StreamHub<T, TimeValue, Sma>>>
    where
        T: PriceValue;

    fn to_ema_hub(&self, period: usize) -> HubResult<Arc<StreamHub<T, TimeValue, Ema>>>
    where
        T: PriceValue;

    fn to_highest_hub(&self, period: usize) -> HubResult<Arc<StateHub<T, TimeValue, Highest>>>
    where
        T: PriceValue;

    fn to_lowest_hub(&self, period: usize) -> HubResult<Arc<StateHub<T, TimeValue, Lowest>>>
    where
        T: PriceValue;
}

impl<P> HubExt<P::Item> for Arc<P>
where
    P: StreamObservable + 'static,
{
    fn to_hub<O, C>(&self, indicator: C) -> HubResult<Arc<StreamHub<P::Item, O, C>>>
    where
        O: TimedItem,
        C: Indicator<P::Item, O>,
    {
        StreamHub::new(self, indicator)
    }

    fn to_state_hub<O, C>(&self, indicator: C) -> HubResult<Arc<StateHub<P::Item, O, C>>>
    where
        O: TimedItem,
        C: StatefulIndicator<P::Item, O>,
    {
        StateHub::new(self, indicator)
    }

    fn to_pairs_hub<B, O, C>(&self, other: &Arc<B>, indicator: C) -> HubResult<Arc<PairsHub<P::Item, O, C>>>
    where
        B: StreamObservable<Item = P::Item> + 'static,
        O: TimedItem,
        C: PairIndicator<P::Item, O>,
    {
        PairsHub::new(self, other, indicator)
    }

    fn to_sma_hub(&self, period: usize) -> HubResult<Arc<StreamHub<P::Item, TimeValue, Sma>>>
    where
        P::Item: PriceValue,
    {
        StreamHub::new(self, Sma::new(period)?)
    }

    fn to_ema_hub(&self, period: usize) -> HubResult<Arc<StreamHub<P::Item, TimeValue, Ema>>>
    where
        P::Item: PriceValue,
    {
        StreamHub::new(self, Ema::new(period)?)
    }

    fn to_highest_hub(&self, period: usize) -> HubResult<Arc<StateHub<P::Item, TimeValue, Highest>>>
    where
        P::Item: PriceValue,
    {
        StateHub::new(self, Highest::new(period)?)
    }

    fn to_lowest_hub(&self, period: usize) -> HubResult<Arc<StateHub<P::Item, TimeValue, Lowest>>>
    where
        P::Item: PriceValue,
    {
        StateHub::new(self, Lowest::new(period)?)
    }
}

/// Aggregation helpers for quote providers.
pub trait QuoteHubExt {
    fn to_quote_aggregator_hub(&self, timeframe: Timeframe, fill_gaps: bool) -> HubResult<Arc<QuoteAggregatorHub>>;

    fn to_quote_aggregator_hub_with_period(
        &self,
        period: Duration,
        fill_gaps: bool,
    ) -> HubResult<Arc<QuoteAggregatorHub>>;
}

impl<P> QuoteHubExt for Arc<P>
where
    P: StreamObservable<Item = Quote> + 'static,
{
    fn to_quote_aggregator_hub(&self, timeframe: Timeframe, fill_gaps: bool) -> HubResult<Arc<QuoteAggregatorHub>> {
        QuoteAggregatorHub::for_timeframe(self, timeframe, fill_gaps)
    }

    fn to_quote_aggregator_hub_with_period(
        &self,
        period: Duration,
        fill_gaps: bool,
    ) -> HubResult<Arc<QuoteAggregatorHub>> {
        QuoteAggregatorHub::new(self, period, fill_gaps)
    }
}

/// Aggregation helpers for tick providers.
pub trait TickHubExt {
    fn to_tick_aggregator_hub(&self, timeframe: Timeframe, fill_gaps: bool) -> HubResult<Arc<TickAggregatorHub>>;

    fn to_tick_aggregator_hub_with_period(
        &self,
        period: Duration,
        fill_gaps: bool,
    ) -> HubResult<Arc<TickAggregatorHub>>;
}

impl<P> TickHubExt for Arc<P>
where
    P: StreamObservable<Item = Tick> + 'static,
{
    fn to_tick_aggregator_hub(&self, timeframe: Timeframe, fill_gaps: bool) -> HubResult<Arc<TickAggregatorHub>> {
        TickAggregatorHub::for_timeframe(self, timeframe, fill_gaps)
    }

    fn to_tick_aggregator_hub_with_period(
        &self,
        period: Duration,
        fill_gaps: bool,
    ) -> HubResult<Arc<TickAggregatorHub>> {
        TickAggregatorHub::new(self, period, fill_gaps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{QuoteHub, TickHub};
    use crate::transforms::Spread;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    #[test]
    fn test_fluent_chain() {
        let quotes = QuoteHub::new();
        let bars = quotes.to_quote_aggregator_hub(Timeframe::FiveMinutes, false).unwrap();
        let sma = bars.to_sma_hub(2).unwrap();
        let ema = sma.to_ema_hub(2).unwrap();
        let highest = quotes.to_highest_hub(3).unwrap();

        let start = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        for i in 0..20 {
            let ts = start + Duration::minutes(i);
            quotes.add(Quote::flat(ts, dec!(100) + rust_decimal::Decimal::from(i))).unwrap();
        }

        assert_eq!(bars.results().len(), 4);
        assert_eq!(sma.results().len(), 4);
        assert_eq!(ema.results().len(), 4);
        assert_eq!(highest.results().len(), 20);
        assert_eq!(highest.results()[19].value, Some(dec!(119)));
        assert_eq!(ema.to_string(), "EMA(2)");
    }

    #[test]
    fn test_tick_and_pairs_helpers() {
        let ticks = TickHub::new();
        let bars = ticks
            .to_tick_aggregator_hub_with_period(Duration::seconds(30), false)
            .unwrap();
        assert_eq!(bars.to_string(), "TICK-AGG(00:00:30)");

        let left = QuoteHub::new();
        let right = QuoteHub::new();
        let spread = left.to_pairs_hub(&right, Spread::new()).unwrap();
        assert!(spread.is_subscribed());
    }
}
