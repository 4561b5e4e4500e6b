// Indicator strategies injected into hubs
//
// An indicator is a pure computation over a provider's cache. Hubs call it
// for every new item and again for every replayed item during a rebuild,
// so it must be deterministic and keep no hidden state between calls.

pub mod ema;
pub mod extremes;
pub mod sma;
pub mod source;
pub mod spread;

pub use ema::Ema;
pub use extremes::{ExtremeState, Highest, Lowest};
pub use sma::Sma;
pub use source::{PriceSource, PriceValue};
pub use spread::Spread;

use crate::hub::TimedItem;

/// Stateless indicator used by [`StreamHub`](crate::hub::StreamHub).
///
/// `inputs` is the provider cache up to and including the item being
/// computed (never empty); `index` is that item's position in the provider
/// cache. `outputs` holds this indicator's earlier results, those with
/// timestamps before the current item.
///
/// # Example
///
/// ```ignore
/// struct Close;
///
/// impl Indicator<Quote, TimeValue> for Close {
///     fn name(&self) -> String {
///         "CLOSE".to_string()
///     }
///
///     fn compute(&self, _index: usize, inputs: &[Quote], _outputs: &[TimeValue]) -> TimeValue {
///         let q = &inputs[inputs.len() - 1];
///         TimeValue::new(q.timestamp, Some(q.close))
///     }
/// }
/// ```
pub trait Indicator<I: TimedItem, O: TimedItem>: Send + Sync + 'static {
    /// Diagnostic label, e.g. `SMA(20)`
    fn name(&self) -> String;

    fn compute(&self, index: usize, inputs: &[I], outputs: &[O]) -> O;
}

/// Indicator that carries rolling state from one position to the next,
/// used by [`StateHub`](crate::hub::StateHub).
///
/// `compute` receives the state left by the previous position and updates
/// it in place. The hub snapshots the state after every result, so a
/// rebuild resumes from a snapshot instead of rescanning history. For any
/// input sequence the results must equal a stateless recomputation.
pub trait StatefulIndicator<I: TimedItem, O: TimedItem>: Send + Sync + 'static {
    type State: Clone + Send + Sync + 'static;

    fn name(&self) -> String;

    /// State before the first item.
    fn initial_state(&self) -> Self::State;

    fn compute(&self, index: usize, inputs: &[I], state: &mut Self::State) -> O;
}

/// Indicator over two synchronized providers, used by
/// [`PairsHub`](crate::hub::PairsHub).
///
/// `left` and `right` each end at the items sharing the timestamp being
/// computed.
pub trait PairIndicator<I: TimedItem, O: TimedItem>: Send + Sync + 'static {
    fn name(&self) -> String;

    fn compute(&self, left: &[I], right: &[I], outputs: &[O]) -> O;
}

/// Last `period` items, or `None` while fewer are available.
pub(crate) fn window<I>(inputs: &[I], period: usize) -> Option<&[I]> {
    inputs
        .len()
        .checked_sub(period)
        .map(|start| &inputs[start..])
}
