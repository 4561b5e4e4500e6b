// indicator-stream: Incremental technical indicators over push-based streams
// Batch results and streaming results stay identical under late, corrected
// and removed data.

pub mod config;
pub mod data;
pub mod error;
pub mod hub;
pub mod logging;
pub mod series;
pub mod transforms;

pub use config::{HubConfig, StreamConfig};
pub use data::{Quote, Tick, TimeValue, Timeframe};
pub use error::{HubError, HubResult};
pub use hub::{
    HubExt, PairsHub, QuoteAggregatorHub, QuoteHub, QuoteHubExt, SourceHub, StateHub,
    StreamHub, StreamObservable, StreamObserver, TickAggregatorHub, TickHub, TickHubExt,
    TimedItem,
};
