// Record types that flow through the streaming graph

pub mod types;

pub use types::{floor_to_period, format_period, Quote, Tick, TimeValue, Timeframe};
