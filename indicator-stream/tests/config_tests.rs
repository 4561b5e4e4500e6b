//! Building a graph from a TOML configuration.

use chrono::{Duration, TimeZone, Utc};
use rust_decimal_macros::dec;

use indicator_stream::config::StreamConfig;
use indicator_stream::error::{ConfigurationError, HubError};
use indicator_stream::hub::{HubExt, QuoteHub, TickAggregatorHub, TickHub};
use indicator_stream::logging::LogFormat;
use indicator_stream::{hub, Quote, StreamObservable, Tick};

const CONFIG: &str = r#"
[hub]
max_cache_size = 3

[dedup]
window_secs = 10
capacity = 100

[logging]
format = "json"
level = "debug"
"#;

#[test]
fn test_config_drives_hub_settings() {
    let config = StreamConfig::from_toml_str(CONFIG).unwrap();
    assert_eq!(config.log_config().format, LogFormat::Json);

    let quotes = QuoteHub::with_config("QUOTES", config.hub).unwrap();
    let sma = quotes.to_sma_hub(2).unwrap();
    assert_eq!(sma.config().max_cache_size, 3);

    let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    for m in 0..6 {
        quotes
            .add(Quote::flat(start + Duration::minutes(m), dec!(10)))
            .unwrap();
    }
    assert_eq!(quotes.len(), 3);
    assert_eq!(sma.len(), 3);
}

#[test]
fn test_dedup_settings_reach_tick_aggregator() {
    let config = StreamConfig::from_toml_str(CONFIG).unwrap();
    let ticks = TickHub::with_config("TICKS", config.hub).unwrap();
    let bars = TickAggregatorHub::with_settings(
        hub::provider(&ticks),
        Duration::minutes(1),
        Duration::zero(),
        false,
        config.dedup,
    )
    .unwrap();

    let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    ticks
        .add(Tick::new(start, dec!(5), dec!(1)).with_execution_id("x"))
        .unwrap();
    // outside the 10s window the id is forgotten and applies again
    ticks
        .add(Tick::new(start + Duration::seconds(20), dec!(6), dec!(1)).with_execution_id("x"))
        .unwrap();
    assert_eq!(bars.results()[0].volume, dec!(2));
    assert_eq!(bars.dedup_len(), 1);
}

#[test]
fn test_invalid_config_is_rejected() {
    let err = StreamConfig::from_toml_str("[hub]\nmax_cache_size = 0\n").unwrap_err();
    assert!(matches!(err, ConfigurationError::InvalidValue { .. }));

    let err = StreamConfig::from_toml_str("[hub\n").unwrap_err();
    assert!(matches!(err, ConfigurationError::Parse(_)));

    let err = StreamConfig::from_file("/nonexistent/stream.toml").unwrap_err();
    assert!(matches!(err, ConfigurationError::FileNotFound(_)));
}

#[test]
fn test_zero_capacity_dedup_is_construction_error() {
    let ticks = TickHub::new();
    let mut config = StreamConfig::default();
    config.dedup.capacity = 0;
    let result = TickAggregatorHub::with_settings(
        hub::provider(&ticks),
        Duration::minutes(1),
        Duration::zero(),
        false,
        config.dedup,
    );
    assert!(matches!(
        result,
        Err(HubError::Construction { ref parameter, .. }) if parameter == "capacity"
    ));
}
