//! Configuration for streaming hubs.
//!
//! Settings are plain values passed at construction. A root provider is
//! built with a [`HubConfig`] and every hub chained from it inherits that
//! config explicitly; nothing is read from process-wide state.
//!
//! Settings can be written in code or loaded from a TOML file:
//!
//! ```toml
//! [hub]
//! max_cache_size = 5000
//!
//! [dedup]
//! window_secs = 30
//! capacity = 2000
//!
//! [logging]
//! format = "compact"
//! level = "debug"
//! ```
//!
//! # Example
//!
//! ```no_run
//! use indicator_stream::config::StreamConfig;
//!
//! let config = StreamConfig::from_file("config/stream.toml").unwrap();
//! println!("cache bound: {}", config.hub.max_cache_size);
//! ```

pub mod schema;
pub mod validation;

pub use schema::{DedupConfig, HubConfig, LoggingSection, StreamConfig, MAX_CACHE_SIZE_LIMIT};
pub use validation::ConfigValidator;
