//! Log output setup for applications that drive a streaming graph.
//!
//! The graph itself only emits `tracing` events: `trace!` per accepted item,
//! `debug!` for rebuild and prune cascades, `warn!` for overflow and
//! synchronization faults. Installing a subscriber is left to the binary or
//! test harness, which can use [`init_logging`].
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Standard tracing filter (e.g., `indicator_stream=debug`)
//! - `LOG_FORMAT`: `pretty` (default), `compact`, or `json`
//! - `LOG_TIMESTAMPS`: `local` (default), `utc`, or `none`
//!
//! # Usage
//!
//! ```rust,ignore
//! use indicator_stream::logging::{init_logging, LogConfig};
//!
//! init_logging(LogConfig::from_env())?;
//! ```

mod config;

pub use config::{init_logging, LogConfig, LogFormat, TimestampFormat};
