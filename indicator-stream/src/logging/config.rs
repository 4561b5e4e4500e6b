//! Logging configuration and initialization.

use std::env;
use std::str::FromStr;

use tracing_subscriber::fmt::time::{ChronoLocal, ChronoUtc};
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::error::ConfigurationError;

const LOCAL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f %z";
const UTC_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

type FilteredRegistry = Layered<EnvFilter, Registry>;

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Multi-line, colored on a terminal
    #[default]
    Pretty,
    /// One line per event
    Compact,
    /// JSON lines for log aggregation
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigurationError::invalid_value(
                "logging.format",
                format!("unknown format '{}', expected pretty, compact or json", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampFormat {
    #[default]
    Local,
    Utc,
    None,
}

impl FromStr for TimestampFormat {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(TimestampFormat::Local),
            "utc" => Ok(TimestampFormat::Utc),
            "none" | "off" => Ok(TimestampFormat::None),
            other => Err(ConfigurationError::invalid_value(
                "logging.timestamps",
                format!("unknown timestamp format '{}'", other),
            )),
        }
    }
}

/// Parsed environment value, or the default when unset or unrecognized.
fn env_or_default<T: FromStr + Default>(key: &str) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or_default()
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.trim(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

/// Subscriber settings used by [`init_logging`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    pub timestamps: TimestampFormat,
    /// Filter applied when `RUST_LOG` is unset, e.g. `info` or
    /// `indicator_stream::hub=debug`
    pub level: String,
    /// file:line of the event
    pub include_location: bool,
    pub include_thread_ids: bool,
    /// Module path of the event
    pub include_target: bool,
    /// Current span (JSON only)
    pub include_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            timestamps: TimestampFormat::Local,
            level: "info".to_string(),
            include_location: true,
            include_thread_ids: false,
            include_target: true,
            include_spans: false,
        }
    }
}

impl LogConfig {
    /// Read `LOG_FORMAT`, `LOG_TIMESTAMPS`, `LOG_LEVEL`, `LOG_LOCATION` and
    /// `LOG_THREAD_IDS`; anything unset keeps its default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            format: env_or_default("LOG_FORMAT"),
            timestamps: env_or_default("LOG_TIMESTAMPS"),
            level: env::var("LOG_LEVEL").unwrap_or(defaults.level),
            include_location: env_flag("LOG_LOCATION", defaults.include_location),
            include_thread_ids: env_flag("LOG_THREAD_IDS", defaults.include_thread_ids),
            ..defaults
        }
    }

    /// JSON lines with UTC timestamps, thread ids and spans.
    pub fn json() -> Self {
        Self {
            format: LogFormat::Json,
            timestamps: TimestampFormat::Utc,
            include_thread_ids: true,
            include_spans: true,
            ..Default::default()
        }
    }

    /// Single-line output without file locations.
    pub fn compact() -> Self {
        Self {
            format: LogFormat::Compact,
            include_location: false,
            ..Default::default()
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }
}

// Each format/timer combination is a distinct layer type, so box them.
macro_rules! with_timestamps {
    ($layer:expr, $timestamps:expr) => {
        match $timestamps {
            TimestampFormat::Local => $layer
                .with_timer(ChronoLocal::new(LOCAL_TIME_FORMAT.to_string()))
                .boxed(),
            TimestampFormat::Utc => $layer
                .with_timer(ChronoUtc::new(UTC_TIME_FORMAT.to_string()))
                .boxed(),
            TimestampFormat::None => $layer.without_time().boxed(),
        }
    };
}

/// Initialize logging with the given configuration
///
/// # Errors
///
/// Returns an error if the subscriber cannot be initialized (e.g., already set)
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // RUST_LOG wins over the configured default
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(build_layer(&config))
        .try_init()?;

    Ok(())
}

fn build_layer(config: &LogConfig) -> Box<dyn Layer<FilteredRegistry> + Send + Sync> {
    let ansi = config.format != LogFormat::Json && atty::is(atty::Stream::Stdout);
    let layer = fmt::layer()
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_level(true)
        .with_ansi(ansi);

    match config.format {
        LogFormat::Json => with_timestamps!(
            layer.json().with_current_span(config.include_spans),
            config.timestamps
        ),
        LogFormat::Compact => with_timestamps!(layer.compact(), config.timestamps),
        LogFormat::Pretty => with_timestamps!(layer.pretty(), config.timestamps),
    }
}
