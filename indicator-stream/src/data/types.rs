use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::hub::TimedItem;

/// OHLCV quote (one bar)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Quote {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Flat zero-volume bar at `price`, used to fill empty buckets
    pub fn flat(timestamp: DateTime<Utc>, price: Decimal) -> Self {
        Self::new(timestamp, price, price, price, price, Decimal::ZERO)
    }
}

impl TimedItem for Quote {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Single trade execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tick {
    /// Execution timestamp
    pub timestamp: DateTime<Utc>,

    /// Trade price
    pub price: Decimal,

    /// Traded quantity
    pub volume: Decimal,

    /// Venue execution id, used to tell repeated delivery from
    /// concurrent executions at the same timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
}

impl Tick {
    pub fn new(timestamp: DateTime<Utc>, price: Decimal, volume: Decimal) -> Self {
        Self {
            timestamp,
            price,
            volume,
            execution_id: None,
        }
    }

    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }
}

impl TimedItem for Tick {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn correlation_id(&self) -> Option<&str> {
        self.execution_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Single indicator value; `None` while the indicator warms up
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeValue {
    pub timestamp: DateTime<Utc>,
    pub value: Option<Decimal>,
}

impl TimeValue {
    pub fn new(timestamp: DateTime<Utc>, value: Option<Decimal>) -> Self {
        Self { timestamp, value }
    }

    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self::new(timestamp, None)
    }
}

impl TimedItem for TimeValue {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Preset aggregation periods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    FourHours,
    OneDay,
    OneWeek,
}

impl Timeframe {
    pub fn as_duration(&self) -> Duration {
        match self {
            Timeframe::OneMinute => Duration::minutes(1),
            Timeframe::FiveMinutes => Duration::minutes(5),
            Timeframe::FifteenMinutes => Duration::minutes(15),
            Timeframe::ThirtyMinutes => Duration::minutes(30),
            Timeframe::OneHour => Duration::hours(1),
            Timeframe::FourHours => Duration::hours(4),
            Timeframe::OneDay => Duration::days(1),
            Timeframe::OneWeek => Duration::weeks(1),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::OneMinute => "1m",
            Timeframe::FiveMinutes => "5m",
            Timeframe::FifteenMinutes => "15m",
            Timeframe::ThirtyMinutes => "30m",
            Timeframe::OneHour => "1h",
            Timeframe::FourHours => "4h",
            Timeframe::OneDay => "1d",
            Timeframe::OneWeek => "1w",
        }
    }

    /// Offset of bucket boundaries from the Unix epoch. Weekly buckets
    /// start on Monday; the epoch fell on a Thursday.
    pub fn origin_offset(&self) -> Duration {
        match self {
            Timeframe::OneWeek => Duration::days(4),
            _ => Duration::zero(),
        }
    }

    /// Get the start of the time window for a given timestamp
    pub fn align_timestamp(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        floor_to_period(timestamp, self.as_duration(), self.origin_offset())
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Round `timestamp` down to a multiple of `period`, counted from the Unix
/// epoch shifted by `origin`. Periods too large to express in microseconds
/// leave the timestamp unchanged; callers validate periods up front.
pub fn floor_to_period(
    timestamp: DateTime<Utc>,
    period: Duration,
    origin: Duration,
) -> DateTime<Utc> {
    let (Some(period_us), Some(origin_us)) = (period.num_microseconds(), origin.num_microseconds())
    else {
        return timestamp;
    };
    if period_us <= 0 {
        return timestamp;
    }
    let remainder = (timestamp.timestamp_micros() - origin_us).rem_euclid(period_us);
    timestamp
        .checked_sub_signed(Duration::microseconds(remainder))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Format a period as `hh:mm:ss`, with a `d.` prefix past one day
/// (`00:05:00`, `1.00:00:00`).
pub fn format_period(period: Duration) -> String {
    let total = period.num_seconds();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    if days > 0 {
        format!("{}.{:02}:{:02}:{:02}", days, hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}
