//! Candle resolution and its quota / request-span characteristics.

use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::data::provider::DataError;

/// Supported candle resolutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "1h", alias = "hourly")]
    Hourly,
    #[serde(rename = "1d", alias = "daily")]
    Daily,
    #[serde(rename = "15m", alias = "fifteen_minute")]
    FifteenMinute,
    #[serde(rename = "1m", alias = "one_minute")]
    OneMinute,
}

impl Resolution {
    pub const ALL: [Resolution; 4] = [
        Resolution::Hourly,
        Resolution::Daily,
        Resolution::FifteenMinute,
        Resolution::OneMinute,
    ];

    /// Short form used in cache file names and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Hourly => "1h",
            Resolution::Daily => "1d",
            Resolution::FifteenMinute => "15m",
            Resolution::OneMinute => "1m",
        }
    }

    /// Long form used in configuration tables.
    pub fn name(&self) -> &'static str {
        match self {
            Resolution::Hourly => "hourly",
            Resolution::Daily => "daily",
            Resolution::FifteenMinute => "fifteen_minute",
            Resolution::OneMinute => "one_minute",
        }
    }

    /// Fraction of a trading day covered by one candle.
    ///
    /// The trading day is taken as 12 hours, so one day of hourly candles
    /// counts as 12 bar-equivalents against the acquisition quota.
    pub fn part_of_day(&self) -> f64 {
        match self {
            Resolution::Hourly => 1.0 / 12.0,
            Resolution::Daily => 1.0,
            Resolution::FifteenMinute => 0.25 / 12.0,
            Resolution::OneMinute => 1.0 / 60.0 / 12.0,
        }
    }

    /// Candles per trading day, the exact reciprocal of [`part_of_day`](Self::part_of_day).
    pub fn bars_per_day(&self) -> f64 {
        match self {
            Resolution::Hourly => 12.0,
            Resolution::Daily => 1.0,
            Resolution::FifteenMinute => 48.0,
            Resolution::OneMinute => 720.0,
        }
    }

    /// Widest time window the provider serves in a single candle request.
    pub fn max_request_span(&self) -> Duration {
        match self {
            Resolution::Hourly => Duration::days(7),
            Resolution::Daily => Duration::days(365),
            Resolution::FifteenMinute | Resolution::OneMinute => Duration::days(1),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1h" | "hour" | "hourly" => Ok(Resolution::Hourly),
            "1d" | "day" | "daily" => Ok(Resolution::Daily),
            "15m" | "fifteen_minute" => Ok(Resolution::FifteenMinute),
            "1m" | "minute" | "one_minute" => Ok(Resolution::OneMinute),
            _ => Err(DataError::InvalidResolution(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_and_long_forms() {
        assert_eq!("1d".parse::<Resolution>().unwrap(), Resolution::Daily);
        assert_eq!("hourly".parse::<Resolution>().unwrap(), Resolution::Hourly);
        assert_eq!("15m".parse::<Resolution>().unwrap(), Resolution::FifteenMinute);
        assert_eq!(" 1M ".parse::<Resolution>().unwrap(), Resolution::OneMinute);
    }

    #[test]
    fn rejects_unknown_resolution() {
        let err = "5m".parse::<Resolution>().unwrap_err();
        assert!(matches!(err, DataError::InvalidResolution(ref s) if s == "5m"));
    }

    #[test]
    fn display_matches_short_form() {
        for r in Resolution::ALL {
            assert_eq!(r.to_string().parse::<Resolution>().unwrap(), r);
        }
    }

    #[test]
    fn serde_uses_short_form_and_accepts_names() {
        assert_eq!(serde_json::to_string(&Resolution::Daily).unwrap(), "\"1d\"");
        let r: Resolution = serde_json::from_str("\"one_minute\"").unwrap();
        assert_eq!(r, Resolution::OneMinute);
    }

    #[test]
    fn bars_per_day_is_reciprocal_of_part_of_day() {
        for r in Resolution::ALL {
            assert!((r.bars_per_day() * r.part_of_day() - 1.0).abs() < 1e-12);
        }
    }
}
