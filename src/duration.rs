//! Human-readable durations used for Son delays and stats timeframes.
//!
//! Accepts compound unit strings (`90s`, `1h30m`, `1.5h`, `250ms`) plus the
//! day and week units `d` and `w`. A bare integer is read as minutes, which
//! is how delays saved as JSON numbers are interpreted.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

static WHOLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:\d+(?:\.\d*)?|\.\d+)(?:ns|us|µs|ms|s|m|h|d|w))+$").unwrap()
});

static COMPONENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d*)?|\.\d+)(ns|us|µs|ms|s|m|h|d|w)").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseDurationError {
    #[error("empty duration")]
    Empty,

    #[error("invalid duration {0:?}")]
    Invalid(String),

    #[error("duration {0:?} is out of range")]
    Overflow(String),
}

/// Parse a duration string.
pub fn parse_duration(input: &str) -> Result<Duration, ParseDurationError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(ParseDurationError::Empty);
    }

    if let Ok(minutes) = s.parse::<u64>() {
        return minutes
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| ParseDurationError::Overflow(s.to_string()));
    }

    if !WHOLE.is_match(s) {
        return Err(ParseDurationError::Invalid(s.to_string()));
    }

    let mut total = 0f64;
    for cap in COMPONENT.captures_iter(s) {
        let value: f64 = cap[1]
            .parse()
            .map_err(|_| ParseDurationError::Invalid(s.to_string()))?;
        total += value * unit_seconds(&cap[2]);
    }

    Duration::try_from_secs_f64(total).map_err(|_| ParseDurationError::Overflow(s.to_string()))
}

fn unit_seconds(unit: &str) -> f64 {
    match unit {
        "ns" => 1e-9,
        "us" | "µs" => 1e-6,
        "ms" => 1e-3,
        "s" => 1.0,
        "m" => 60.0,
        "h" => 3_600.0,
        "d" => 86_400.0,
        _ => 604_800.0,
    }
}
