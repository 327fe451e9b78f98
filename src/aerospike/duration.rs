//! Duration literals used for TTL fields.
//!
//! A literal is a sequence of decimal numbers, each with an optional fraction
//! and a unit suffix, such as `"300ms"`, `"1.5h"` or `"2h45m"`. Valid units are
//! `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h` and `d` (24 hours). The bare
//! literal `"0"` is also accepted.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DurationError {
    #[error("invalid duration {input:?}")]
    Invalid { input: String },

    #[error("missing unit in duration {input:?}")]
    MissingUnit { input: String },

    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { unit: String, input: String },

    #[error("duration {input:?} is out of range")]
    OutOfRange { input: String },
}

static COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"(\d+\.?\d*|\.\d+)([^\d.]*)").expect("valid duration regex")
});

fn unit_nanos(unit: &str) -> Option<f64> {
    match unit {
        "ns" => Some(1.0),
        "us" | "µs" | "μs" => Some(1e3),
        "ms" => Some(1e6),
        "s" => Some(1e9),
        "m" => Some(60e9),
        "h" => Some(3600e9),
        "d" => Some(86400e9),
        _ => None,
    }
}

/// Parse a duration literal. Negative durations are rejected.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let invalid = || DurationError::Invalid {
        input: input.to_string(),
    };

    let body = input.strip_prefix('+').unwrap_or(input);
    if body == "0" {
        return Ok(Duration::ZERO);
    }
    if body.is_empty() {
        return Err(invalid());
    }

    let mut total = 0.0_f64;
    let mut consumed = 0;
    for caps in COMPONENT.captures_iter(body) {
        let (Some(whole), Some(number), Some(unit)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            return Err(invalid());
        };
        // Components must be contiguous and cover the whole literal
        if whole.start() != consumed {
            return Err(invalid());
        }
        consumed = whole.end();

        let unit = unit.as_str();
        if unit.is_empty() {
            return Err(DurationError::MissingUnit {
                input: input.to_string(),
            });
        }
        let scale = unit_nanos(unit).ok_or_else(|| DurationError::UnknownUnit {
            unit: unit.to_string(),
            input: input.to_string(),
        })?;
        let value: f64 = number.as_str().parse().map_err(|_| invalid())?;
        total += value * scale;
    }
    if consumed != body.len() {
        return Err(invalid());
    }

    if !total.is_finite() || total > u64::MAX as f64 {
        return Err(DurationError::OutOfRange {
            input: input.to_string(),
        });
    }
    Ok(Duration::from_nanos(total.round() as u64))
}
