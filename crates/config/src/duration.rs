//! Human-friendly durations (`"90s"`, `"30m"`, `"24h"`, `"7d"`).

use std::time::Duration;

use crate::error::{Context, Error, Result};

/// Parse a duration with an `s`, `m`, `h` or `d` suffix.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::Message("empty duration string".into()));
    }

    let split = input
        .find(|c: char| c.is_alphabetic())
        .with_context(|| format!("duration missing unit suffix (s/m/h/d): {input}"))?;
    let (digits, unit) = input.split_at(split);

    let value: u64 = digits
        .trim()
        .parse()
        .with_context(|| format!("invalid number in duration {input:?}"))?;
    if value == 0 {
        return Err(Error::Message("duration must be > 0".into()));
    }

    let secs_per_unit = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        _ => {
            return Err(Error::Message(format!(
                "unknown duration suffix: {unit} (expected s/m/h/d)"
            )));
        },
    };

    value
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .context("duration overflows")
}
