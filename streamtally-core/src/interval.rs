//! Human-readable intervals: `"1 hour"`, `"10 minutes"`, `"500 ms"`, `"2s"`.
//!
//! Used for window geometry, trigger intervals, watermark delays and retry
//! backoff in query configuration files.

use std::time::Duration;

use crate::error::{QueryError, QueryResult};

/// Parse `<amount> <unit>` (whitespace between the two is optional).
///
/// Units: `ms`, `millisecond(s)`, `s`, `sec(s)`, `second(s)`, `min(s)`,
/// `minute(s)`, `h`, `hour(s)`, `d`, `day(s)`. Amounts are non-negative integers.
pub fn parse_interval(input: &str) -> QueryResult<Duration> {
    let text = input.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (amount, unit) = text.split_at(split);
    let amount: u64 = amount
        .parse()
        .map_err(|_| QueryError::config(format!("invalid interval '{input}'")))?;
    let unit_ms: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "ms" | "milli" | "millis" | "millisecond" | "milliseconds" => 1,
        "s" | "sec" | "secs" | "second" | "seconds" => 1_000,
        "m" | "min" | "mins" | "minute" | "minutes" => 60_000,
        "h" | "hr" | "hour" | "hours" => 3_600_000,
        "d" | "day" | "days" => 86_400_000,
        "" => return Err(QueryError::config(format!("interval '{input}' has no unit"))),
        other => {
            return Err(QueryError::config(format!(
                "unknown interval unit '{other}' in '{input}'"
            )))
        }
    };
    amount
        .checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| QueryError::config(format!("interval '{input}' is too large")))
}

/// Render a duration with the largest unit that divides it exactly.
pub fn format_interval(d: Duration) -> String {
    let ms = d.as_millis();
    for (unit_ms, singular, plural) in [
        (86_400_000u128, "day", "days"),
        (3_600_000, "hour", "hours"),
        (60_000, "minute", "minutes"),
        (1_000, "second", "seconds"),
    ] {
        if ms != 0 && ms % unit_ms == 0 {
            let n = ms / unit_ms;
            return format!("{n} {}", if n == 1 { singular } else { plural });
        }
    }
    format!("{ms} ms")
}

pub mod serde_interval {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_interval(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(d)?;
        parse_interval(&text).map_err(serde::de::Error::custom)
    }
}

pub mod serde_opt_interval {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&format_interval(*d)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let text = Option::<String>::deserialize(d)?;
        text.map(|t| parse_interval(&t).map_err(serde::de::Error::custom))
            .transpose()
    }
}
