//! Human-readable time strings
//!
//! Accepted forms:
//! - plain numbers, read as seconds: `"2"`, `"1.5"`
//! - unit expressions that add up: `"500ms"`, `"2s"`, `"1 min 30 s"`, `"1h 10 minutes"`
//! - timer form: `"01:02:03"`, `"02:30"`, `"00:00:01.250"`
//!
//! A leading `-` negates the whole value.

use crate::error::MitmError;
use crate::Result;
use std::time::Duration;

/// Resolve a time string to (possibly negative) seconds.
pub fn timestr_to_secs(input: &str) -> Result<f64> {
    let text = input.trim();
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, text),
    };
    if body.is_empty() {
        return Err(invalid(input));
    }

    let secs = if let Ok(number) = body.parse::<f64>() {
        number
    } else if body.contains(':') {
        timer_to_secs(body).ok_or_else(|| invalid(input))?
    } else {
        units_to_secs(body).ok_or_else(|| invalid(input))?
    };

    if !secs.is_finite() {
        return Err(invalid(input));
    }
    Ok(if negative { -secs } else { secs })
}

/// Resolve a time string to a [`Duration`]. Negative values are rejected.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let secs = timestr_to_secs(input)?;
    if secs < 0.0 {
        return Err(MitmError::InvalidDuration(format!(
            "'{}' is negative",
            input.trim()
        )));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| invalid(input))
}

fn invalid(input: &str) -> MitmError {
    MitmError::InvalidDuration(format!("'{}'", input.trim()))
}

fn timer_to_secs(body: &str) -> Option<f64> {
    let parts: Vec<&str> = body.split(':').map(str::trim).collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [m, s] => ("0", *m, *s),
        [h, m, s] => (*h, *m, *s),
        _ => return None,
    };
    let whole = |part: &str| -> Option<f64> {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        part.parse::<u64>().ok().map(|v| v as f64)
    };
    if seconds.is_empty() || !seconds.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    let seconds: f64 = seconds.parse().ok()?;
    Some(whole(hours)? * 3600.0 + whole(minutes)? * 60.0 + seconds)
}

fn units_to_secs(body: &str) -> Option<f64> {
    let compact: String = body
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();

    let mut rest = compact.as_str();
    let mut total = 0.0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let number: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| !c.is_alphabetic())
            .unwrap_or(rest.len());
        if unit_len == 0 {
            return None;
        }
        total += number * unit_multiplier(&rest[..unit_len])?;
        rest = &rest[unit_len..];
    }
    Some(total)
}

fn unit_multiplier(unit: &str) -> Option<f64> {
    let multiplier = match unit {
        "d" | "day" | "days" => 86_400.0,
        "h" | "hour" | "hours" => 3_600.0,
        "m" | "min" | "mins" | "minute" | "minutes" => 60.0,
        "s" | "sec" | "secs" | "second" | "seconds" => 1.0,
        "ms" | "millis" | "millisecond" | "milliseconds" => 1e-3,
        "us" | "μs" | "micro" | "micros" | "microsecond" | "microseconds" => 1e-6,
        "ns" | "nano" | "nanos" | "nanosecond" | "nanoseconds" => 1e-9,
        _ => return None,
    };
    Some(multiplier)
}
