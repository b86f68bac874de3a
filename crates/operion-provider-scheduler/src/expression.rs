//! Schedule expression parsing (§6.3): standard 5-field cron, the
//! `@yearly`/`@monthly`/`@weekly`/`@daily`/`@hourly` descriptors, and
//! `@every <duration>`.
//!
//! The `cron` crate parses 6-field expressions (seconds first); a bare
//! 5-field expression is given an implicit `0` seconds field so callers can
//! write the conventional 5-field form.

use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::SchedulerError;

const YEARLY: &str = "0 0 0 1 1 *";
const MONTHLY: &str = "0 0 0 1 * *";
const WEEKLY: &str = "0 0 0 * * Sun";
const DAILY: &str = "0 0 0 * * *";
const HOURLY: &str = "0 0 * * * *";

/// Compute the next UTC firing time strictly after `from`.
pub fn next_due_at(expression: &str, from: DateTime<Utc>) -> Result<DateTime<Utc>, SchedulerError> {
  let trimmed = expression.trim();

  if let Some(duration_str) = trimmed.strip_prefix("@every ") {
    let duration = parse_duration(duration_str).ok_or_else(|| SchedulerError::Invalid {
      expression: expression.to_string(),
      reason: format!("unrecognized duration '{duration_str}', expected e.g. '90s', '5m', '2h'"),
    })?;
    return Ok(from + duration);
  }

  let normalized = match trimmed {
    "@yearly" | "@annually" => YEARLY.to_string(),
    "@monthly" => MONTHLY.to_string(),
    "@weekly" => WEEKLY.to_string(),
    "@daily" | "@midnight" => DAILY.to_string(),
    "@hourly" => HOURLY.to_string(),
    other => normalize_field_count(other)?,
  };

  let schedule = cron::Schedule::from_str(&normalized).map_err(|e| SchedulerError::Invalid {
    expression: expression.to_string(),
    reason: e.to_string(),
  })?;

  schedule
    .after(&from)
    .next()
    .ok_or_else(|| SchedulerError::Invalid {
      expression: expression.to_string(),
      reason: "expression never fires again".to_string(),
    })
}

fn normalize_field_count(expression: &str) -> Result<String, SchedulerError> {
  let field_count = expression.split_whitespace().count();
  match field_count {
    5 => Ok(format!("0 {expression}")),
    6 | 7 => Ok(expression.to_string()),
    _ => Err(SchedulerError::Invalid {
      expression: expression.to_string(),
      reason: format!("expected 5 fields (standard cron), found {field_count}"),
    }),
  }
}

/// A minimal `<number><unit>` duration parser (`s`, `m`, `h`, `d`), enough
/// for `@every 90s` / `@every 5m` / `@every 2h` / `@every 1d`.
fn parse_duration(s: &str) -> Option<chrono::Duration> {
  let s = s.trim();
  let unit = s.chars().last()?;
  let (digits, multiplier) = match unit {
    's' => (&s[..s.len() - 1], 1),
    'm' => (&s[..s.len() - 1], 60),
    'h' => (&s[..s.len() - 1], 3600),
    'd' => (&s[..s.len() - 1], 86_400),
    _ => (s, 1),
  };
  let value: i64 = digits.trim().parse().ok()?;
  Some(chrono::Duration::seconds(value * multiplier))
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
  }

  #[test]
  fn five_field_expression_is_accepted() {
    let from = at(2026, 7, 26, 8, 0, 0);
    let next = next_due_at("0 9 * * *", from).unwrap();
    assert_eq!(next, at(2026, 7, 26, 9, 0, 0));
  }

  #[test]
  fn daily_descriptor_fires_at_midnight() {
    let from = at(2026, 7, 26, 8, 0, 0);
    let next = next_due_at("@daily", from).unwrap();
    assert_eq!(next, at(2026, 7, 27, 0, 0, 0));
  }

  #[test]
  fn every_duration_adds_offset() {
    let from = at(2026, 7, 26, 8, 0, 0);
    let next = next_due_at("@every 5m", from).unwrap();
    assert_eq!(next, from + chrono::Duration::minutes(5));
  }

  #[test]
  fn invalid_expression_is_rejected() {
    let from = at(2026, 7, 26, 8, 0, 0);
    assert!(next_due_at("not a cron", from).is_err());
  }
}
