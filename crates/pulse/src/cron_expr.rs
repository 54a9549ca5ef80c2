// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cron expression handling
//!
//! Schedules are written as standard 5-field cron expressions. The `cron`
//! crate wants a seconds field, so 5-field expressions get `0 ` prepended;
//! native 6/7-field expressions pass through unchanged.

use crate::error::PulseError;
use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use std::str::FromStr;

/// Parse a cron expression, accepting 5, 6, or 7 fields.
pub fn parse_cron(expr: &str) -> Result<cron::Schedule, PulseError> {
    let fields = expr.split_whitespace().count();
    let normalized = if fields == 5 { format!("0 {expr}") } else { expr.to_string() };
    cron::Schedule::from_str(&normalized).map_err(|e| PulseError::InvalidCron {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

/// Next fire time after `now_ms`, in epoch milliseconds. `None` when the
/// expression has no future firings.
pub fn next_fire_ms(
    expr: &str,
    timezone: Option<&str>,
    now_ms: u64,
) -> Result<Option<u64>, PulseError> {
    let schedule = parse_cron(expr)?;
    let tz: Tz = match timezone {
        Some(name) => name
            .parse()
            .map_err(|_| PulseError::InvalidTimezone(name.to_string()))?,
        None => Tz::UTC,
    };
    let now = Utc
        .timestamp_millis_opt(now_ms as i64)
        .single()
        .unwrap_or_else(Utc::now);
    let next = schedule
        .after(&now.with_timezone(&tz))
        .next()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis() as u64);
    Ok(next)
}

#[cfg(test)]
#[path = "cron_expr_tests.rs"]
mod tests;
