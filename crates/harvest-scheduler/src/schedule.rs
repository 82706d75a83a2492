//! 5-field cron schedules, evaluated in local time.
//!
//! The `cron` crate wants `sec min hour day month weekday year` and numbers
//! weekdays 1-7 from Sunday. Expressions are accepted in the classic
//! `min hour day month weekday` form (weekday 0-7, 0 and 7 both Sunday) and
//! rewritten before parsing.

use std::str::FromStr;

use chrono::{DateTime, Local, Utc};
use harvest_core::error::{HarvestError, Result};

const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// A validated cron schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expr: String,
    schedule: ::cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(HarvestError::validation(format!(
                "cron expression '{expr}' must have 5 fields (minute hour day month weekday), got {}",
                fields.len()
            )));
        }

        let weekday = map_weekday_field(fields[4])
            .map_err(|e| HarvestError::validation(format!("invalid cron expression '{expr}': {e}")))?;
        let normalized = format!(
            "0 {} {} {} {} {} *",
            fields[0], fields[1], fields[2], fields[3], weekday
        );

        let schedule = ::cron::Schedule::from_str(&normalized)
            .map_err(|e| HarvestError::validation(format!("invalid cron expression '{expr}': {e}")))?;

        Ok(Self { expr: expr.to_string(), schedule })
    }

    /// The expression as the user wrote it.
    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&Local);
        self.schedule
            .after(&local)
            .next()
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn next_from_now(&self) -> Option<DateTime<Utc>> {
        self.next_after(Utc::now())
    }
}

/// Check that `expr` is an acceptable schedule.
pub fn validate(expr: &str) -> Result<()> {
    CronSchedule::parse(expr).map(|_| ())
}

/// Rewrite numeric weekdays to names so 0 and 7 mean Sunday.
///
/// Numeric ranges are expanded into explicit lists, which also covers
/// ranges ending at 7 (`5-7`). Wildcards and named days pass through.
fn map_weekday_field(field: &str) -> std::result::Result<String, String> {
    let mut out = Vec::new();
    for part in field.split(',') {
        if part.is_empty() {
            return Err("empty weekday list item".into());
        }
        if part.starts_with('*') || part == "?" || part.chars().any(|c| c.is_ascii_alphabetic()) {
            out.push(part.to_string());
            continue;
        }

        let (range, step) = match part.split_once('/') {
            Some((r, s)) => {
                let step: usize = s.parse().map_err(|_| format!("invalid weekday step '{s}'"))?;
                if step == 0 {
                    return Err("weekday step must be > 0".into());
                }
                (r, step)
            }
            None => (part, 1),
        };

        let (start, end) = match range.split_once('-') {
            Some((a, b)) => (parse_weekday(a)?, parse_weekday(b)?),
            None => {
                let day = parse_weekday(range)?;
                // `5/2` means "from Friday, every other day"
                (day, if step > 1 { 7 } else { day })
            }
        };
        if start > end {
            return Err(format!("weekday range '{range}' runs backwards"));
        }

        for day in (start..=end).step_by(step) {
            let name = WEEKDAYS[(day % 7) as usize];
            if !out.iter().any(|d| d == name) {
                out.push(name.to_string());
            }
        }
    }
    Ok(out.join(","))
}

fn parse_weekday(s: &str) -> std::result::Result<u32, String> {
    let day: u32 = s.parse().map_err(|_| format!("invalid weekday '{s}'"))?;
    if day > 7 {
        return Err(format!("weekday {day} out of range 0-7"));
    }
    Ok(day)
}
