//! Sending window: a recurring weekly time-of-day restriction on sends

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// A weekly sending window. Sends are allowed on the listed days (0 =
/// Sunday .. 6 = Saturday) within the half-open span `[start, end)`,
/// same-day only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendingWindow {
    pub start_time: String,
    pub end_time: String,
    pub days: Vec<u8>,
}

impl SendingWindow {
    /// Parse and validate a window from its stored JSON form
    pub fn from_value(value: &serde_json::Value) -> Result<Self, String> {
        let window: SendingWindow = serde_json::from_value(value.clone())
            .map_err(|e| format!("malformed sending window: {}", e))?;
        window.validate()?;
        Ok(window)
    }

    /// Validate the window schema
    pub fn validate(&self) -> Result<(), String> {
        let start = parse_time(&self.start_time)
            .ok_or_else(|| format!("invalid startTime: {}", self.start_time))?;
        let end = parse_time(&self.end_time)
            .ok_or_else(|| format!("invalid endTime: {}", self.end_time))?;

        if start >= end {
            return Err("startTime must be before endTime".to_string());
        }

        if self.days.is_empty() {
            return Err("days must not be empty".to_string());
        }
        if self.days.iter().any(|d| *d > 6) {
            return Err("days must contain only integers 0-6".to_string());
        }
        let mut seen = [false; 7];
        for day in &self.days {
            if seen[*day as usize] {
                return Err("days must not contain duplicates".to_string());
            }
            seen[*day as usize] = true;
        }

        Ok(())
    }

    fn start(&self) -> NaiveTime {
        parse_time(&self.start_time).unwrap_or(NaiveTime::MIN)
    }

    fn end(&self) -> NaiveTime {
        parse_time(&self.end_time).unwrap_or(NaiveTime::MIN)
    }

    fn allows_day(&self, day: u8) -> bool {
        self.days.contains(&day)
    }

    /// Whether `now` falls on an allowed day within `[start, end)`
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let day = now.weekday().num_days_from_sunday() as u8;
        if !self.allows_day(day) {
            return false;
        }
        let time = now.time();
        time >= self.start() && time < self.end()
    }

    /// The next instant at or after `now` when the window opens. Scans
    /// forward day by day, wrapping to next week if necessary.
    pub fn next_open(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let start = self.start();

        for offset in 0..=7i64 {
            let date = now.date_naive() + Duration::days(offset);
            let day = date.weekday().num_days_from_sunday() as u8;
            if !self.allows_day(day) {
                continue;
            }
            let candidate = date.and_time(start).and_utc();
            if candidate >= now {
                return candidate;
            }
        }

        // days is validated non-empty, so the scan above always matches
        now + Duration::days(7)
    }
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    if s.len() != 5 || s.as_bytes()[2] != b':' {
        return None;
    }
    if !s[..2].bytes().all(|b| b.is_ascii_digit()) || !s[3..].bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}
