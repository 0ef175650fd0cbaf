//! Fixed-span time windows for the outbox backfill.

use crate::error::{Error, Result};
use chrono::NaiveDate;
use nostr::Timestamp;
use std::time::Duration;

/// Date format accepted for the import start date.
pub const START_DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a calendar date (`YYYY-MM-DD`) as UTC midnight.
pub fn parse_start_date(input: &str) -> Result<Timestamp> {
    let input = input.trim();
    let date = NaiveDate::parse_from_str(input, START_DATE_FORMAT).map_err(|e| {
        Error::InvalidDate {
            input: input.to_string(),
            reason: e.to_string(),
        }
    })?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| Error::InvalidDate {
            input: input.to_string(),
            reason: "no midnight on this date".to_string(),
        })?
        .and_utc()
        .timestamp();
    let secs = u64::try_from(midnight).map_err(|_| Error::InvalidDate {
        input: input.to_string(),
        reason: "dates before 1970-01-01 are not supported".to_string(),
    })?;
    Ok(Timestamp::from(secs))
}

/// A `[since, until)` window of fixed span.
///
/// Consecutive windows share their boundary instant and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    since: u64,
    until: u64,
    span: u64,
}

impl TimeWindow {
    /// First window starting at `since`.
    pub fn starting_at(since: Timestamp, span: Duration) -> Result<Self> {
        let span = span.as_secs();
        if span == 0 {
            return Err(Error::InvalidWindow(
                "window span must be at least one second".to_string(),
            ));
        }
        let since = since.as_u64();
        let until = since
            .checked_add(span)
            .ok_or_else(|| Error::InvalidWindow("window end overflows".to_string()))?;
        Ok(Self { since, until, span })
    }

    pub fn since(&self) -> Timestamp {
        Timestamp::from(self.since)
    }

    pub fn until(&self) -> Timestamp {
        Timestamp::from(self.until)
    }

    pub fn span(&self) -> Duration {
        Duration::from_secs(self.span)
    }

    /// Move both bounds forward by one span.
    pub fn advance(&mut self) {
        self.since = self.until;
        self.until = self.until.saturating_add(self.span);
    }

    /// Whether the window has started at or after `now`.
    pub fn starts_at_or_after(&self, now: Timestamp) -> bool {
        self.since >= now.as_u64()
    }
}

/// Number of windows a backfill from `start` processes when it stops at `now`.
///
/// The loop checks for termination after advancing, so a start at or after
/// `now` still processes one window; otherwise the count is
/// `ceil((now - start) / span)`.
pub fn window_count(start: Timestamp, now: Timestamp, span: Duration) -> u64 {
    let span = span.as_secs().max(1);
    let (start, now) = (start.as_u64(), now.as_u64());
    if start >= now {
        return 1;
    }
    (now - start).div_ceil(span)
}
