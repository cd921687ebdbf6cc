//! Cohort-date normalisation and best-effort ISO-8601 timestamp parsing.
//!
//! Unlike a monotonic microsecond counter, cohorts and WAL records need
//! textual, timezone-aware instants: a cohort is literally a calendar
//! date string used as a directory name, and WAL records round-trip
//! through JSON as ISO-8601 strings. `chrono::DateTime<Utc>` is the
//! instant type used throughout this crate for that reason.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// A timezone-aware instant, normalised to UTC.
pub type Instant = DateTime<Utc>;

/// The current instant.
pub fn now() -> Instant {
    Utc::now()
}

/// Serialise an instant to an ISO-8601 string suitable for a WAL record
/// or JSON payload field.
pub fn serialize_timestamp(instant: Instant) -> String {
    instant.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Something that can be turned into a cohort directory name
/// (`YYYY-MM-DD`): a date, an instant, or an ISO-8601 string.
pub trait CohortSource {
    /// Normalise `self` into a `YYYY-MM-DD` cohort string.
    fn to_cohort_string(&self) -> String;
}

impl CohortSource for NaiveDate {
    fn to_cohort_string(&self) -> String {
        self.format("%Y-%m-%d").to_string()
    }
}

impl CohortSource for Instant {
    fn to_cohort_string(&self) -> String {
        self.date_naive().to_cohort_string()
    }
}

impl CohortSource for str {
    fn to_cohort_string(&self) -> String {
        // A date-time string carries its date before the `T`; split it
        // off rather than routing the whole string through datetime
        // parsing.
        let date_part = self.split('T').next().unwrap_or(self);
        match NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
            Ok(date) => date.to_cohort_string(),
            Err(_) => date_part.to_string(),
        }
    }
}

impl CohortSource for String {
    fn to_cohort_string(&self) -> String {
        self.as_str().to_cohort_string()
    }
}

/// Normalise a date, instant, or ISO-8601 string into a `YYYY-MM-DD`
/// cohort identifier.
pub fn normalize_cohort(source: impl CohortSource) -> String {
    source.to_cohort_string()
}

/// Parse an ISO-8601 timestamp string into a UTC instant.
///
/// Returns `None` (logging a warning) rather than propagating an error —
/// per the spec, an unparsable timestamp must never abort a write or a
/// WAL replay. A trailing `Z` is translated to `+00:00`; a naive
/// (offset-less) datetime is assumed to already be UTC; a date-only
/// string is treated as midnight UTC.
pub fn parse_timestamp(input: &str) -> Option<Instant> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let normalized = if let Some(stripped) = trimmed.strip_suffix(['Z', 'z']) {
        format!("{stripped}+00:00")
    } else {
        trimmed.to_string()
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(&normalized, "%Y-%m-%d") {
        let midnight = date.and_hms_opt(0, 0, 0)?;
        return Some(Utc.from_utc_datetime(&midnight));
    }

    tracing::warn!(value = %input, "unparsable timestamp, treating as absent");
    None
}
