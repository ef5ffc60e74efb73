use chrono::{DateTime, Duration, Utc};

/// Current UTC time as ISO-8601 with a trailing `Z`, truncated to whole seconds so
/// timestamps stay lexically comparable across the platform.
pub fn utcnow_iso() -> String {
    datetime_to_iso(Utc::now())
}

pub fn iso_after_seconds(seconds: i64) -> String {
    datetime_to_iso(Utc::now() + Duration::seconds(seconds))
}

pub fn datetime_to_iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub fn iso_date(dt: DateTime<Utc>) -> String {
    dt.date_naive().to_string()
}
