use chrono::{SecondsFormat, Utc};

/// Returns the current UTC time as an RFC 3339 string with a `Z` suffix.
pub fn utc_now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
