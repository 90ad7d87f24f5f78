use chrono::{DateTime, Duration, Utc};
use chrono_humanize::HumanTime;

/// Coarse "5 minutes ago" style label for feed timestamps.
///
/// Timestamps ahead of `now` read as "now".
pub fn format_relative(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(created_at).max(Duration::zero());
    HumanTime::from(-elapsed).to_string()
}
