//! Database row types. These map directly to SQLite rows.
//! Distinct from tulong-types API models to keep the DB layer independent.

use chrono::{DateTime, Utc};
use tracing::warn;

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

pub struct ProfileRow {
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct ErrandRow {
    pub id: String,
    pub user_id: String,
    pub poster_name: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub location: String,
    pub budget: f64,
    pub status: String,
    pub accepted_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub errand_id: String,
    pub poster_id: String,
    pub helper_id: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Conversation list entry with both participants' profiles joined in, plus
/// a last-message preview. The caller decides which participant is "other".
pub struct ConversationListRow {
    pub id: String,
    pub errand_id: String,
    pub errand_title: String,
    pub poster_id: String,
    pub poster_name: String,
    pub poster_avatar: Option<String>,
    pub helper_id: String,
    pub helper_name: String,
    pub helper_avatar: Option<String>,
    pub last_message: Option<String>,
    pub last_message_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub created_at: String,
}

pub struct TransactionRow {
    pub id: String,
    pub user_id: String,
    pub errand_id: String,
    pub kind: String,
    pub amount: f64,
    pub description: String,
    pub created_at: String,
}

pub struct ReportRow {
    pub id: String,
    pub conversation_id: String,
    pub errand_id: String,
    pub reporter_id: String,
    pub reported_user_id: String,
    pub reason: String,
    pub description: Option<String>,
    pub status: String,
    pub created_at: String,
}

/// Parse a SQLite timestamp. Rows default to `strftime('%Y-%m-%d %H:%M:%f')`
/// (naive UTC with milliseconds); older rows may carry `datetime('now')`
/// second precision or an RFC 3339 string written by the application.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
                .map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sqlite_default_timestamps() {
        let with_millis = parse_timestamp("2026-08-30 10:15:30.123");
        assert_eq!(with_millis.timestamp_subsec_millis(), 123);

        let plain = parse_timestamp("2026-08-30 10:15:30");
        assert_eq!(plain.timestamp(), with_millis.timestamp());

        let rfc3339 = parse_timestamp("2026-08-30T10:15:30Z");
        assert_eq!(rfc3339.timestamp(), plain.timestamp());
    }

    #[test]
    fn corrupt_timestamp_falls_back_to_default() {
        assert_eq!(parse_timestamp("not-a-date"), DateTime::<Utc>::default());
    }
}
