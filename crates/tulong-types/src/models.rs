use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle states of an errand. `Available` is initial; `Completed` and
/// `Cancelled` are terminal. The wire spelling is fixed; it must match the
/// values stored in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrandStatus {
    Available,
    InProgress,
    Completed,
    Cancelled,
}

impl ErrandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(Self::Available),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal states accept no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for ErrandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Moderation states of a report. Only `Pending` is ever written by this
/// server; the rest exist for round-tripping rows touched by moderators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Reviewing,
    Resolved,
    Dismissed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Reviewing => "reviewing",
            Self::Resolved => "resolved",
            Self::Dismissed => "dismissed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "reviewing" => Some(Self::Reviewing),
            "resolved" => Some(Self::Resolved),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Errand {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub location: String,
    pub budget: f64,
    pub status: ErrandStatus,
    pub accepted_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub errand_id: Uuid,
    pub poster_id: Uuid,
    pub helper_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A payment-crediting record, not a database transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub errand_id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub amount: f64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errand_status_wire_spelling_is_fixed() {
        let all = [
            (ErrandStatus::Available, "available"),
            (ErrandStatus::InProgress, "in_progress"),
            (ErrandStatus::Completed, "completed"),
            (ErrandStatus::Cancelled, "cancelled"),
        ];
        for (status, wire) in all {
            assert_eq!(status.as_str(), wire);
            assert_eq!(ErrandStatus::parse(wire), Some(status));
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{}\"", wire)
            );
        }
        assert_eq!(ErrandStatus::parse("done"), None);
    }

    #[test]
    fn report_status_wire_spelling_is_fixed() {
        for wire in ["pending", "reviewing", "resolved", "dismissed"] {
            let status = ReportStatus::parse(wire).unwrap();
            assert_eq!(status.as_str(), wire);
        }
        assert_eq!(ReportStatus::parse("open"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(!ErrandStatus::Available.is_terminal());
        assert!(!ErrandStatus::InProgress.is_terminal());
        assert!(ErrandStatus::Completed.is_terminal());
        assert!(ErrandStatus::Cancelled.is_terminal());
    }
}
