use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ErrandStatus, ReportStatus};

// -- JWT Claims --

/// JWT claims shared across tulong-api (REST middleware) and tulong-gateway
/// (WebSocket authentication). Canonical definition lives here in
/// tulong-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub display_name: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Errands --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostErrandRequest {
    pub title: String,
    pub description: String,
    pub category: String,
    pub location: String,
    pub budget: f64,
}

#[derive(Debug, Serialize)]
pub struct ErrandResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub poster_name: String,
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

/// Target state for `POST /errands/{id}/status`. `available` is not a valid
/// target; nothing transitions back to it.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateStatusRequest {
    pub status: ErrandStatus,
}

#[derive(Debug, Serialize)]
pub struct AcceptResponse {
    pub conversation_id: Uuid,
}

// -- Conversations & Messages --

/// One entry of the conversation list, enriched with the errand title, the
/// other participant, and a last-message preview.
#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub errand_id: Uuid,
    pub errand_title: String,
    pub poster_id: Uuid,
    pub helper_id: Uuid,
    pub other_user_name: String,
    pub other_user_avatar: Option<String>,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ConversationDetail {
    pub id: Uuid,
    pub errand_id: Uuid,
    pub errand_title: String,
    pub poster_id: Uuid,
    pub poster_name: String,
    pub helper_id: Uuid,
    pub helper_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// -- Profiles --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub display_name: String,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user_id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

// -- Stats & transactions --

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub posted_errands: u64,
    pub active_errands: u64,
    pub completed_errands: u64,
    pub conversations: u64,
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub errand_id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub amount: f64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

// -- Reports --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateReportRequest {
    pub conversation_id: Uuid,
    pub reason: String,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub errand_id: Uuid,
    pub reported_user_id: Uuid,
    pub status: ReportStatus,
}

// -- Errors --

/// JSON error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
