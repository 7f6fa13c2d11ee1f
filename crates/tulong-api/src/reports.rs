use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;
use uuid::Uuid;

use tulong_types::api::{Claims, CreateReportRequest, ReportResponse};
use tulong_types::models::ReportStatus;

use crate::auth::AppState;
use crate::errands::parse_id;
use crate::error::{ApiError, join_error};

/// File a report against the other participant of a conversation. The
/// reported user is derived server-side, never taken from the request.
pub async fn create_report(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateReportRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let reason = req.reason.trim().to_string();
    if reason.is_empty() {
        return Err(ApiError::bad_request("reason must not be empty"));
    }
    let description = req
        .description
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string);

    let report_id = Uuid::new_v4();
    let db = state.clone();
    let reporter = claims.sub;

    let row = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let conversation = db
            .db
            .get_conversation(&req.conversation_id.to_string())?
            .ok_or_else(|| ApiError::not_found("conversation not found"))?;

        let reporter_id = reporter.to_string();
        let reported = if conversation.poster_id == reporter_id {
            conversation.helper_id.clone()
        } else if conversation.helper_id == reporter_id {
            conversation.poster_id.clone()
        } else {
            return Err(ApiError::forbidden("not a participant of this conversation"));
        };

        db.db.insert_report(
            &report_id.to_string(),
            &conversation.id,
            &conversation.errand_id,
            &reporter_id,
            &reported,
            &reason,
            description.as_deref(),
        )?;
        db.db
            .get_report(&report_id.to_string())?
            .ok_or_else(ApiError::internal)
    })
    .await
    .map_err(join_error)??;

    info!(report = %report_id, reporter = %reporter, "report filed");

    let status = ReportStatus::parse(&row.status)
        .ok_or_else(ApiError::internal)?;

    Ok((
        StatusCode::CREATED,
        Json(ReportResponse {
            id: parse_id(&row.id, "report"),
            conversation_id: parse_id(&row.conversation_id, "conversation"),
            errand_id: parse_id(&row.errand_id, "errand"),
            reported_user_id: parse_id(&row.reported_user_id, "reported user"),
            status,
        }),
    ))
}
