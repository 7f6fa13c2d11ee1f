use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use tulong_db::models::{ErrandRow, parse_timestamp};
use tulong_types::api::{
    AcceptResponse, Claims, ErrandResponse, PostErrandRequest, UpdateStatusRequest,
};
use tulong_types::events::GatewayEvent;
use tulong_types::models::ErrandStatus;

use crate::auth::AppState;
use crate::conversations::message_row_to_response;
use crate::error::{ApiError, join_error};

#[derive(Debug, Deserialize)]
pub struct ErrandQuery {
    pub status: Option<ErrandStatus>,
    pub search: Option<String>,
}

pub async fn list_errands(
    State(state): State<AppState>,
    Query(query): Query<ErrandQuery>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let status = query.status.map(|s| s.as_str().to_string());
    let search = query.search.filter(|s| !s.trim().is_empty());

    let rows = tokio::task::spawn_blocking(move || {
        db.db.list_errands(status.as_deref(), search.as_deref())
    })
    .await
    .map_err(join_error)??;

    let errands: Vec<ErrandResponse> = rows.into_iter().map(errand_row_to_response).collect();
    Ok(Json(errands))
}

pub async fn post_errand(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<PostErrandRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Reject before any remote call
    for (field, value) in [
        ("title", &req.title),
        ("description", &req.description),
        ("category", &req.category),
        ("location", &req.location),
    ] {
        if value.trim().is_empty() {
            return Err(ApiError::bad_request(format!("{} is required", field)));
        }
    }
    if !req.budget.is_finite() || req.budget <= 0.0 {
        return Err(ApiError::bad_request("budget must be a positive amount"));
    }

    let errand_id = Uuid::new_v4();
    let db = state.clone();
    let uid = claims.sub.to_string();
    let display_name = claims.display_name.clone();
    let eid = errand_id.to_string();

    let row = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<ErrandRow>> {
        // Posting is a write-triggering action: make sure the profile exists.
        db.db.ensure_profile(&uid, &display_name)?;
        db.db.insert_errand(
            &eid,
            &uid,
            req.title.trim(),
            req.description.trim(),
            req.category.trim(),
            req.location.trim(),
            req.budget,
        )?;
        db.db.get_errand(&eid)
    })
    .await
    .map_err(join_error)??
    .ok_or_else(ApiError::internal)?;

    Ok((StatusCode::CREATED, Json(errand_row_to_response(row))))
}

pub async fn get_errand(
    State(state): State<AppState>,
    Path(errand_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let eid = errand_id.to_string();

    let row = tokio::task::spawn_blocking(move || db.db.get_errand(&eid))
        .await
        .map_err(join_error)??
        .ok_or_else(|| ApiError::not_found("errand not found"))?;

    Ok(Json(errand_row_to_response(row)))
}

/// Accept an errand. On success the caller navigates to the returned
/// conversation; when the conversation is newly created, the helper's
/// introductory message is broadcast to subscribed chat views.
pub async fn accept_errand(
    State(state): State<AppState>,
    Path(errand_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let actor = claims.sub;
    let actor_name = claims.display_name.clone();

    let outcome = tokio::task::spawn_blocking(move || {
        tulong_lifecycle::accept(&db.db, errand_id, actor, &actor_name)
    })
    .await
    .map_err(join_error)??;

    if let Some(intro) = outcome.intro_message {
        let response = message_row_to_response(intro);
        state.dispatcher.broadcast(GatewayEvent::MessageCreate {
            id: response.id,
            conversation_id: response.conversation_id,
            sender_id: response.sender_id,
            sender_name: response.sender_name,
            content: response.content,
            created_at: response.created_at,
        });
    }

    Ok(Json(AcceptResponse {
        conversation_id: outcome.conversation_id,
    }))
}

/// Drive the remaining transitions: mark in progress, complete, cancel.
/// Returns the refreshed errand so the caller can replace its snapshot.
pub async fn update_status(
    State(state): State<AppState>,
    Path(errand_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let actor = claims.sub;

    let row = tokio::task::spawn_blocking(move || -> Result<Option<ErrandRow>, ApiError> {
        match req.status {
            ErrandStatus::Available => {
                return Err(ApiError::bad_request(
                    "an errand cannot go back to available",
                ));
            }
            ErrandStatus::InProgress => {
                tulong_lifecycle::mark_in_progress(&db.db, errand_id, actor)?
            }
            ErrandStatus::Completed => tulong_lifecycle::complete(&db.db, errand_id, actor)?,
            ErrandStatus::Cancelled => tulong_lifecycle::cancel(&db.db, errand_id, actor)?,
        }
        db.db.get_errand(&errand_id.to_string()).map_err(ApiError::from)
    })
    .await
    .map_err(join_error)??
    .ok_or_else(|| ApiError::not_found("errand not found"))?;

    Ok(Json(errand_row_to_response(row)))
}

pub fn errand_row_to_response(row: ErrandRow) -> ErrandResponse {
    ErrandResponse {
        id: parse_id(&row.id, "errand"),
        user_id: parse_id(&row.user_id, "errand poster"),
        poster_name: row.poster_name,
        title: row.title,
        description: row.description,
        category: row.category,
        location: row.location,
        budget: row.budget,
        status: ErrandStatus::parse(&row.status).unwrap_or_else(|| {
            warn!("Corrupt errand status '{}' on '{}'", row.status, row.id);
            ErrandStatus::Cancelled
        }),
        accepted_by: row.accepted_by.as_deref().map(|id| parse_id(id, "helper")),
        created_at: parse_timestamp(&row.created_at),
        updated_at: parse_timestamp(&row.updated_at),
    }
}

pub(crate) fn parse_id(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} id '{}': {}", what, raw, e);
        Uuid::default()
    })
}
