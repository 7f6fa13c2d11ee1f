use axum::{
    Extension, Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, header},
    response::IntoResponse,
};

use tulong_db::models::{TransactionRow, parse_timestamp};
use tulong_types::api::{
    Claims, ProfileResponse, StatsResponse, TransactionResponse, UpdateProfileRequest,
};

use crate::auth::AppState;
use crate::errands::parse_id;
use crate::error::{ApiError, join_error};

const MAX_AVATAR_BYTES: usize = 2 * 1024 * 1024;

pub async fn get_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let uid = claims.sub.to_string();
    let fallback = claims.display_name.clone();

    let (display_name, avatar_url) = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        db.db.ensure_profile(&uid, &fallback)?;
        db.db.get_profile(&uid)
    })
    .await
    .map_err(join_error)??
    .ok_or_else(ApiError::internal)?;

    Ok(Json(ProfileResponse {
        user_id: claims.sub,
        display_name,
        avatar_url,
    }))
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let display_name = req.display_name.trim().to_string();
    if display_name.is_empty() || display_name.len() > 64 {
        return Err(ApiError::bad_request("display name must be 1-64 characters"));
    }

    let db = state.clone();
    let uid = claims.sub.to_string();
    let name = display_name.clone();

    let (display_name, avatar_url) = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        db.db.ensure_profile(&uid, &name)?;
        db.db.update_display_name(&uid, &name)?;
        db.db.get_profile(&uid)
    })
    .await
    .map_err(join_error)??
    .ok_or_else(ApiError::internal)?;

    Ok(Json(ProfileResponse {
        user_id: claims.sub,
        display_name,
        avatar_url,
    }))
}

/// Raw image body keyed by the caller's user id; the stored public path
/// replaces whatever the profile pointed at before.
pub async fn upload_avatar(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    if body.is_empty() {
        return Err(ApiError::bad_request("avatar body must not be empty"));
    }
    if body.len() > MAX_AVATAR_BYTES {
        return Err(ApiError::bad_request("avatar larger than 2 MiB"));
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let ext = match content_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        _ => {
            return Err(ApiError::bad_request(
                "avatar must be image/png, image/jpeg or image/webp",
            ));
        }
    };

    let filename = state.avatars.save(claims.sub, ext, &body).await?;
    let public_url = format!("/avatars/{filename}");

    let db = state.clone();
    let uid = claims.sub.to_string();
    let fallback = claims.display_name.clone();
    let url = public_url.clone();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        db.db.ensure_profile(&uid, &fallback)?;
        db.db.update_avatar_url(&uid, &url)?;
        Ok(())
    })
    .await
    .map_err(join_error)??;

    Ok(Json(ProfileResponse {
        user_id: claims.sub,
        display_name: claims.display_name,
        avatar_url: Some(public_url),
    }))
}

/// Counters for the caller's home screen.
pub async fn get_stats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let uid = claims.sub.to_string();

    let (posted, active, completed, conversations) =
        tokio::task::spawn_blocking(move || db.db.stats_for_user(&uid))
            .await
            .map_err(join_error)??;

    Ok(Json(StatsResponse {
        posted_errands: posted,
        active_errands: active,
        completed_errands: completed,
        conversations,
    }))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let uid = claims.sub.to_string();

    let rows = tokio::task::spawn_blocking(move || db.db.list_transactions_for_user(&uid))
        .await
        .map_err(join_error)??;

    let transactions: Vec<TransactionResponse> =
        rows.into_iter().map(transaction_row_to_response).collect();
    Ok(Json(transactions))
}

fn transaction_row_to_response(row: TransactionRow) -> TransactionResponse {
    TransactionResponse {
        id: parse_id(&row.id, "transaction"),
        errand_id: parse_id(&row.errand_id, "errand"),
        kind: row.kind,
        amount: row.amount,
        description: row.description,
        created_at: parse_timestamp(&row.created_at),
    }
}
