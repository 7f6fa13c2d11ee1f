use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use tulong_db::models::{ConversationListRow, ConversationRow, MessageRow, parse_timestamp};
use tulong_types::api::{
    Claims, ConversationDetail, ConversationSummary, MessageResponse, SendMessageRequest,
};
use tulong_types::events::GatewayEvent;

use crate::auth::AppState;
use crate::errands::parse_id;
use crate::error::{ApiError, join_error};

/// All conversations the caller participates in, most recently active
/// first, each with the errand title, the other participant, and a
/// last-message preview.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let uid = claims.sub.to_string();

    let rows = tokio::task::spawn_blocking(move || db.db.list_conversations_for_user(&uid))
        .await
        .map_err(join_error)??;

    let summaries: Vec<ConversationSummary> = rows
        .into_iter()
        .map(|row| summarize_for(row, claims.sub))
        .collect();

    Ok(Json(summaries))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let cid = conversation_id.to_string();

    let row = tokio::task::spawn_blocking(move || db.db.get_conversation_enriched(&cid))
        .await
        .map_err(join_error)??
        .ok_or_else(|| ApiError::not_found("conversation not found"))?;

    let caller = claims.sub.to_string();
    if row.poster_id != caller && row.helper_id != caller {
        return Err(ApiError::forbidden("not a participant of this conversation"));
    }

    Ok(Json(ConversationDetail {
        id: parse_id(&row.id, "conversation"),
        errand_id: parse_id(&row.errand_id, "errand"),
        errand_title: row.errand_title,
        poster_id: parse_id(&row.poster_id, "poster"),
        poster_name: row.poster_name,
        helper_id: parse_id(&row.helper_id, "helper"),
        helper_name: row.helper_name,
        created_at: parse_timestamp(&row.created_at),
    }))
}

/// Full message history, ascending by creation time. Chat views call this
/// once on open, then rely on `MessageCreate` gateway events.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let cid = conversation_id.to_string();

    let (conversation, rows) = tokio::task::spawn_blocking(
        move || -> anyhow::Result<(Option<ConversationRow>, Vec<MessageRow>)> {
            let conversation = db.db.get_conversation(&cid)?;
            let rows = db.db.get_messages(&cid)?;
            Ok((conversation, rows))
        },
    )
    .await
    .map_err(join_error)??;

    let conversation =
        conversation.ok_or_else(|| ApiError::not_found("conversation not found"))?;
    require_participant(&conversation, claims.sub)?;

    let messages: Vec<MessageResponse> = rows.into_iter().map(message_row_to_response).collect();
    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }

    let message_id = Uuid::new_v4();
    let db = state.clone();
    let cid = conversation_id.to_string();
    let sender = claims.sub;

    // Insert, then re-fetch the single row so the response and the broadcast
    // carry the stored timestamp and the sender's display name.
    let row = tokio::task::spawn_blocking(move || -> Result<MessageRow, ApiError> {
        let conversation = db
            .db
            .get_conversation(&cid)?
            .ok_or_else(|| ApiError::not_found("conversation not found"))?;
        require_participant(&conversation, sender)?;

        db.db
            .insert_message(&message_id.to_string(), &cid, &sender.to_string(), &content)?;
        db.db
            .get_message(&message_id.to_string())?
            .ok_or_else(ApiError::internal)
    })
    .await
    .map_err(join_error)??;

    let response = message_row_to_response(row);

    // Push to open chat views subscribed to this conversation.
    state.dispatcher.broadcast(GatewayEvent::MessageCreate {
        id: response.id,
        conversation_id: response.conversation_id,
        sender_id: response.sender_id,
        sender_name: response.sender_name.clone(),
        content: response.content.clone(),
        created_at: response.created_at,
    });

    Ok((StatusCode::CREATED, Json(response)))
}

fn require_participant(conversation: &ConversationRow, user: Uuid) -> Result<(), ApiError> {
    let uid = user.to_string();
    if conversation.poster_id != uid && conversation.helper_id != uid {
        return Err(ApiError::forbidden("not a participant of this conversation"));
    }
    Ok(())
}

fn summarize_for(row: ConversationListRow, caller: Uuid) -> ConversationSummary {
    let caller = caller.to_string();
    // The "other" participant is whichever of poster/helper the caller isn't.
    let (other_name, other_avatar) = if row.poster_id == caller {
        (row.helper_name, row.helper_avatar)
    } else {
        (row.poster_name, row.poster_avatar)
    };

    ConversationSummary {
        id: parse_id(&row.id, "conversation"),
        errand_id: parse_id(&row.errand_id, "errand"),
        errand_title: row.errand_title,
        poster_id: parse_id(&row.poster_id, "poster"),
        helper_id: parse_id(&row.helper_id, "helper"),
        other_user_name: other_name,
        other_user_avatar: other_avatar,
        last_message: row.last_message,
        last_message_at: row.last_message_at.as_deref().map(parse_timestamp),
        updated_at: parse_timestamp(&row.updated_at),
    }
}

pub fn message_row_to_response(row: MessageRow) -> MessageResponse {
    MessageResponse {
        id: parse_id(&row.id, "message"),
        conversation_id: parse_id(&row.conversation_id, "conversation"),
        sender_id: parse_id(&row.sender_id, "sender"),
        sender_name: row.sender_name,
        content: row.content,
        created_at: parse_timestamp(&row.created_at),
    }
}
