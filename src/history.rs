//! Conversation history endpoints.
//!
//! Every lookup and mutation is scoped to the caller's `userId`; a record owned
//! by someone else is indistinguishable from a missing one.

use crate::constants::HISTORY_LIST_LIMIT;
use crate::finalizer::derive_saved_title;
use crate::ingress::{non_empty_str, parse_json_body, sanitize_turns};
use crate::types::*;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub user_id: Option<String>,
    pub id: Option<String>,
    pub delete_all: Option<String>,
}

impl HistoryQuery {
    fn user_id(&self) -> Option<UserId> {
        self.user_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(UserId::from)
    }
}

/// `GET /api/history?userId=`
pub async fn list_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ConversationSummary>>> {
    let user_id = match query.user_id() {
        Some(u) => u,
        None => return Err(RelayError::InputInvalid("UserId is required".to_string()).into()),
    };

    let summaries = state
        .store
        .list_conversations(&user_id, HISTORY_LIST_LIMIT)
        .await?;
    tracing::debug!("Listed {} conversations", summaries.len());
    Ok(Json(summaries))
}

/// `GET /api/history/:id?userId=`
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<PersistedConversation>> {
    let user_id = match query.user_id() {
        Some(u) => u,
        None => return Err(RelayError::InputInvalid("UserId is required".to_string()).into()),
    };

    match state
        .store
        .find_conversation(&ConversationId::from(id), &user_id)
        .await?
    {
        Some(conversation) => Ok(Json(conversation)),
        None => Err(RelayError::NotFound("Chat not found".to_string()).into()),
    }
}

/// `POST /api/history/save` with `{userId, messages, chatId?}`.
///
/// With `chatId` the stored turns are overwritten; otherwise a new
/// conversation is created and titled from its first user turn.
pub async fn save_history(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>> {
    let payload = parse_json_body(&body)?;
    let user_id = non_empty_str(&payload, "userId").map(UserId::from);
    let messages = payload.get("messages").and_then(Value::as_array);
    let (user_id, messages) = match (user_id, messages) {
        (Some(u), Some(m)) => (u, m),
        _ => return Err(RelayError::InputInvalid("Missing requirements".to_string()).into()),
    };

    let turns = sanitize_turns(messages);
    let now = Utc::now();
    let id = match non_empty_str(&payload, "chatId").map(ConversationId::from) {
        Some(id) => {
            let stored = turns.into_iter().map(|t| StoredTurn::stamp(t, now)).collect();
            if !state.store.replace_turns(&id, &user_id, stored).await? {
                return Err(RelayError::NotFound("Chat not found".to_string()).into());
            }
            tracing::info!("[💾] Overwrote turns of [{}...]", id.short());
            id
        }
        None => {
            let title = derive_saved_title(&turns);
            let stored = turns.into_iter().map(|t| StoredTurn::stamp(t, now)).collect();
            let id = state
                .store
                .create_conversation(NewConversation {
                    user_id: user_id.clone(),
                    title,
                    turns: stored,
                })
                .await?;
            tracing::info!("[💾] Saved new conversation [{}...]", id.short());
            id
        }
    };

    let chat = state.store.find_conversation(&id, &user_id).await?;
    Ok(Json(json!({ "success": true, "chat": chat })))
}

/// `DELETE /api/history?id=&userId=` or `?userId=&deleteAll=true`.
pub async fn delete_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>> {
    let user_id = query.user_id();
    let id = query
        .id
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(ConversationId::from);

    match (user_id, id, query.delete_all.as_deref() == Some("true")) {
        (Some(user_id), _, true) => {
            let deleted = state.store.delete_all_for_user(&user_id).await?;
            tracing::info!("[💾] Deleted {} conversations for user", deleted);
            Ok(Json(json!({
                "success": true,
                "message": "All chats deleted",
                "deleted": deleted
            })))
        }
        (Some(user_id), Some(id), false) => {
            if !state.store.delete_conversation(&id, &user_id).await? {
                return Err(RelayError::NotFound("Chat not found".to_string()).into());
            }
            tracing::info!("[💾] Deleted conversation [{}...]", id.short());
            Ok(Json(json!({ "success": true, "message": "Chat deleted" })))
        }
        _ => Err(RelayError::InputInvalid("Missing id or userId".to_string()).into()),
    }
}
