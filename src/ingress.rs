use crate::types::*;
use serde_json::Value;

/// Filters a raw message list into canonical turns.
///
/// Only `role` and `content` survive. Entries with a role outside
/// user/assistant/system, an empty string, an empty part list, or content that
/// is neither text nor a list of valid parts are dropped. Order is preserved.
pub fn sanitize_turns(raw: &[Value]) -> Vec<ConversationTurn> {
    let sanitized: Vec<ConversationTurn> = raw.iter().filter_map(sanitize_turn).collect();

    let dropped = raw.len() - sanitized.len();
    if dropped > 0 {
        tracing::debug!(
            "[🖱️  -> ⚙️ ] Sanitizer dropped {} of {} messages",
            dropped,
            raw.len()
        );
    }

    sanitized
}

fn sanitize_turn(raw: &Value) -> Option<ConversationTurn> {
    let role = raw.get("role").and_then(Value::as_str).and_then(Role::from_wire)?;

    let content = match raw.get("content")? {
        Value::String(s) if !s.is_empty() => TurnContent::Text(s.clone()),
        Value::Array(parts) if !parts.is_empty() => {
            match serde_json::from_value::<Vec<ContentPart>>(Value::Array(parts.clone())) {
                Ok(parts) => TurnContent::Parts(parts),
                Err(e) => {
                    tracing::debug!("Dropping message with malformed content parts: {}", e);
                    return None;
                }
            }
        }
        _ => return None,
    };

    Some(ConversationTurn::new(role, content))
}

/// Parses a request body as JSON, reporting malformed input as a client error.
pub fn parse_json_body(body: &[u8]) -> Result<Value> {
    match serde_json::from_slice(body) {
        Ok(value) => Ok(value),
        Err(e) => {
            tracing::debug!("Rejecting unparseable body: {}", e);
            Err(RelayError::InputInvalid("Invalid JSON body".to_string()).into())
        }
    }
}

/// Reads the inbound chat body.
///
/// `messages` must be present and an array. `conversationId` (or the legacy
/// `chatId`) and `userId` are optional; empty strings count as absent.
pub fn parse_chat_request(payload: &Value) -> Result<ChatRequest> {
    let messages = match payload.get("messages").and_then(Value::as_array) {
        Some(m) => m,
        None => {
            return Err(RelayError::InputInvalid("Messages are required".to_string()).into());
        }
    };

    let conversation_id = non_empty_str(payload, "conversationId")
        .or_else(|| non_empty_str(payload, "chatId"))
        .map(ConversationId::from);
    let user_id = non_empty_str(payload, "userId").map(UserId::from);

    Ok(ChatRequest {
        turns: sanitize_turns(messages),
        conversation_id,
        user_id,
    })
}

pub(crate) fn non_empty_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}
