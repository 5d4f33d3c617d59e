//! Commits a relayed exchange to the conversation store.
//!
//! [`PendingTurn`] owns the reply accumulator for one stream. Persistence runs
//! exactly once: either through [`PendingTurn::finish`] when the relay winds
//! down, or from `Drop` if the relay task unwinds or is aborted first.

use crate::constants::{
    SAVED_TITLE_ELLIPSIS, SAVED_TITLE_MAX_CHARS, TITLE_MAX_CHARS, TITLE_PLACEHOLDER,
};
use crate::db::ConversationStore;
use crate::metrics::MetricsAggregator;
use crate::str_utils::prefix_chars;
use crate::types::*;
use chrono::Utc;
use std::sync::Arc;
use tokio_util::task::TaskTracker;

/// What the finalizer is allowed to write for one exchange.
#[derive(Debug, Clone)]
pub struct PersistPlan {
    pub user_id: UserId,
    pub conversation_id: Option<ConversationId>,
    pub turns: Vec<ConversationTurn>,
}

impl PersistPlan {
    /// `None` for ephemeral chats (no user id).
    pub fn for_request(request: &ChatRequest) -> Option<Self> {
        let user_id = request.user_id.clone()?;
        Some(Self {
            user_id,
            conversation_id: request.conversation_id.clone(),
            turns: request.turns.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    Created(ConversationId),
    Appended(ConversationId),
    Ephemeral,
    SkippedEmptyReply,
    Failed,
}

fn first_user_text(turns: &[ConversationTurn]) -> Option<&str> {
    turns
        .iter()
        .find(|t| t.role == Role::User)
        .and_then(|t| t.content.first_text())
}

/// Title for a new conversation: the first user turn's text, cut to 50 characters.
pub fn derive_title(turns: &[ConversationTurn]) -> String {
    first_user_text(turns)
        .map(|text| prefix_chars(text, TITLE_MAX_CHARS).to_string())
        .unwrap_or_else(|| TITLE_PLACEHOLDER.to_string())
}

/// Title for a chat created through the save endpoint: 30 characters, with
/// `...` appended when the text was cut.
pub fn derive_saved_title(turns: &[ConversationTurn]) -> String {
    match first_user_text(turns) {
        Some(text) => {
            let prefix = prefix_chars(text, SAVED_TITLE_MAX_CHARS);
            if prefix.len() < text.len() {
                format!("{}{}", prefix, SAVED_TITLE_ELLIPSIS)
            } else {
                prefix.to_string()
            }
        }
        None => TITLE_PLACEHOLDER.to_string(),
    }
}

/// Writes one finished exchange. Append mode stores the latest user turn and
/// the reply; create mode stores the whole sanitized history plus the reply.
pub async fn persist_exchange(
    store: &dyn ConversationStore,
    plan: PersistPlan,
    full_text: String,
) -> Result<PersistOutcome> {
    if full_text.is_empty() {
        tracing::warn!("[⚙️ ] Upstream produced no text; nothing to persist");
        return Ok(PersistOutcome::SkippedEmptyReply);
    }

    let now = Utc::now();
    let assistant = StoredTurn {
        role: Role::Assistant,
        content: TurnContent::Text(full_text),
        created_at: now,
    };

    match plan.conversation_id {
        Some(id) => {
            let mut turns = Vec::with_capacity(2);
            match plan.turns.iter().rev().find(|t| t.role == Role::User) {
                Some(user_turn) => turns.push(StoredTurn::stamp(user_turn.clone(), now)),
                None => tracing::warn!(
                    "[⚙️ ] No user turn in request for [{}...]; appending reply only",
                    id.short()
                ),
            }
            turns.push(assistant);

            store.append_turns(&id, &plan.user_id, turns).await?;
            tracing::info!("[⚙️  -> 💾] Appended exchange to [{}...]", id.short());
            Ok(PersistOutcome::Appended(id))
        }
        None => {
            let title = derive_title(&plan.turns);
            let mut turns: Vec<StoredTurn> = plan
                .turns
                .into_iter()
                .map(|t| StoredTurn::stamp(t, now))
                .collect();
            turns.push(assistant);

            let id = store
                .create_conversation(NewConversation {
                    user_id: plan.user_id,
                    title,
                    turns,
                })
                .await?;
            tracing::info!("[⚙️  -> 💾] Created conversation [{}...]", id.short());
            Ok(PersistOutcome::Created(id))
        }
    }
}

async fn run_finalizer(
    store: Arc<dyn ConversationStore>,
    metrics: Arc<MetricsAggregator>,
    model: String,
    plan: Option<PersistPlan>,
    full_text: String,
) -> PersistOutcome {
    let outcome = match plan {
        None => PersistOutcome::Ephemeral,
        Some(plan) => match persist_exchange(store.as_ref(), plan, full_text).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // The response is already committed; storage failures stay server-side.
                tracing::error!("[⚙️  -> 💾] Failed to save chat: {}", e);
                PersistOutcome::Failed
            }
        },
    };
    metrics.record_finalized(&model, &outcome).await;
    outcome
}

/// Accumulator plus persistence plan for one in-flight stream.
pub struct PendingTurn {
    store: Arc<dyn ConversationStore>,
    metrics: Arc<MetricsAggregator>,
    model: String,
    plan: Option<PersistPlan>,
    full_text: String,
    /// Where the `Drop` fallback spawns, so shutdown can wait for it.
    tracker: Option<TaskTracker>,
    armed: bool,
}

impl PendingTurn {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        metrics: Arc<MetricsAggregator>,
        model: impl Into<String>,
        plan: Option<PersistPlan>,
    ) -> Self {
        Self {
            store,
            metrics,
            model: model.into(),
            plan,
            full_text: String::new(),
            tracker: None,
            armed: true,
        }
    }

    pub fn tracked_by(mut self, tracker: TaskTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn push_delta(&mut self, delta: &str) {
        self.full_text.push_str(delta);
    }

    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    /// Runs persistence with everything accumulated so far.
    pub async fn finish(mut self) -> PersistOutcome {
        self.armed = false;
        run_finalizer(
            self.store.clone(),
            self.metrics.clone(),
            std::mem::take(&mut self.model),
            self.plan.take(),
            std::mem::take(&mut self.full_text),
        )
        .await
    }
}

impl Drop for PendingTurn {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;

        let task = run_finalizer(
            self.store.clone(),
            self.metrics.clone(),
            std::mem::take(&mut self.model),
            self.plan.take(),
            std::mem::take(&mut self.full_text),
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!("[⚙️ ] Relay ended without finishing; persisting partial reply");
                match &self.tracker {
                    Some(tracker) => {
                        tracker.spawn_on(task, &handle);
                    }
                    None => {
                        handle.spawn(task);
                    }
                }
            }
            Err(_) => {
                tracing::error!("[⚙️ ] Relay dropped outside a runtime; exchange not persisted");
            }
        }
    }
}
