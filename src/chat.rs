use crate::constants::{API_KEY_ENV, RELAY_CHANNEL_CAPACITY};
use crate::finalizer::{PendingTurn, PersistPlan};
use crate::ingress::{parse_chat_request, parse_json_body};
use crate::projections::UpstreamProjection;
use crate::streaming::StreamHandler;
use crate::types::*;
use crate::AppState;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

/// `POST /api/chat`: relays one exchange as a plain-text streamed body.
#[tracing::instrument(
    name = "chat",
    skip_all,
    fields(model = tracing::field::Empty, outcome = tracing::field::Empty)
)]
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Response {
    let span = tracing::Span::current();
    match start_relay(state, body).await {
        Ok(response) => {
            span.record("outcome", "streaming");
            response
        }
        Err(e) => {
            match &e.inner {
                RelayError::InputInvalid(_) => {
                    span.record("outcome", "client_error");
                    tracing::warn!("[🖱️  -> ⚙️ ] Rejected chat request: {}", e.inner);
                }
                RelayError::UpstreamRejected(status, _) => {
                    span.record("outcome", "upstream_rejected");
                    tracing::warn!("[☁️  -> 🖥️ ] Passing through upstream status {}", status);
                }
                _ => {
                    span.record("outcome", "internal_error");
                    tracing::error!("Chat request failed: {}", e);
                }
            }
            e.into_response()
        }
    }
}

async fn start_relay(state: Arc<AppState>, body: Bytes) -> Result<Response> {
    let upstream = match &state.upstream {
        Some(u) => u,
        None => {
            return Err(RelayError::ConfigurationMissing(format!(
                "{} is not configured",
                API_KEY_ENV
            ))
            .into())
        }
    };

    let request = parse_chat_request(&parse_json_body(&body)?)?;
    let model = state.models.select(&request.turns).to_string();
    tracing::Span::current().record("model", model.as_str());
    tracing::info!(
        "[🖱️  -> ⚙️ ] {} turns | conversation: {} | user: {}",
        request.turns.len(),
        request
            .conversation_id
            .as_ref()
            .map(|c| c.short().to_string())
            .unwrap_or_else(|| "new".to_string()),
        if request.user_id.is_some() { "known" } else { "ephemeral" }
    );

    let outbound = UpstreamProjection::project(&request.turns, &model, state.args.sampling());
    let upstream_body = upstream.open_stream(&outbound).await?;

    // From here on the status is committed; failures end the body early.
    let turn = PendingTurn::new(
        state.store.clone(),
        state.metrics.clone(),
        model.clone(),
        PersistPlan::for_request(&request),
    )
    .tracked_by(state.relays.clone());
    let (tx, rx) = mpsc::channel(RELAY_CHANNEL_CAPACITY);

    let stream_span = tracing::info_span!(
        "stream",
        model = %model,
        stream_id = %uuid::Uuid::new_v4()
    );
    state.relays.spawn(
        StreamHandler::handle_stream(upstream_body, tx, turn, state.metrics.clone(), model)
            .instrument(stream_span),
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response())
}
