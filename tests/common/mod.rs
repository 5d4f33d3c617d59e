#![allow(dead_code)]

use async_trait::async_trait;
use axiom_relay::db::{init_db, ConversationStore, SqliteConversationStore};
use axiom_relay::main_helper::app_router;
use axiom_relay::upstream::build_http_client;
use axiom_relay::*;
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use clap::Parser;
use futures_util::StreamExt;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tower::util::ServiceExt;

/// What the fake provider does with every request.
#[derive(Clone)]
pub enum UpstreamBehavior {
    /// Streams these deltas as SSE frames, cut into `chunk_size`-byte pieces.
    Stream {
        deltas: Vec<String>,
        chunk_size: usize,
    },
    /// Streams the first `cut_after` deltas, then fails the body without a
    /// terminator.
    Truncate {
        deltas: Vec<String>,
        cut_after: usize,
    },
    Reject(StatusCode, String),
}

#[derive(Clone)]
struct FakeUpstreamState {
    behavior: UpstreamBehavior,
    requests: Arc<AtomicUsize>,
    last_body: Arc<Mutex<Option<Value>>>,
}

pub struct FakeUpstream {
    pub base_url: String,
    pub requests: Arc<AtomicUsize>,
    pub last_body: Arc<Mutex<Option<Value>>>,
}

impl FakeUpstream {
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn last_body(&self) -> Value {
        self.last_body
            .lock()
            .unwrap()
            .clone()
            .expect("upstream was never called")
    }
}

pub fn sse_body(deltas: &[String]) -> String {
    let mut body = sse_deltas(deltas);
    body.push_str("data: {\"id\":\"chatcmpl-1\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n");
    body.push_str("data: [DONE]\n\n");
    body
}

/// Opening frames plus one frame per delta, without the closing frames.
pub fn sse_deltas(deltas: &[String]) -> String {
    let mut body = String::from(": keep-alive\n\n");
    body.push_str("data: {\"id\":\"chatcmpl-1\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n");
    for delta in deltas {
        let frame = serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": {"content": delta}, "finish_reason": null}]
        });
        body.push_str(&format!("data: {}\n\n", frame));
    }
    body
}

async fn fake_completions(
    State(state): State<FakeUpstreamState>,
    Json(payload): Json<Value>,
) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    *state.last_body.lock().unwrap() = Some(payload);

    match state.behavior {
        UpstreamBehavior::Reject(status, body) => (status, body).into_response(),
        UpstreamBehavior::Stream { deltas, chunk_size } => {
            let bytes = sse_body(&deltas).into_bytes();
            let chunks: Vec<std::result::Result<Vec<u8>, Infallible>> =
                bytes.chunks(chunk_size).map(|c| Ok(c.to_vec())).collect();
            (
                [("content-type", "text/event-stream")],
                Body::from_stream(futures_util::stream::iter(chunks)),
            )
                .into_response()
        }
        UpstreamBehavior::Truncate { deltas, cut_after } => {
            let kept = &deltas[..cut_after.min(deltas.len())];
            let head: Vec<std::result::Result<Vec<u8>, std::io::Error>> =
                vec![Ok(sse_deltas(kept).into_bytes())];
            let cut = futures_util::stream::once(async {
                // Let the head reach the relay before the connection breaks.
                tokio::time::sleep(Duration::from_millis(100)).await;
                Err::<Vec<u8>, _>(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "provider went away",
                ))
            });
            (
                [("content-type", "text/event-stream")],
                Body::from_stream(futures_util::stream::iter(head).chain(cut)),
            )
                .into_response()
        }
    }
}

/// Starts an OpenAI-compatible provider stand-in on an ephemeral port.
pub async fn spawn_upstream(behavior: UpstreamBehavior) -> FakeUpstream {
    let state = FakeUpstreamState {
        behavior,
        requests: Arc::new(AtomicUsize::new(0)),
        last_body: Arc::new(Mutex::new(None)),
    };
    let requests = state.requests.clone();
    let last_body = state.last_body.clone();

    let app = Router::new()
        .route("/chat/completions", post(fake_completions))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeUpstream {
        base_url: format!("http://{}", addr),
        requests,
        last_body,
    }
}

/// SQLite store that counts every mutation it is asked to perform.
pub struct RecordingStore {
    inner: SqliteConversationStore,
    mutations: AtomicUsize,
}

impl RecordingStore {
    pub fn new(inner: SqliteConversationStore) -> Self {
        Self {
            inner,
            mutations: AtomicUsize::new(0),
        }
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversationStore for RecordingStore {
    async fn create_conversation(&self, new: NewConversation) -> Result<ConversationId> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.inner.create_conversation(new).await
    }

    async fn append_turns(
        &self,
        id: &ConversationId,
        user_id: &UserId,
        turns: Vec<StoredTurn>,
    ) -> Result<()> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.inner.append_turns(id, user_id, turns).await
    }

    async fn find_conversation(
        &self,
        id: &ConversationId,
        user_id: &UserId,
    ) -> Result<Option<PersistedConversation>> {
        self.inner.find_conversation(id, user_id).await
    }

    async fn list_conversations(
        &self,
        user_id: &UserId,
        limit: i64,
    ) -> Result<Vec<ConversationSummary>> {
        self.inner.list_conversations(user_id, limit).await
    }

    async fn replace_turns(
        &self,
        id: &ConversationId,
        user_id: &UserId,
        turns: Vec<StoredTurn>,
    ) -> Result<bool> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.inner.replace_turns(id, user_id, turns).await
    }

    async fn delete_conversation(&self, id: &ConversationId, user_id: &UserId) -> Result<bool> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_conversation(id, user_id).await
    }

    async fn delete_all_for_user(&self, user_id: &UserId) -> Result<u64> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_all_for_user(user_id).await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}

pub struct TestApp {
    pub state: Arc<AppState>,
    pub store: Arc<RecordingStore>,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new(upstream_base_url: &str, api_key: Option<&str>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_db(dir.path().join("relay_test.db")).await.unwrap();
        let store = Arc::new(RecordingStore::new(SqliteConversationStore::new(pool)));

        let args = Arc::new(Args::parse_from([
            "axiom-relay",
            "--upstream-base-url",
            upstream_base_url,
            "--connect-timeout-secs",
            "2",
            "--idle-read-timeout-secs",
            "5",
        ]));
        let http = build_http_client(args.http_timeouts()).unwrap();
        let state = Arc::new(AppState::new(
            args,
            http,
            api_key.map(str::to_string),
            store.clone(),
        ));

        Self {
            state,
            store,
            _dir: dir,
        }
    }

    /// Sends a request and hands back the response with its body unread.
    pub async fn send(&self, req: Request<Body>) -> Response {
        app_router(self.state.clone()).oneshot(req).await.unwrap()
    }

    pub async fn request(&self, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.send(req).await;
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    pub async fn post_json(&self, uri: &str, payload: Value) -> (StatusCode, Vec<u8>) {
        self.request(json_request(uri, payload)).await
    }

    /// Waits for every relay task, including its persistence, to wind down.
    pub async fn drain_relays(&self) {
        self.state.relays.close();
        tokio::time::timeout(Duration::from_secs(5), self.state.relays.wait())
            .await
            .expect("relays did not finish");
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Vec<u8>) {
        self.request(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Vec<u8>) {
        self.request(
            Request::builder()
                .method("DELETE")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// The client body ends before persistence runs; wait for the finalizer.
    pub async fn wait_for_finalized(&self, expected: u64) {
        for _ in 0..500 {
            if self.state.metrics.total_finalized().await >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("finalizer did not run {} times", expected);
    }
}

pub fn json_request(uri: &str, payload: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

pub fn json(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}
