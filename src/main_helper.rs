use crate::constants::*;
use crate::db::ConversationStore;
use crate::metrics::MetricsAggregator;
use crate::projections::{ModelCatalog, SamplingParams};
use crate::upstream::{HttpTimeouts, UpstreamClient};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(long, default_value_t = 3000)]
    pub port: u16,
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value = "axiom.db")]
    pub database: String,
    #[arg(long, default_value = GROQ_BASE_URL)]
    pub upstream_base_url: String,
    #[arg(long, default_value = DEFAULT_TEXT_MODEL)]
    pub text_model: String,
    #[arg(long, default_value = DEFAULT_VISION_MODEL)]
    pub vision_model: String,
    #[arg(long, default_value_t = DEFAULT_MAX_TOKENS)]
    pub max_tokens: u32,
    #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
    pub temperature: f32,
    #[arg(long, default_value_t = 10)]
    pub connect_timeout_secs: u64,
    /// Longest silence tolerated between upstream body chunks.
    #[arg(long, default_value_t = 300)]
    pub idle_read_timeout_secs: u64,
    #[arg(long, default_value_t = 20 * 1024 * 1024)]
    pub max_body_size: usize,
    #[arg(long, default_value = "logs")]
    pub log_dir: String,
}

impl Args {
    pub fn http_timeouts(&self) -> HttpTimeouts {
        HttpTimeouts {
            connect: Duration::from_secs(self.connect_timeout_secs),
            idle_read: Duration::from_secs(self.idle_read_timeout_secs),
        }
    }

    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    pub fn model_catalog(&self) -> ModelCatalog {
        ModelCatalog {
            text: self.text_model.clone(),
            vision: self.vision_model.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub args: Arc<Args>,
    /// `None` when no API key was configured at startup.
    pub upstream: Option<UpstreamClient>,
    pub store: Arc<dyn ConversationStore>,
    pub metrics: Arc<MetricsAggregator>,
    pub models: ModelCatalog,
    /// Relay tasks still streaming or persisting; drained on shutdown.
    pub relays: TaskTracker,
}

impl AppState {
    pub fn new(
        args: Arc<Args>,
        http: reqwest::Client,
        api_key: Option<String>,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        let upstream = api_key
            .filter(|k| !k.is_empty())
            .map(|k| UpstreamClient::new(http, &args.upstream_base_url, k));
        let models = args.model_catalog();
        Self {
            args,
            upstream,
            store,
            metrics: Arc::new(MetricsAggregator::new()),
            models,
            relays: TaskTracker::new(),
        }
    }
}

pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/chat", post(crate::chat::chat_handler))
        .route(
            "/api/history",
            get(crate::history::list_history).delete(crate::history::delete_history),
        )
        .route("/api/history/save", post(crate::history::save_history))
        .route("/api/history/:id", get(crate::history::get_history))
        .route("/health", get(crate::health::liveness))
        .route("/readyz", get(crate::health::readiness))
        .route("/metrics", get(crate::health::metrics))
        .layer(axum::extract::DefaultBodyLimit::max(state.args.max_body_size))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(crate::logging::request_id_middleware))
        .with_state(state)
}
