use axiom_relay::constants::API_KEY_ENV;
use axiom_relay::db::{init_db, SqliteConversationStore};
use axiom_relay::main_helper::app_router;
use axiom_relay::upstream::build_http_client;
use axiom_relay::{AppState, Args};
use clap::Parser;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args = Arc::new(Args::parse());

    let _guard = axiom_relay::logging::init_tracing(&args.log_dir);
    axiom_relay::logging::setup_panic_hook();

    let pool = match init_db(&args.database).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    // A missing key is not fatal: chat requests fail with a configuration error.
    let api_key = match std::env::var(API_KEY_ENV) {
        Ok(k) if !k.is_empty() => Some(k),
        _ => {
            tracing::warn!(
                "{} is missing or empty; /api/chat will answer 500 until it is set",
                API_KEY_ENV
            );
            None
        }
    };

    let http = match build_http_client(args.http_timeouts()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    let store = Arc::new(SqliteConversationStore::new(pool));
    let state = Arc::new(AppState::new(args.clone(), http, api_key, store));
    let metrics = state.metrics.clone();
    let relays = state.relays.clone();
    let app = app_router(state);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!(
        "AxiomRelay listening on {} (text: {}, vision: {})",
        addr,
        args.text_model,
        args.vision_model
    );

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {}", e);
    }

    // In-flight streams keep running until their replies are persisted.
    relays.close();
    if !relays.is_empty() {
        tracing::info!("Waiting for {} in-flight relays to finish", relays.len());
    }
    relays.wait().await;

    metrics.log_summary().await;
    tracing::info!("Shut down cleanly");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
