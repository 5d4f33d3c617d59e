mod common;

use axiom_relay::db::ConversationStore;
use axiom_relay::types::*;
use axum::http::StatusCode;
use chrono::Utc;
use common::*;
use serde_json::json;
use std::time::Duration;

async fn offline_app() -> TestApp {
    // History routes never reach the provider.
    TestApp::new("http://127.0.0.1:9", None).await
}

async fn seed(app: &TestApp, user: &str, title: &str) -> ConversationId {
    app.store
        .create_conversation(NewConversation {
            user_id: UserId::from(user),
            title: title.to_string(),
            turns: vec![StoredTurn::stamp(
                ConversationTurn::text(Role::User, title),
                Utc::now(),
            )],
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_list_requires_user_and_orders_newest_first() {
    let app = offline_app().await;

    let (status, body) = app.get("/api/history").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["error"], "UserId is required");

    let older = seed(&app, "alice", "older").await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    seed(&app, "alice", "newer").await;
    seed(&app, "bob", "not alice's").await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    // Touching the older record moves it to the top.
    app.store
        .append_turns(
            &older,
            &UserId::from("alice"),
            vec![StoredTurn::stamp(
                ConversationTurn::text(Role::Assistant, "bump"),
                Utc::now(),
            )],
        )
        .await
        .unwrap();

    let (status, body) = app.get("/api/history?userId=alice").await;
    assert_eq!(status, StatusCode::OK);
    let list = json(&body);
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["title"], "older");
    assert_eq!(list[1]["title"], "newer");
    assert!(list[0].get("updatedAt").is_some());
    assert!(list[0].get("turns").is_none());
}

#[tokio::test]
async fn test_get_is_scoped_to_owner() {
    let app = offline_app().await;
    let id = seed(&app, "alice", "private").await;

    let (status, body) = app
        .get(&format!("/api/history/{}?userId=alice", id))
        .await;
    assert_eq!(status, StatusCode::OK);
    let record = json(&body);
    assert_eq!(record["title"], "private");
    assert_eq!(record["turns"][0]["role"], "user");

    let (status, _) = app.get(&format!("/api/history/{}?userId=bob", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_save_creates_then_overwrites() {
    let app = offline_app().await;

    let (status, body) = app
        .post_json("/api/history/save", json!({"messages": []}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["error"], "Missing requirements");

    let (status, body) = app
        .post_json(
            "/api/history/save",
            json!({
                "userId": "carol",
                "messages": [
                    {"role": "user", "content": "Recipe ideas for dinner"},
                    {"role": "assistant", "content": "Try a risotto."}
                ]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let saved = json(&body);
    assert_eq!(saved["success"], true);
    assert_eq!(saved["chat"]["title"], "Recipe ideas for dinner");
    assert_eq!(saved["chat"]["turns"].as_array().unwrap().len(), 2);
    let id = saved["chat"]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .post_json(
            "/api/history/save",
            json!({
                "userId": "carol",
                "chatId": id,
                "messages": [{"role": "user", "content": "Only this remains"}]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let saved = json(&body);
    assert_eq!(saved["chat"]["title"], "Recipe ideas for dinner");
    assert_eq!(saved["chat"]["turns"].as_array().unwrap().len(), 1);

    let (status, _) = app
        .post_json(
            "/api/history/save",
            json!({"userId": "mallory", "chatId": id, "messages": []}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_save_titles_long_chats_with_ellipsis() {
    let app = offline_app().await;

    let (status, body) = app
        .post_json(
            "/api/history/save",
            json!({
                "userId": "carol",
                "messages": [{"role": "user", "content": "Recipe ideas for a dinner party of eight"}]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["chat"]["title"], "Recipe ideas for a dinner part...");

    let (status, body) = app
        .request(
            axum::http::Request::builder()
                .method("POST")
                .uri("/api/history/save")
                .body(axum::body::Body::from("{not json"))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["code"], "INPUT_INVALID");
}

#[tokio::test]
async fn test_delete_single_and_all() {
    let app = offline_app().await;
    let first = seed(&app, "dave", "one").await;
    seed(&app, "dave", "two").await;
    seed(&app, "dave", "three").await;

    let (status, body) = app.delete("/api/history").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["error"], "Missing id or userId");

    let (status, _) = app
        .delete(&format!("/api/history?id={}&userId=eve", first))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .delete(&format!("/api/history?id={}&userId=dave", first))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["message"], "Chat deleted");

    let (status, body) = app
        .delete("/api/history?userId=dave&deleteAll=true")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["deleted"], 2);

    let (_, body) = app.get("/api/history?userId=dave").await;
    assert!(json(&body).as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_health_endpoints() {
    let app = offline_app().await;

    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["status"], "ok");

    // No API key configured, so the relay is not ready.
    let (status, body) = app.get("/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let readiness = json(&body);
    assert_eq!(readiness["database"], "ok");
    assert_eq!(readiness["upstream"], "unconfigured");

    let (status, body) = app.get("/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json(&body).as_object().unwrap().is_empty());
}
