use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use palaver::api::{HealthResponse, HistoryResponse};
use palaver::{AppState, create_router};
use chrono::{DateTime, Utc};
use palaver_core::{
    CompleterBuilder, Conversation, ConversationId, MemoryStore, NewTurn, Part,
    Role, StoreError, TextEdit, Turn, TurnId, TurnStore,
};
use palaver_model::{ModelPart, ModelRole};
use palaver_test_model::{
    PresetEvent, PresetResponse, TestModelProvider, TestModelStats,
};
use serde_json::{Value, json};
use tower::ServiceExt;

// =============================================================================
// Helpers
// =============================================================================

struct TestApp {
    router: axum::Router,
    conversation: Conversation,
    stats: TestModelStats,
}

fn make_app(provider: TestModelProvider) -> TestApp {
    make_app_with_store(provider, Arc::new(MemoryStore::new()))
}

fn make_app_with_store(
    provider: TestModelProvider,
    store: Arc<dyn TurnStore>,
) -> TestApp {
    let stats = provider.stats();
    let conversation = Conversation::new(store, ConversationId::new("test"));
    let completer = CompleterBuilder::with_model_provider(provider)
        .with_system_instruction("Be brief.")
        .build();
    let router = create_router(AppState::new(conversation.clone(), completer));
    TestApp {
        router,
        conversation,
        stats,
    }
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &TestApp, req: Request<Body>) -> Response {
    app.router.clone().oneshot(req).await.unwrap()
}

async fn body_json(resp: Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(resp: Response) -> String {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn seed(app: &TestApp, user: &str, model: &str) {
    app.conversation
        .commit(NewTurn::user(Some(user), &[]), NewTurn::model_text(model))
        .await
        .unwrap();
}

/// A store whose every operation fails.
struct BrokenStore;

#[async_trait]
impl TurnStore for BrokenStore {
    async fn scan(
        &self,
        _conversation: &ConversationId,
    ) -> Result<Vec<Turn>, StoreError> {
        Err(StoreError::backend("disk on fire"))
    }

    async fn insert_many(
        &self,
        _conversation: &ConversationId,
        _turns: Vec<(NewTurn, DateTime<Utc>)>,
    ) -> Result<Vec<TurnId>, StoreError> {
        Err(StoreError::backend("disk on fire"))
    }

    async fn update_first_text(
        &self,
        _conversation: &ConversationId,
        _id: &TurnId,
        _text: &str,
    ) -> Result<TextEdit, StoreError> {
        Err(StoreError::backend("disk on fire"))
    }

    async fn delete_all(
        &self,
        _conversation: &ConversationId,
    ) -> Result<u64, StoreError> {
        Err(StoreError::backend("disk on fire"))
    }
}

// =============================================================================
// POST /api/chat
// =============================================================================

#[tokio::test]
async fn test_chat_streams_reply() {
    let app = make_app(TestModelProvider::always(PresetResponse::with_deltas([
        "Hello", ", ", "there!",
    ])));
    seed(&app, "Hi", "Hey").await;

    let resp = send(&app, post_json("/api/chat", json!({ "message": "Again" }))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    assert_eq!(body_text(resp).await, "Hello, there!");

    let requests = app.stats.requests();
    assert_eq!(requests.len(), 1);
    let req = &requests[0];
    assert_eq!(req.system_instruction.as_deref(), Some("Be brief."));
    assert_eq!(req.contents.len(), 3);
    assert_eq!(req.contents[2].role, ModelRole::User);
    assert_eq!(req.contents[2].parts, vec![ModelPart::Text("Again".to_owned())]);

    // The reply is persisted by the client, not by the stream.
    assert_eq!(app.conversation.history().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_chat_with_attachments() {
    let app = make_app(TestModelProvider::always(PresetResponse::with_deltas([
        "A cat",
    ])));
    let body = json!({
        "attachedFiles": [
            { "fileData": "data:image/png;base64,iVBORw0KGgo=", "fileType": "image/png", "fileName": "cat.png" },
            { "fileData": "garbage", "fileType": "image/png", "fileName": "broken.png" },
            { "fileData": "data:;base64,JVBERi0=", "fileType": "application/pdf", "fileName": "a.pdf" }
        ]
    });
    let resp = send(&app, post_json("/api/chat", body)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "A cat");

    let parts = &app.stats.requests()[0].contents[0].parts;
    assert_eq!(parts.len(), 2);
    assert!(matches!(
        &parts[0],
        ModelPart::Binary { mime_type, data } if mime_type == "image/png" && data.starts_with(b"\x89PNG")
    ));
    assert!(matches!(
        &parts[1],
        ModelPart::Binary { mime_type, .. } if mime_type == "application/pdf"
    ));
}

#[tokio::test]
async fn test_chat_rejects_empty_turn() {
    let app = make_app(TestModelProvider::always(PresetResponse::with_deltas(["x"])));

    for body in [
        json!({}),
        json!({ "message": "" }),
        json!({ "attachedFiles": [] }),
        json!({ "attachedFiles": [{ "fileData": "nope", "fileType": "image/png" }] }),
    ] {
        let resp = send(&app, post_json("/api/chat", body)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(resp).await["error"].is_string());
    }
    assert_eq!(app.stats.request_count(), 0);
}

#[tokio::test]
async fn test_chat_rejects_empty_turn_before_reading_history() {
    let app = make_app_with_store(
        TestModelProvider::always(PresetResponse::with_deltas(["x"])),
        Arc::new(BrokenStore),
    );

    let resp = send(&app, post_json("/api/chat", json!({}))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(resp).await["error"].is_string());

    let resp = send(&app, post_json("/api/chat", json!({ "message": "Hi" }))).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(app.stats.request_count(), 0);
}

#[tokio::test]
async fn test_chat_rejects_malformed_body() {
    let app = make_app(TestModelProvider::default());
    let req = Request::post("/api/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = send(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(resp).await["error"].is_string());
}

#[tokio::test]
async fn test_chat_upstream_rejection() {
    let app = make_app(TestModelProvider::always(
        PresetResponse::default().with_rejection("quota exceeded"),
    ));
    let resp = send(&app, post_json("/api/chat", json!({ "message": "Hi" }))).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(resp).await,
        json!({ "error": "Internal Server Error" })
    );
}

#[tokio::test]
async fn test_chat_mid_stream_failure_aborts_body() {
    let app = make_app(TestModelProvider::always(PresetResponse::with_events([
        PresetEvent::MessageDelta("Once upon".to_owned()),
        PresetEvent::Failure("connection reset".to_owned()),
    ])));
    let resp = send(&app, post_json("/api/chat", json!({ "message": "Story" }))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(to_bytes(resp.into_body(), usize::MAX).await.is_err());
}

#[tokio::test]
async fn test_chat_truncated_stream_aborts_body() {
    let app = make_app(TestModelProvider::always(PresetResponse::with_events([
        PresetEvent::MessageDelta("Half a sen".to_owned()),
        PresetEvent::Truncation,
    ])));
    let resp = send(&app, post_json("/api/chat", json!({ "message": "Story" }))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(to_bytes(resp.into_body(), usize::MAX).await.is_err());
}

// =============================================================================
// History, edit, clear, save-response
// =============================================================================

#[tokio::test]
async fn test_history_is_ascending() {
    let app = make_app(TestModelProvider::default());
    seed(&app, "first", "second").await;
    seed(&app, "third", "fourth").await;

    let resp = send(
        &app,
        Request::get("/api/chat/history").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let value = body_json(resp).await;
    assert_eq!(value["history"][0]["role"], "user");
    assert_eq!(value["history"][0]["parts"][0]["text"], "first");
    assert!(value["history"][0]["_id"].is_string());
    assert!(value["history"][0]["createdAt"].is_string());

    let history: HistoryResponse = serde_json::from_value(value).unwrap();
    let texts: Vec<_> = history
        .history
        .iter()
        .map(|t| t.parts[0].as_text().unwrap_or_default().to_owned())
        .collect();
    assert_eq!(texts, vec!["first", "second", "third", "fourth"]);
}

#[tokio::test]
async fn test_edit() {
    let app = make_app(TestModelProvider::default());
    seed(&app, "helo", "Hello!").await;
    let id = app.conversation.history().await.unwrap()[0].id.clone();

    let resp = send(
        &app,
        post_json("/api/chat/edit", json!({ "id": id, "newText": "hello" })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, json!({ "message": "Message updated" }));
    let history = app.conversation.history().await.unwrap();
    assert_eq!(history[0].parts, vec![Part::text("hello")]);
    assert_eq!(history[1].parts, vec![Part::text("Hello!")]);
}

#[tokio::test]
async fn test_edit_unknown_id() {
    let app = make_app(TestModelProvider::default());
    seed(&app, "hi", "hey").await;
    let before = app.conversation.history().await.unwrap();

    let resp = send(
        &app,
        post_json("/api/chat/edit", json!({ "id": "missing", "newText": "x" })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(body_json(resp).await["error"].is_string());
    assert_eq!(app.conversation.history().await.unwrap(), before);
}

#[tokio::test]
async fn test_clear() {
    let app = make_app(TestModelProvider::default());
    seed(&app, "hi", "hey").await;

    let resp = send(
        &app,
        Request::post("/api/chat/clear").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        body_json(resp).await,
        json!({ "message": "Chat history cleared" })
    );
    assert!(app.conversation.history().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_save_response() {
    let app = make_app(TestModelProvider::default());
    seed(&app, "earlier", "reply").await;

    let body = json!({
        "userMessage": {
            "role": "user",
            "parts": [
                { "text": "What is this?" },
                { "image": "data:image/png;base64,iVBORw0KGgo=", "fileName": "cat.png" }
            ]
        },
        "modelResponse": { "role": "model", "parts": [{ "text": "A cat." }] }
    });
    let resp = send(&app, post_json("/api/chat/save-response", body)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, json!({ "message": "Messages saved" }));

    let history = app.conversation.history().await.unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history[2].role, Role::User);
    assert_eq!(history[2].parts.len(), 2);
    assert_eq!(history[2].parts[1].file_name(), Some("cat.png"));
    assert_eq!(history[3].role, Role::Model);
    assert!(history[2].created_at <= history[3].created_at);
}

#[tokio::test]
async fn test_save_response_rejects_swapped_roles() {
    let app = make_app(TestModelProvider::default());
    let body = json!({
        "userMessage": { "role": "model", "parts": [{ "text": "a" }] },
        "modelResponse": { "role": "user", "parts": [{ "text": "b" }] }
    });
    let resp = send(&app, post_json("/api/chat/save-response", body)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(app.conversation.history().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_health() {
    let app = make_app(TestModelProvider::default());
    let resp = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let health: HealthResponse = serde_json::from_value(body_json(resp).await).unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}
