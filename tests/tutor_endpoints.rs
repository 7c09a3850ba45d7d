use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tutor_relay::config::parse_config;
use tutor_relay::routing::dispatch::dispatch_request;
use tutor_relay::state::AppState;

#[derive(Debug, Clone, Default)]
struct Captured {
    api_key: Option<String>,
    anthropic_version: Option<String>,
    body: Option<Value>,
}

fn build_state(base_url: &str) -> Arc<AppState> {
    let config = parse_config(&format!(
        "upstream:\n  base_url: {base_url}\n  api_key: upstream-secret\n  model: tutor-model\ntutor:\n  encouragements:\n    - \"Well done!\"\n    - \"Keep it up!\"\n"
    ))
    .expect("parse config");
    Arc::new(AppState::from_config(config).expect("build state"))
}

/// Mock messages endpoint answering every call with `reply`.
async fn spawn_upstream(
    reply: &'static str,
    captured: Arc<Mutex<Captured>>,
) -> (String, tokio::task::JoinHandle<()>) {
    let app = Router::new().route(
        "/v1/messages",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let captured = Arc::clone(&captured);
            async move {
                let header = |name: &str| {
                    headers
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                };
                let mut slot = captured.lock().expect("capture lock");
                slot.api_key = header("x-api-key");
                slot.anthropic_version = header("anthropic-version");
                slot.body = Some(body);
                Json(json!({
                    "id": "msg_mock",
                    "type": "message",
                    "role": "assistant",
                    "content": [{ "type": "text", "text": reply }],
                    "stop_reason": "end_turn"
                }))
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), server)
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).expect("serialize request")))
        .expect("build request")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request")
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&body).expect("json payload")
}

fn is_configured_encouragement(value: &Value) -> bool {
    matches!(value.as_str(), Some("Well done!" | "Keep it up!"))
}

#[tokio::test]
async fn test_homepage_returns_extracted_answer() {
    let captured = Arc::new(Mutex::new(Captured::default()));
    let (base_url, server) = spawn_upstream(
        "<think>keep it simple</think><answer>The sun is a star.</answer>",
        Arc::clone(&captured),
    )
    .await;
    let state = build_state(&base_url);

    let request = post_json(
        "/api/ai/homepage",
        &json!({
            "question": "What is the sun?",
            "conversationHistory": [
                { "role": "user", "content": "hi" },
                { "role": "assistant", "content": "hello!" }
            ]
        }),
    );
    let response = dispatch_request(state, Arc::<str>::from(""), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::OK);

    let payload = json_body(response).await;
    assert_eq!(payload["answer"], "The sun is a star.");
    assert!(is_configured_encouragement(&payload["encouragement"]));

    let captured = captured.lock().expect("capture lock").clone();
    assert_eq!(captured.api_key.as_deref(), Some("upstream-secret"));
    assert_eq!(captured.anthropic_version.as_deref(), Some("2023-06-01"));
    let upstream_body = captured.body.expect("upstream body");
    assert_eq!(upstream_body["max_tokens"], 1000);
    assert!(upstream_body["system"].as_str().is_some());
    let messages = upstream_body["messages"].as_array().expect("messages");
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[2]["content"], "What is the sun?");

    server.abort();
}

#[tokio::test]
async fn test_canvas_coding_includes_current_blocks() {
    let captured = Arc::new(Mutex::new(Captured::default()));
    let (base_url, server) =
        spawn_upstream("Try a repeat block.", Arc::clone(&captured)).await;
    let state = build_state(&base_url);

    let request = post_json(
        "/api/ai/canvas-coding",
        &json!({
            "question": "How do I draw a square?",
            "context": { "currentBlocks": [{ "type": "turn_right", "degrees": 90 }] }
        }),
    );
    let response = dispatch_request(state, Arc::<str>::from(""), request)
        .await
        .expect("dispatch");
    let payload = json_body(response).await;
    assert_eq!(payload["answer"], "Try a repeat block.");

    let upstream_body = captured
        .lock()
        .expect("capture lock")
        .body
        .clone()
        .expect("upstream body");
    let system = upstream_body["system"].as_str().expect("system prompt");
    assert!(system.contains("\"turn_right\""));

    server.abort();
}

#[tokio::test]
async fn test_course_tutor_uses_tutor_token_budget() {
    let captured = Arc::new(Mutex::new(Captured::default()));
    let (base_url, server) =
        spawn_upstream("<answer>A lever lifts things.</answer>", Arc::clone(&captured)).await;
    let state = build_state(&base_url);

    let request = post_json(
        "/api/ai/course-tutor",
        &json!({ "question": "What is a lever?", "context": "Levers are simple machines." }),
    );
    let response = dispatch_request(state, Arc::<str>::from(""), request)
        .await
        .expect("dispatch");
    let payload = json_body(response).await;
    assert_eq!(payload["answer"], "A lever lifts things.");

    let upstream_body = captured
        .lock()
        .expect("capture lock")
        .body
        .clone()
        .expect("upstream body");
    assert_eq!(upstream_body["max_tokens"], 800);
    let system = upstream_body["system"].as_str().expect("system prompt");
    assert!(system.contains("Levers are simple machines."));
    assert!(system.contains("grades 4-6"));

    server.abort();
}

#[tokio::test]
async fn test_image_recognition_forwards_image_block() {
    let captured = Arc::new(Mutex::new(Captured::default()));
    let (base_url, server) = spawn_upstream("A red apple.", Arc::clone(&captured)).await;
    let state = build_state(&base_url);

    let request = post_json(
        "/api/ai/image-recognition",
        &json!({ "imageBase64": "data:image/png;base64,iVBORw0KGgo=" }),
    );
    let response = dispatch_request(state, Arc::<str>::from(""), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = json_body(response).await;
    assert_eq!(payload["result"], "A red apple.");
    assert!(is_configured_encouragement(&payload["encouragement"]));

    let upstream_body = captured
        .lock()
        .expect("capture lock")
        .body
        .clone()
        .expect("upstream body");
    assert_eq!(upstream_body["max_tokens"], 600);
    let content = &upstream_body["messages"][0]["content"];
    assert_eq!(content[0]["source"]["media_type"], "image/png");
    assert_eq!(content[0]["source"]["data"], "iVBORw0KGgo=");
    assert!(content[1]["text"].as_str().is_some_and(|t| !t.is_empty()));

    server.abort();
}

#[tokio::test]
async fn test_image_recognition_requires_image() {
    let state = build_state("http://127.0.0.1:9");
    let request = post_json("/api/ai/image-recognition", &json!({ "prompt": "what?" }));
    let response = dispatch_request(state, Arc::<str>::from(""), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = json_body(response).await;
    assert_eq!(payload["error"], "Please upload a picture.");
}

#[tokio::test]
async fn test_upstream_failure_is_friendly_500() {
    let app = Router::new().route(
        "/v1/messages",
        post(|| async {
            (
                StatusCode::BAD_GATEWAY,
                "internal upstream trace: db connection refused",
            )
                .into_response()
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let state = build_state(&format!("http://{addr}"));

    let request = post_json("/api/ai/homepage", &json!({ "question": "hello" }));
    let response = dispatch_request(state, Arc::<str>::from(""), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let payload = json_body(response).await;
    let message = payload["error"].as_str().expect("error message");
    assert!(!message.contains("db connection"));

    server.abort();
}

#[tokio::test]
async fn test_undecodable_upstream_reply_is_friendly_500() {
    let app = Router::new().route(
        "/v1/messages",
        post(|headers: HeaderMap| async move {
            let content_type = headers
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            (StatusCode::OK, format!("plain text, sent as {content_type}")).into_response()
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let state = build_state(&format!("http://{addr}"));

    let request = post_json("/api/ai/homepage", &json!({ "question": "hello" }));
    let response = dispatch_request(state, Arc::<str>::from(""), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let payload = json_body(response).await;
    let message = payload["error"].as_str().expect("error message");
    assert!(!message.contains("plain text"));

    server.abort();
}

#[tokio::test]
async fn test_encouragement_and_welcome() {
    let state = build_state("http://127.0.0.1:9");

    let response = dispatch_request(
        Arc::clone(&state),
        Arc::<str>::from(""),
        get("/api/ai/encouragement"),
    )
    .await
    .expect("dispatch");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(is_configured_encouragement(&json_body(response).await["message"]));

    let response = dispatch_request(Arc::clone(&state), Arc::<str>::from(""), get("/"))
        .await
        .expect("dispatch");
    let payload = json_body(response).await;
    assert!(payload["message"].as_str().is_some());
    assert_eq!(payload["version"], env!("CARGO_PKG_VERSION"));

    let response = dispatch_request(state, Arc::<str>::from(""), get("/api/ai/unknown"))
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_base_path_prefix() {
    let state = build_state("http://127.0.0.1:9");
    let response = dispatch_request(
        Arc::clone(&state),
        Arc::<str>::from("/tutor"),
        get("/tutor/health"),
    )
    .await
    .expect("dispatch");
    assert_eq!(response.status(), StatusCode::OK);

    let response = dispatch_request(state, Arc::<str>::from("/tutor"), get("/health"))
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
