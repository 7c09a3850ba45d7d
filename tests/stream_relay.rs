use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tutor_relay::config::parse_config;
use tutor_relay::error::{TutorError, STREAM_INTERRUPTED_MESSAGE};
use tutor_relay::routing::dispatch::dispatch_request;
use tutor_relay::state::AppState;

#[derive(Debug, Clone, Default)]
struct Captured {
    authorization: Option<String>,
    body: Option<Value>,
}

fn build_state(base_url: &str) -> Arc<AppState> {
    let config = parse_config(&format!(
        "upstream:\n  base_url: {base_url}\n  api_key: upstream-secret\n  model: tutor-model\n  stream_idle_timeout_secs: 5\n"
    ))
    .expect("parse config");
    Arc::new(AppState::from_config(config).expect("build state"))
}

fn chat_sse(deltas: &[&str]) -> String {
    let mut out = String::new();
    out.push_str("data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n");
    for delta in deltas {
        let payload = json!({ "choices": [{ "index": 0, "delta": { "content": delta } }] });
        out.push_str(&format!("data: {payload}\n\n"));
    }
    out.push_str("data: [DONE]\n\n");
    out
}

/// Mock upstream that replays `sse` and records the request it received.
async fn spawn_upstream(
    sse: String,
    captured: Arc<Mutex<Captured>>,
) -> (String, tokio::task::JoinHandle<()>) {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let sse = sse.clone();
            let captured = Arc::clone(&captured);
            async move {
                let mut slot = captured.lock().expect("capture lock");
                slot.authorization = headers
                    .get(header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                slot.body = Some(body);
                ([(header::CONTENT_TYPE, "text/event-stream")], sse)
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

fn stream_request(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/ai/stream")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).expect("serialize request")))
        .expect("build request")
}

async fn body_text(response: axum::response::Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    String::from_utf8(body.to_vec()).expect("utf-8 body")
}

fn text_frame(text: &str) -> String {
    format!("data: {}\n\n", json!({ "text": text }))
}

#[tokio::test]
async fn test_stream_forwards_only_answer_text() {
    let captured = Arc::new(Mutex::new(Captured::default()));
    let sse = chat_sse(&[
        "<think>The student wants",
        " a short answer</think>",
        "<ans",
        "wer>Hello ",
        "World</answer>",
        " ignored trailer",
    ]);
    let (base_url, server) = spawn_upstream(sse, Arc::clone(&captured)).await;
    let state = build_state(&base_url);

    let history: Vec<Value> = (0..12)
        .map(|i| json!({ "role": if i % 2 == 0 { "user" } else { "assistant" }, "content": format!("turn {i}") }))
        .collect();
    let request = stream_request(&json!({
        "question": "Say hello",
        "conversationHistory": history,
    }));

    let response = dispatch_request(state, Arc::<str>::from(""), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
    assert_eq!(response.headers()["x-accel-buffering"], "no");

    let body = body_text(response).await;
    let expected = format!(
        "{}{}data: [DONE]\n\n",
        text_frame("Hello "),
        text_frame("World")
    );
    assert_eq!(body, expected);
    assert!(!body.contains("student wants"));

    let captured = captured.lock().expect("capture lock").clone();
    assert_eq!(
        captured.authorization.as_deref(),
        Some("Bearer upstream-secret")
    );
    let upstream_body = captured.body.expect("upstream body");
    assert_eq!(upstream_body["model"], "tutor-model");
    assert_eq!(upstream_body["stream"], true);
    let messages = upstream_body["messages"].as_array().expect("messages");
    // system + ten most recent turns + question
    assert_eq!(messages.len(), 12);
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[1]["content"], "turn 2");
    assert_eq!(messages[11]["content"], "Say hello");

    server.abort();
}

#[tokio::test]
async fn test_stream_falls_back_without_answer_tag() {
    let captured = Arc::new(Mutex::new(Captured::default()));
    let sse = chat_sse(&["<think>hmm</think>", "Plants use ", "sunlight."]);
    let (base_url, server) = spawn_upstream(sse, captured).await;
    let state = build_state(&base_url);

    let request = stream_request(&json!({ "question": "How do plants eat?" }));
    let response = dispatch_request(Arc::clone(&state), Arc::<str>::from(""), request)
        .await
        .expect("dispatch");
    let body = body_text(response).await;
    assert_eq!(
        body,
        format!("{}data: [DONE]\n\n", text_frame("Plants use sunlight."))
    );
    assert_eq!(state.metrics().snapshot().fallback_answers, 1);

    server.abort();
}

#[tokio::test]
async fn test_stream_course_prompt_uses_context() {
    let captured = Arc::new(Mutex::new(Captured::default()));
    let (base_url, server) =
        spawn_upstream(chat_sse(&["<answer>ok</answer>"]), Arc::clone(&captured)).await;
    let state = build_state(&base_url);

    let request = stream_request(&json!({
        "question": "What is a lever?",
        "type": "course",
        "context": "Levers are simple machines.",
        "grade": "1-3",
    }));
    let response = dispatch_request(state, Arc::<str>::from(""), request)
        .await
        .expect("dispatch");
    let body = body_text(response).await;
    assert!(body.ends_with("data: [DONE]\n\n"));

    let upstream_body = captured
        .lock()
        .expect("capture lock")
        .body
        .clone()
        .expect("upstream body");
    let system = upstream_body["messages"][0]["content"]
        .as_str()
        .expect("system prompt");
    assert!(system.contains("Levers are simple machines."));
    assert!(system.contains("grades 1-3"));

    server.abort();
}

#[tokio::test]
async fn test_stream_rejects_blank_question() {
    let state = build_state("http://127.0.0.1:9");
    let request = stream_request(&json!({ "question": "   " }));
    let response = dispatch_request(state, Arc::<str>::from(""), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: Value = serde_json::from_str(&body_text(response).await).expect("json body");
    assert_eq!(body["error"], "Please enter a question!");
}

#[tokio::test]
async fn test_stream_open_failure_sends_single_error_event() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "error": { "message": "rate limited" } })),
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

    let request = stream_request(&json!({ "question": "hello?" }));
    let response = dispatch_request(Arc::clone(&state), Arc::<str>::from(""), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_text(response).await;
    let expected_message = TutorError::Upstream {
        status: 429,
        message: String::new(),
    }
    .client_message();
    assert_eq!(
        body,
        format!("data: {}\n\n", json!({ "error": expected_message }))
    );
    assert!(!body.contains("[DONE]"));
    assert!(!body.contains("rate limited"));
    assert_eq!(state.metrics().snapshot().failed, 1);

    server.abort();
}

#[tokio::test]
async fn test_stream_truncated_upstream_still_completes() {
    let captured = Arc::new(Mutex::new(Captured::default()));
    // upstream closes without [DONE] and mid-way through a tag
    let sse = "data: {\"delta\":{\"text\":\"<answer>Almost</ans\"}}\n\n".to_string();
    let (base_url, server) = spawn_upstream(sse, captured).await;
    let state = build_state(&base_url);

    let request = stream_request(&json!({ "question": "Finish?" }));
    let response = dispatch_request(state, Arc::<str>::from(""), request)
        .await
        .expect("dispatch");
    let body = body_text(response).await;
    assert_eq!(body, format!("{}data: [DONE]\n\n", text_frame("Almost")));
    assert!(!body.contains(STREAM_INTERRUPTED_MESSAGE));

    server.abort();
}

#[tokio::test]
async fn test_health_reports_relay_counters() {
    let captured = Arc::new(Mutex::new(Captured::default()));
    let (base_url, server) =
        spawn_upstream(chat_sse(&["<answer>hi</answer>"]), captured).await;
    let state = build_state(&base_url);

    let request = stream_request(&json!({ "question": "hi" }));
    let response = dispatch_request(Arc::clone(&state), Arc::<str>::from(""), request)
        .await
        .expect("dispatch");
    let _ = body_text(response).await;

    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("build request");
    let response = dispatch_request(state, Arc::<str>::from(""), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::OK);
    let health: Value = serde_json::from_str(&body_text(response).await).expect("json body");
    assert_eq!(health["status"], "OK");
    let timestamp = health["timestamp"].as_str().expect("timestamp");
    assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    assert!(timestamp.ends_with('Z'));
    assert_eq!(health["relay"]["started"], 1);
    assert_eq!(health["relay"]["completed"], 1);
    assert_eq!(health["relay"]["forwarded_fragments"], 1);

    server.abort();
}
