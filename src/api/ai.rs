use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::TutorError;
use crate::relay::{extract_answer, OutboundEvent};
use crate::state::AppState;
use crate::tutor::{
    canvas_system_prompt, cap_history, context_text, course_system_prompt, pick_encouragement,
    system_prompt_for, ChatMessage, GradeLevel, TutorKind, DEFAULT_IMAGE_PROMPT,
};

const EMPTY_QUESTION_MESSAGE: &str = "Please enter a question!";
const MISSING_IMAGE_MESSAGE: &str = "Please upload a picture.";
const INVALID_BODY_MESSAGE: &str = "Request body must be a JSON object.";
const DEFAULT_IMAGE_MEDIA_TYPE: &str = "image/jpeg";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamRequest {
    #[serde(default)]
    question: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    conversation_history: Option<Vec<ChatMessage>>,
    #[serde(default)]
    context: Option<Value>,
    #[serde(default)]
    grade: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HomepageRequest {
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    conversation_history: Option<Vec<ChatMessage>>,
}

#[derive(Debug, Deserialize)]
struct CourseTutorRequest {
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    context: Option<Value>,
    #[serde(default)]
    grade: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CanvasCodingRequest {
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    context: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageRecognitionRequest {
    #[serde(default)]
    image_base64: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
}

fn parse_json_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, TutorError> {
    serde_json::from_slice(body).map_err(|err| {
        tracing::debug!(error = %err, "rejecting request body");
        TutorError::InvalidRequest(INVALID_BODY_MESSAGE.to_string())
    })
}

fn require_question(question: Option<&str>) -> Result<&str, TutorError> {
    match question.map(str::trim) {
        Some(question) if !question.is_empty() => Ok(question),
        _ => Err(TutorError::InvalidRequest(
            EMPTY_QUESTION_MESSAGE.to_string(),
        )),
    }
}

/// Split an optional `data:image/...;base64,` prefix off an uploaded image.
///
/// Returns `(media_type, base64_data)`.
fn split_data_url(image: &str) -> (&str, &str) {
    let Some(rest) = image.strip_prefix("data:") else {
        return (DEFAULT_IMAGE_MEDIA_TYPE, image);
    };
    let Some((header, data)) = rest.split_once(',') else {
        return (DEFAULT_IMAGE_MEDIA_TYPE, image);
    };
    let media_type = header.strip_suffix(";base64").unwrap_or(header);
    if media_type.starts_with("image/") {
        (media_type, data)
    } else {
        (DEFAULT_IMAGE_MEDIA_TYPE, data)
    }
}

fn encouragement(state: &AppState) -> &str {
    pick_encouragement(&state.config.tutor.encouragements).unwrap_or_default()
}

fn user_message(content: &str) -> Value {
    json!({ "role": "user", "content": content })
}

fn sse_ok_response(body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    headers.insert(
        http::HeaderName::from_static("x-accel-buffering"),
        http::HeaderValue::from_static("no"),
    );
    response
}

fn sse_body<S>(events: S) -> Body
where
    S: Stream<Item = OutboundEvent> + Send + 'static,
{
    Body::from_stream(events.map(|event| Ok::<Bytes, Infallible>(event.to_sse_frame())))
}

// ---------------------------------------------------------------------------
// POST /api/ai/stream
// ---------------------------------------------------------------------------

pub async fn stream_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match stream_inner(state, body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn stream_inner(state: Arc<AppState>, body: Bytes) -> Result<Response, TutorError> {
    let request: StreamRequest = parse_json_body(&body)?;
    let question = require_question(request.question.as_deref())?;

    let kind = TutorKind::from_request(request.kind.as_deref());
    let system = system_prompt_for(
        kind,
        &state.config.tutor.system_prompts,
        request.context.as_ref(),
        GradeLevel::from_label(request.grade.as_deref()),
    );
    let history = cap_history(
        request.conversation_history.unwrap_or_default(),
        state.config.tutor.history_limit,
    );

    let request_seq = state.next_request_seq();
    tracing::debug!(
        request_seq,
        ?kind,
        history_turns = history.len(),
        "streaming question received"
    );

    let relay = state.stream_relay(request_seq);
    let body = match state
        .upstream
        .open_chat_stream(&system, &history, question)
        .await
    {
        Ok(upstream) => sse_body(relay.events(upstream)),
        Err(err) => sse_body(relay.rejected(&err)),
    };
    Ok(sse_ok_response(body))
}

// ---------------------------------------------------------------------------
// Non-streaming tutor endpoints
// ---------------------------------------------------------------------------

pub async fn homepage_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match homepage_inner(&state, &body).await {
        Ok(answer) => answer_response(&state, "answer", &answer),
        Err(err) => err.into_response(),
    }
}

async fn homepage_inner(state: &AppState, body: &[u8]) -> Result<String, TutorError> {
    let request: HomepageRequest = parse_json_body(body)?;
    let question = require_question(request.question.as_deref())?;
    let history = cap_history(
        request.conversation_history.unwrap_or_default(),
        state.config.tutor.history_limit,
    );

    let mut messages: Vec<Value> = history
        .iter()
        .map(|m| json!({ "role": m.role, "content": m.content }))
        .collect();
    messages.push(user_message(question));

    let reply = state
        .upstream
        .complete(
            &state.config.tutor.system_prompts.homepage,
            messages,
            state.upstream.max_tokens().general,
        )
        .await?;
    Ok(extract_answer(&reply))
}

pub async fn course_tutor_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match course_tutor_inner(&state, &body).await {
        Ok(answer) => answer_response(&state, "answer", &answer),
        Err(err) => err.into_response(),
    }
}

async fn course_tutor_inner(state: &AppState, body: &[u8]) -> Result<String, TutorError> {
    let request: CourseTutorRequest = parse_json_body(body)?;
    let question = require_question(request.question.as_deref())?;
    let system = course_system_prompt(
        &state.config.tutor.system_prompts.course_tutor,
        &context_text(request.context.as_ref()),
        GradeLevel::from_label(request.grade.as_deref()),
    );

    let reply = state
        .upstream
        .complete(
            &system,
            vec![user_message(question)],
            state.upstream.max_tokens().tutor,
        )
        .await?;
    Ok(extract_answer(&reply))
}

pub async fn canvas_coding_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match canvas_coding_inner(&state, &body).await {
        Ok(answer) => answer_response(&state, "answer", &answer),
        Err(err) => err.into_response(),
    }
}

async fn canvas_coding_inner(state: &AppState, body: &[u8]) -> Result<String, TutorError> {
    let request: CanvasCodingRequest = parse_json_body(body)?;
    let question = require_question(request.question.as_deref())?;
    let blocks = request
        .context
        .as_ref()
        .and_then(|context| context.get("currentBlocks"));
    let system = canvas_system_prompt(&state.config.tutor.system_prompts.canvas_coding, blocks);

    let reply = state
        .upstream
        .complete(
            &system,
            vec![user_message(question)],
            state.upstream.max_tokens().general,
        )
        .await?;
    Ok(extract_answer(&reply))
}

pub async fn image_recognition_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Response {
    match image_recognition_inner(&state, &body).await {
        Ok(result) => answer_response(&state, "result", &result),
        Err(err) => err.into_response(),
    }
}

async fn image_recognition_inner(state: &AppState, body: &[u8]) -> Result<String, TutorError> {
    let request: ImageRecognitionRequest = parse_json_body(body)?;
    let image = request
        .image_base64
        .as_deref()
        .map(str::trim)
        .filter(|image| !image.is_empty())
        .ok_or_else(|| TutorError::InvalidRequest(MISSING_IMAGE_MESSAGE.to_string()))?;
    let (media_type, data) = split_data_url(image);
    let prompt = request
        .prompt
        .as_deref()
        .map(str::trim)
        .filter(|prompt| !prompt.is_empty())
        .unwrap_or(DEFAULT_IMAGE_PROMPT);

    let message = json!({
        "role": "user",
        "content": [
            {
                "type": "image",
                "source": { "type": "base64", "media_type": media_type, "data": data }
            },
            { "type": "text", "text": prompt }
        ]
    });
    let reply = state
        .upstream
        .complete(
            &state.config.tutor.system_prompts.image_recognition,
            vec![message],
            state.upstream.max_tokens().image_recognition,
        )
        .await?;
    Ok(extract_answer(&reply))
}

fn answer_response(state: &AppState, field: &str, text: &str) -> Response {
    let mut body = serde_json::Map::new();
    body.insert(field.to_string(), Value::String(text.to_string()));
    body.insert(
        "encouragement".to_string(),
        Value::String(encouragement(state).to_string()),
    );
    Json(Value::Object(body)).into_response()
}

// ---------------------------------------------------------------------------
// GET /api/ai/encouragement
// ---------------------------------------------------------------------------

pub fn encouragement_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "message": encouragement(&state) }))
}
