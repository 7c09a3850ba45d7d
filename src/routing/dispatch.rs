use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{self, Body};
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::api::{ai, health};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteMatch {
    Welcome,
    Health,
    Stream,
    Homepage,
    CourseTutor,
    CanvasCoding,
    ImageRecognition,
    Encouragement,
    MethodNotAllowed,
    NotFound,
}

/// Dispatch a raw HTTP request to the matching handler.
///
/// # Errors
///
/// This function currently never returns `Err` and uses `Infallible`.
pub async fn dispatch_request(
    state: Arc<AppState>,
    base_path: Arc<str>,
    request: Request<Body>,
) -> Result<Response, Infallible> {
    let (parts, body) = request.into_parts();
    let route = match_route(&parts.method, parts.uri.path(), base_path.as_ref());
    if route != RouteMatch::Health && route != RouteMatch::NotFound {
        tracing::debug!(method = %parts.method, path = parts.uri.path(), ?route, "dispatch");
    }

    let response = match route {
        RouteMatch::Welcome => health::welcome_handler().into_response(),
        RouteMatch::Health => health::health_handler(State(state)).into_response(),
        RouteMatch::Encouragement => ai::encouragement_handler(State(state)).into_response(),
        RouteMatch::Stream
        | RouteMatch::Homepage
        | RouteMatch::CourseTutor
        | RouteMatch::CanvasCoding
        | RouteMatch::ImageRecognition => {
            let limit = state.config.server.max_body_bytes;
            let body_bytes = match read_request_body(body, limit).await {
                Ok(bytes) => bytes,
                Err(response) => return Ok(response),
            };
            let state = State(state);
            match route {
                RouteMatch::Stream => ai::stream_handler(state, body_bytes).await,
                RouteMatch::Homepage => ai::homepage_handler(state, body_bytes).await,
                RouteMatch::CourseTutor => ai::course_tutor_handler(state, body_bytes).await,
                RouteMatch::CanvasCoding => ai::canvas_coding_handler(state, body_bytes).await,
                _ => ai::image_recognition_handler(state, body_bytes).await,
            }
        }
        RouteMatch::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        RouteMatch::NotFound => StatusCode::NOT_FOUND.into_response(),
    };

    Ok(response)
}

#[must_use]
pub fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("/{}", trimmed.trim_end_matches('/'))
    }
}

async fn read_request_body(body: Body, limit: usize) -> Result<bytes::Bytes, Response> {
    body::to_bytes(body, limit).await.map_err(|_| {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            axum::Json(serde_json::json!({
                "error": format!("Request body too large (max {limit} bytes)")
            })),
        )
            .into_response()
    })
}

fn expect_method(method: &Method, allowed: &Method, route: RouteMatch) -> RouteMatch {
    if method == allowed {
        route
    } else {
        RouteMatch::MethodNotAllowed
    }
}

fn match_route(method: &Method, path: &str, base_path: &str) -> RouteMatch {
    let Some(path) = strip_base_path(path, base_path) else {
        return RouteMatch::NotFound;
    };

    match path {
        "/" => expect_method(method, &Method::GET, RouteMatch::Welcome),
        "/health" => expect_method(method, &Method::GET, RouteMatch::Health),
        "/api/ai/stream" => expect_method(method, &Method::POST, RouteMatch::Stream),
        "/api/ai/homepage" => expect_method(method, &Method::POST, RouteMatch::Homepage),
        "/api/ai/course-tutor" => expect_method(method, &Method::POST, RouteMatch::CourseTutor),
        "/api/ai/canvas-coding" => {
            expect_method(method, &Method::POST, RouteMatch::CanvasCoding)
        }
        "/api/ai/image-recognition" => {
            expect_method(method, &Method::POST, RouteMatch::ImageRecognition)
        }
        "/api/ai/encouragement" => {
            expect_method(method, &Method::GET, RouteMatch::Encouragement)
        }
        _ => RouteMatch::NotFound,
    }
}

fn strip_base_path<'a>(path: &'a str, base_path: &str) -> Option<&'a str> {
    if base_path.is_empty() {
        return Some(path);
    }

    let remainder = path.strip_prefix(base_path)?;
    if remainder.is_empty() {
        Some("/")
    } else if remainder.starts_with('/') {
        Some(remainder)
    } else {
        None
    }
}
