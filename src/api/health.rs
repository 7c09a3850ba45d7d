use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::state::AppState;

const WELCOME_MESSAGE: &str = "Welcome to the AI tutor API";

/// `GET /`
pub fn welcome_handler() -> Json<Value> {
    Json(json!({
        "message": WELCOME_MESSAGE,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Current UTC time as ISO-8601 with milliseconds, e.g. `2024-05-01T08:30:00.000Z`.
fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Health check handler.
/// Returns JSON with status, server time and relay counters.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "OK",
        "timestamp": iso_timestamp(),
        "relay": state.metrics().snapshot(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_timestamp_shape() {
        let stamp = iso_timestamp();
        assert_eq!(stamp.len(), "2024-05-01T08:30:00.000Z".len());
        assert!(stamp.ends_with('Z'));
        assert_eq!(&stamp[10..11], "T");
        assert!(chrono::DateTime::parse_from_rfc3339(&stamp).is_ok());
    }
}
