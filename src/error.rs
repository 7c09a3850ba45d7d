/// Error type shared by the upstream client, the request handlers and the relay.
#[derive(Debug, thiserror::Error)]
pub enum TutorError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Upstream timed out: {0}")]
    Timeout(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Upstream response could not be decoded: {0}")]
    Decode(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category used for status codes and client-facing wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    RateLimit,
    Timeout,
    ServerError,
}

/// Shown to the student when the answer stream breaks off mid-way.
pub const STREAM_INTERRUPTED_MESSAGE: &str =
    "The answer stream was interrupted, please try again later.";

const RATE_LIMITED_MESSAGE: &str =
    "You are asking questions very quickly. Take a short break and try again!";
const UNAVAILABLE_MESSAGE: &str =
    "The AI tutor is unavailable right now, please let your teacher know.";
const TIMEOUT_MESSAGE: &str = "The AI tutor took too long to answer, please try again later.";
const GENERIC_MESSAGE: &str = "The AI tutor can't answer right now, please try again later.";

/// Map an upstream HTTP status code to an error category.
#[must_use]
pub fn category_from_upstream_status(status: u16) -> ErrorCategory {
    match status {
        401 | 403 => ErrorCategory::Authentication,
        408 | 504 => ErrorCategory::Timeout,
        429 => ErrorCategory::RateLimit,
        _ => ErrorCategory::ServerError,
    }
}

impl TutorError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            TutorError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            TutorError::Timeout(_) => ErrorCategory::Timeout,
            TutorError::Upstream { status, .. } => category_from_upstream_status(*status),
            TutorError::Config(_)
            | TutorError::Transport(_)
            | TutorError::Decode(_)
            | TutorError::Internal(_) => ErrorCategory::ServerError,
        }
    }

    /// Message that is safe to show to the student.
    ///
    /// Raw upstream details never leave the server; only validation messages
    /// are echoed back verbatim.
    #[must_use]
    pub fn client_message(&self) -> String {
        match (self, self.category()) {
            (TutorError::InvalidRequest(message), _) => message.clone(),
            (_, ErrorCategory::RateLimit) => RATE_LIMITED_MESSAGE.to_string(),
            (_, ErrorCategory::Authentication) => UNAVAILABLE_MESSAGE.to_string(),
            (_, ErrorCategory::Timeout) => TIMEOUT_MESSAGE.to_string(),
            _ => GENERIC_MESSAGE.to_string(),
        }
    }
}

fn http_status_for_category(cat: ErrorCategory) -> http::StatusCode {
    match cat {
        ErrorCategory::InvalidRequest => http::StatusCode::BAD_REQUEST,
        ErrorCategory::RateLimit => http::StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::Timeout => http::StatusCode::GATEWAY_TIMEOUT,
        ErrorCategory::Authentication | ErrorCategory::ServerError => {
            http::StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Format an error as `(status, {"error": message})`.
#[must_use]
pub fn format_error(err: &TutorError) -> (http::StatusCode, serde_json::Value) {
    let status = http_status_for_category(err.category());
    let body = serde_json::json!({ "error": err.client_message() });
    (status, body)
}

impl axum::response::IntoResponse for TutorError {
    fn into_response(self) -> axum::response::Response {
        if !matches!(self, TutorError::InvalidRequest(_)) {
            tracing::error!(error = %self, "request failed");
        }
        let (status, body) = format_error(&self);
        (status, axum::Json(body)).into_response()
    }
}

impl From<reqwest::Error> for TutorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TutorError::Timeout(err.to_string())
        } else if err.is_decode() {
            TutorError::Decode(err.to_string())
        } else {
            TutorError::Transport(err.to_string())
        }
    }
}

impl From<crate::stream::LineTooLong> for TutorError {
    fn from(err: crate::stream::LineTooLong) -> Self {
        TutorError::Decode(err.to_string())
    }
}
