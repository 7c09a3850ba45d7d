use bytes::Bytes;

use crate::stream::{data_frame, done_frame};

/// One event on the downstream SSE stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    /// `data: {"text": ...}`
    Text(String),
    /// `data: {"error": ...}`; terminal.
    Error(String),
    /// `data: [DONE]`; terminal.
    Done,
}

impl OutboundEvent {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OutboundEvent::Text(_))
    }

    /// Encode the event as a complete SSE frame.
    #[must_use]
    pub fn to_sse_frame(&self) -> Bytes {
        let payload = match self {
            OutboundEvent::Text(text) => serde_json::json!({ "text": text }),
            OutboundEvent::Error(message) => serde_json::json!({ "error": message }),
            OutboundEvent::Done => return done_frame(),
        };
        Bytes::from(data_frame(&payload.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_frame_escapes_json() {
        let frame = OutboundEvent::Text("say \"hi\"\n".to_string()).to_sse_frame();
        assert_eq!(&frame[..], b"data: {\"text\":\"say \\\"hi\\\"\\n\"}\n\n");
    }

    #[test]
    fn test_error_and_done_frames() {
        let frame = OutboundEvent::Error("try again".to_string()).to_sse_frame();
        assert_eq!(&frame[..], b"data: {\"error\":\"try again\"}\n\n");
        assert_eq!(&OutboundEvent::Done.to_sse_frame()[..], b"data: [DONE]\n\n");
    }

    #[test]
    fn test_terminal_events() {
        assert!(!OutboundEvent::Text(String::new()).is_terminal());
        assert!(OutboundEvent::Error(String::new()).is_terminal());
        assert!(OutboundEvent::Done.is_terminal());
    }
}
