pub mod sse;

pub use sse::{
    data_frame, done_frame, is_done_payload, sse_data_stream, sse_data_stream_with_line_limit,
    LineTooLong, SseLineParser, MAX_PENDING_LINE_BYTES,
};
