mod upstream;

pub use upstream::{chat_stream_body, messages_body, UpstreamByteStream, UpstreamClient};
