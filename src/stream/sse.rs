/// SSE (Server-Sent Events) line parser, frame encoder, and stream utilities.
///
/// Upstream completion APIs emit one JSON delta per `data:` line. The relay
/// only needs those payloads, so the parser yields each `data:` line as soon
/// as its newline arrives instead of assembling multi-line frames.
use bytes::Bytes;
use futures_util::Stream;
use memchr::memchr_iter;
use smallvec::SmallVec;

const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Longest unterminated line the parser buffers before giving up on the stream.
pub const MAX_PENDING_LINE_BYTES: usize = 1024 * 1024;
const REPLACEMENT_CHAR: char = '\u{FFFD}';

struct PendingPayloads {
    payloads: SmallVec<[String; 8]>,
    head: usize,
}

impl PendingPayloads {
    #[inline]
    fn new() -> Self {
        Self {
            payloads: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<String> {
        if self.head >= self.payloads.len() {
            return None;
        }
        let payload = std::mem::take(&mut self.payloads[self.head]);
        self.head += 1;
        if self.head == self.payloads.len() {
            self.payloads.clear();
            self.head = 0;
        }
        Some(payload)
    }

    #[inline]
    fn extend_from_vec(&mut self, parsed: &mut Vec<String>) {
        if parsed.is_empty() {
            return;
        }
        self.payloads.extend(parsed.drain(..));
    }
}

// ---------------------------------------------------------------------------
// SseLineParser: incremental `data:` line parser
// ---------------------------------------------------------------------------

/// The upstream sent more than the allowed number of bytes without a newline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("SSE line exceeds {limit} bytes without a newline")]
pub struct LineTooLong {
    pub limit: usize,
}

/// Incremental SSE line parser.
///
/// Feed it text chunks split at arbitrary boundaries; it yields the payload
/// of every complete `data:` line. Comment lines (`:`), blank lines and the
/// other SSE fields are skipped.
pub struct SseLineParser {
    buffer: String,
    read_offset: usize,
    max_line_len: usize,
}

impl SseLineParser {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line_len(MAX_PENDING_LINE_BYTES)
    }

    #[must_use]
    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            buffer: String::new(),
            read_offset: 0,
            max_line_len,
        }
    }

    /// Bytes of the current line still waiting for its newline.
    #[inline]
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len() - self.read_offset
    }

    /// Fails once the unterminated line has grown past the configured limit.
    ///
    /// # Errors
    ///
    /// Returns [`LineTooLong`] when [`Self::pending_len`] exceeds the limit.
    pub fn check_pending(&self) -> Result<(), LineTooLong> {
        if self.pending_len() > self.max_line_len {
            return Err(LineTooLong {
                limit: self.max_line_len,
            });
        }
        Ok(())
    }

    /// Feed raw text and return the `data:` payloads of all completed lines.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text and append completed payloads into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<String>) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &self.buffer.as_bytes()[scan_start..]) {
            let line_end = scan_start + rel_pos;
            Self::process_line(&self.buffer[processed_up_to..line_end], out);
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Flush a final line that arrived without a trailing newline.
    pub fn finish_into(&mut self, out: &mut Vec<String>) {
        if self.read_offset < self.buffer.len() {
            Self::process_line(&self.buffer[self.read_offset..], out);
        }
        self.buffer.clear();
        self.read_offset = 0;
    }

    fn process_line(line: &str, out: &mut Vec<String>) {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() || line.starts_with(':') {
            return;
        }
        if let Some(value) = line.strip_prefix("data:") {
            // strip exactly one leading space after "data:"
            let value = value.strip_prefix(' ').unwrap_or(value);
            out.push(value.to_string());
        }
        // `event:`, `id:`, `retry:` and unknown fields carry no text
    }
}

impl Default for SseLineParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode as much of `pending` as is valid UTF-8 and feed it to the parser.
///
/// An incomplete code point at the end is kept for the next chunk; invalid
/// sequences are replaced with U+FFFD.
fn feed_utf8(pending: &mut Vec<u8>, parser: &mut SseLineParser, out: &mut Vec<String>) {
    loop {
        match std::str::from_utf8(pending) {
            Ok(text) => {
                parser.feed_into(text, out);
                pending.clear();
                return;
            }
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                if let Ok(text) = std::str::from_utf8(&pending[..valid_up_to]) {
                    parser.feed_into(text, out);
                }
                match err.error_len() {
                    Some(bad_len) => {
                        let mut replacement = [0u8; 4];
                        parser.feed_into(REPLACEMENT_CHAR.encode_utf8(&mut replacement), out);
                        pending.drain(..valid_up_to + bad_len);
                    }
                    None => {
                        pending.drain(..valid_up_to);
                        return;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

/// Format a data-only SSE frame: `data: {json}\n\n`.
#[must_use]
pub fn data_frame(json: &str) -> String {
    let mut out = String::with_capacity(8 + json.len());
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
    out
}

/// The unconditional stream terminator.
#[must_use]
pub fn done_frame() -> Bytes {
    Bytes::from_static(DONE_FRAME.as_bytes())
}

/// Check whether a `data:` payload is the `[DONE]` terminator.
#[must_use]
pub fn is_done_payload(payload: &str) -> bool {
    payload.trim() == "[DONE]"
}

// ---------------------------------------------------------------------------
// Stream utility
// ---------------------------------------------------------------------------

/// Split a byte stream into `data:` payloads using [`SseLineParser`].
///
/// Upstream errors are forwarded as a single `Err` item, after which the
/// stream ends; nothing is read from the source once it has failed. A line
/// longer than [`MAX_PENDING_LINE_BYTES`] fails the stream the same way.
pub fn sse_data_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<String, E>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: From<LineTooLong> + Send + 'static,
{
    sse_data_stream_with_line_limit(byte_stream, MAX_PENDING_LINE_BYTES)
}

/// [`sse_data_stream`] with an explicit limit on unterminated line length.
pub fn sse_data_stream_with_line_limit<S, E>(
    byte_stream: S,
    max_line_len: usize,
) -> impl Stream<Item = Result<String, E>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: From<LineTooLong> + Send + 'static,
{
    use futures_util::StreamExt;

    struct Decoder<S, E> {
        stream: std::pin::Pin<Box<S>>,
        parser: SseLineParser,
        remainder: Vec<u8>,
        parsed: Vec<String>,
        pending: PendingPayloads,
        failure: Option<E>,
        finished: bool,
    }

    let decoder = Decoder {
        stream: Box::pin(byte_stream),
        parser: SseLineParser::with_max_line_len(max_line_len),
        remainder: Vec::new(),
        parsed: Vec::with_capacity(8),
        pending: PendingPayloads::new(),
        failure: None,
        finished: false,
    };

    futures_util::stream::unfold(decoder, |mut d| async move {
        loop {
            if let Some(payload) = d.pending.pop_front() {
                return Some((Ok(payload), d));
            }
            if let Some(err) = d.failure.take() {
                return Some((Err(err), d));
            }
            if d.finished {
                return None;
            }

            match d.stream.as_mut().next().await {
                Some(Ok(bytes)) => {
                    d.remainder.extend_from_slice(&bytes);
                    feed_utf8(&mut d.remainder, &mut d.parser, &mut d.parsed);
                    if let Err(overflow) = d.parser.check_pending() {
                        // payloads completed before the runaway line still go out
                        d.finished = true;
                        d.failure = Some(E::from(overflow));
                    }
                }
                Some(Err(err)) => {
                    d.finished = true;
                    return Some((Err(err), d));
                }
                None => {
                    d.finished = true;
                    if !d.remainder.is_empty() {
                        let tail = String::from_utf8_lossy(&d.remainder).into_owned();
                        d.remainder.clear();
                        d.parser.feed_into(&tail, &mut d.parsed);
                    }
                    d.parser.finish_into(&mut d.parsed);
                }
            }
            d.pending.extend_from_vec(&mut d.parsed);
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
