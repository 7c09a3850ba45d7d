pub mod answer;
pub mod event;
pub mod extract;
pub mod filter;

pub use answer::{extract_answer, strip_markup};
pub use event::OutboundEvent;
pub use extract::{DecodeError, DeltaDecoder, DeltaExtractor, OpenAiChatDelta, TextDelta};
pub use filter::{AnswerFilter, FilterOutcome, FilterState};

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::error::{TutorError, STREAM_INTERRUPTED_MESSAGE};
use crate::observability::RelayMetrics;
use crate::stream::{is_done_payload, sse_data_stream};

/// Turns one upstream SSE response into the downstream answer stream.
///
/// A relay is created per request and consumed by [`StreamRelay::events`].
/// The returned stream always ends with exactly one terminal event:
/// [`OutboundEvent::Done`] on success or [`OutboundEvent::Error`] on failure.
#[derive(Debug, Clone)]
pub struct StreamRelay {
    decoder: Arc<DeltaDecoder>,
    idle_timeout: Duration,
    metrics: Arc<RelayMetrics>,
    request_seq: u64,
}

impl StreamRelay {
    #[must_use]
    pub fn new(
        decoder: Arc<DeltaDecoder>,
        idle_timeout: Duration,
        metrics: Arc<RelayMetrics>,
        request_seq: u64,
    ) -> Self {
        Self {
            decoder,
            idle_timeout,
            metrics,
            request_seq,
        }
    }

    #[must_use]
    pub fn request_seq(&self) -> u64 {
        self.request_seq
    }

    /// Relay an open upstream byte stream.
    ///
    /// The upstream is only polled while the returned stream is polled, and
    /// dropping the returned stream drops the upstream with it.
    pub fn events<S>(self, upstream: S) -> impl Stream<Item = OutboundEvent> + Send
    where
        S: Stream<Item = Result<Bytes, TutorError>> + Send + 'static,
    {
        self.metrics.record_started();
        tracing::info!(request_seq = self.request_seq, "relay started");

        let payloads = sse_data_stream(with_idle_timeout(upstream, self.idle_timeout));
        let run = RelayRun {
            payloads: Box::pin(payloads),
            filter: AnswerFilter::new(),
            decoder: self.decoder,
            pending: VecDeque::with_capacity(4),
            guard: RelayGuard {
                metrics: self.metrics,
                request_seq: self.request_seq,
                forwarded: 0,
                dropped: 0,
                finished: false,
            },
        };

        futures_util::stream::unfold(run, |mut run| async move {
            loop {
                if let Some(event) = run.pending.pop_front() {
                    return Some((event, run));
                }
                if run.guard.finished {
                    return None;
                }
                match run.payloads.as_mut().next().await {
                    Some(Ok(payload)) => run.handle_payload(&payload),
                    Some(Err(err)) => run.fail(&err),
                    None => run.complete(),
                }
            }
        })
    }

    /// Downstream stream for a request whose upstream could not be opened.
    ///
    /// The client still receives an SSE response carrying a single error event.
    pub fn rejected(self, err: &TutorError) -> impl Stream<Item = OutboundEvent> + Send {
        self.metrics.record_started();
        self.metrics.record_failed();
        tracing::warn!(
            request_seq = self.request_seq,
            error = %err,
            "relay could not open upstream"
        );
        futures_util::stream::iter([OutboundEvent::Error(err.client_message())])
    }
}

type PayloadStream = Pin<Box<dyn Stream<Item = Result<String, TutorError>> + Send>>;

struct RelayRun {
    payloads: PayloadStream,
    filter: AnswerFilter,
    decoder: Arc<DeltaDecoder>,
    pending: VecDeque<OutboundEvent>,
    guard: RelayGuard,
}

impl RelayRun {
    fn handle_payload(&mut self, payload: &str) {
        if is_done_payload(payload) {
            return;
        }
        match self.decoder.decode(payload) {
            Ok(Some(delta)) => {
                if let Some(text) = self.filter.push(&delta) {
                    self.forward(text);
                }
            }
            Ok(None) => {}
            Err(err) => {
                self.guard.dropped += 1;
                self.guard.metrics.record_dropped_payload();
                tracing::debug!(
                    request_seq = self.guard.request_seq,
                    error = %err,
                    "skipping upstream payload"
                );
            }
        }
    }

    fn forward(&mut self, text: String) {
        self.guard.forwarded += 1;
        self.guard.metrics.record_forwarded_fragment();
        self.pending.push_back(OutboundEvent::Text(text));
    }

    fn complete(&mut self) {
        let outcome = self.filter.finish();
        if let Some(tail) = outcome.tail {
            self.forward(tail);
        }
        let used_fallback = outcome.fallback.is_some();
        if let Some(fallback) = outcome.fallback {
            self.guard.metrics.record_fallback();
            self.pending.push_back(OutboundEvent::Text(fallback));
        }
        self.pending.push_back(OutboundEvent::Done);
        self.guard.finished = true;
        self.guard.metrics.record_completed();
        tracing::info!(
            request_seq = self.guard.request_seq,
            forwarded = self.guard.forwarded,
            dropped = self.guard.dropped,
            fallback = used_fallback,
            received_bytes = self.filter.full_text().len(),
            "relay completed"
        );
    }

    fn fail(&mut self, err: &TutorError) {
        self.pending
            .push_back(OutboundEvent::Error(STREAM_INTERRUPTED_MESSAGE.to_string()));
        self.guard.finished = true;
        self.guard.metrics.record_failed();
        tracing::warn!(
            request_seq = self.guard.request_seq,
            forwarded = self.guard.forwarded,
            dropped = self.guard.dropped,
            error = %err,
            "relay failed mid-stream"
        );
    }
}

/// Notices a relay that is dropped before its terminal event was produced.
struct RelayGuard {
    metrics: Arc<RelayMetrics>,
    request_seq: u64,
    forwarded: u64,
    dropped: u64,
    finished: bool,
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.metrics.record_client_disconnect();
        tracing::info!(
            request_seq = self.request_seq,
            forwarded = self.forwarded,
            "client disconnected, upstream request aborted"
        );
    }
}

/// End the byte stream with a timeout error when the upstream goes quiet.
fn with_idle_timeout<S>(
    upstream: S,
    idle: Duration,
) -> impl Stream<Item = Result<Bytes, TutorError>> + Send
where
    S: Stream<Item = Result<Bytes, TutorError>> + Send + 'static,
{
    let state = (Box::pin(upstream), false);
    futures_util::stream::unfold(state, move |(mut upstream, timed_out)| async move {
        if timed_out {
            return None;
        }
        match tokio::time::timeout(idle, upstream.next()).await {
            Ok(Some(item)) => Some((item, (upstream, false))),
            Ok(None) => None,
            Err(_) => {
                let err = TutorError::Timeout(format!(
                    "no upstream data for {} ms",
                    idle.as_millis()
                ));
                Some((Err(err), (upstream, true)))
            }
        }
    })
}
