mod request_id;

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::error::TutorError;
use crate::observability::RelayMetrics;
use crate::relay::{DeltaDecoder, StreamRelay};
use crate::transport::UpstreamClient;

use request_id::RequestSeqGenerator;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub upstream: UpstreamClient,
    decoder: Arc<DeltaDecoder>,
    metrics: Arc<RelayMetrics>,
    request_seqs: RequestSeqGenerator,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, upstream: UpstreamClient) -> Self {
        let decoder = Arc::new(DeltaDecoder::from_shapes(&config.upstream.delta_shapes));
        Self {
            config,
            upstream,
            decoder,
            metrics: Arc::new(RelayMetrics::new()),
            request_seqs: RequestSeqGenerator::new(),
        }
    }

    /// Build the state from a validated config, creating the upstream client.
    ///
    /// # Errors
    ///
    /// Returns [`TutorError`] when the upstream client cannot be built.
    pub fn from_config(config: AppConfig) -> Result<Self, TutorError> {
        let upstream = UpstreamClient::new(&config.server, &config.upstream)?;
        Ok(Self::new(config, upstream))
    }

    #[inline]
    pub fn next_request_seq(&self) -> u64 {
        self.request_seqs.next_seq()
    }

    #[must_use]
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// A fresh relay for one streamed question.
    #[must_use]
    pub fn stream_relay(&self, request_seq: u64) -> StreamRelay {
        StreamRelay::new(
            Arc::clone(&self.decoder),
            Duration::from_secs(self.config.upstream.stream_idle_timeout_secs),
            Arc::clone(&self.metrics),
            request_seq,
        )
    }
}
