// Segment Fetcher: downloads initialization and media segments over HTTP.

use crate::error::BufferError;
use crate::metrics::ControllerMetrics;
use crate::retry::RetryPolicy;
use crate::segment::{SegmentKind, SegmentRequest};
use async_trait::async_trait;
use bytes::Bytes;
use dash::{Manifest, ManifestError};
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, trace};
use url::Url;

/// Source of segment payloads.
///
/// The controller only depends on this trait, so tests and alternative
/// transports can stand in for [`SegmentFetcher`].
#[async_trait]
pub trait SegmentDownloader: Send + Sync {
    async fn fetch_initialization(&self, representation: &str) -> Result<Bytes, BufferError>;

    async fn fetch_segment(&self, representation: &str, index: u64) -> Result<Bytes, BufferError>;

    async fn fetch(&self, request: &SegmentRequest) -> Result<Bytes, BufferError> {
        match request.kind {
            SegmentKind::Init => {
                self.fetch_initialization(request.representation.as_str())
                    .await
            }
            SegmentKind::Media(index) => {
                self.fetch_segment(request.representation.as_str(), index)
                    .await
            }
        }
    }
}

pub struct SegmentFetcher {
    client: Client,
    manifest: Arc<Manifest>,
    retry: RetryPolicy,
    request_timeout: Duration,
    token: CancellationToken,
    metrics: Option<Arc<ControllerMetrics>>,
}

impl SegmentFetcher {
    pub fn new(
        client: Client,
        manifest: Arc<Manifest>,
        retry: RetryPolicy,
        request_timeout: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            client,
            manifest,
            retry,
            request_timeout,
            token,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ControllerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn check_representation(&self, representation: &str) -> Result<(), BufferError> {
        if self.manifest.contains(representation) {
            Ok(())
        } else {
            Err(ManifestError::UnknownRepresentation {
                id: representation.to_owned(),
            }
            .into())
        }
    }

    async fn get_with_retry(&self, url: Url) -> Result<Bytes, BufferError> {
        self.retry
            .run(&url, &self.token, self.metrics.as_deref(), |_| {
                self.get_once(&url)
            })
            .await
    }

    async fn get_once(&self, url: &Url) -> Result<Bytes, BufferError> {
        let started = Instant::now();
        let response = self
            .client
            .get(url.clone())
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BufferError::http_status(status, url.as_str()));
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| BufferError::decode(url.as_str(), e))?;

        let latency_ms = started.elapsed().as_millis() as u64;
        if let Some(metrics) = &self.metrics {
            metrics.record_fetch(data.len() as u64, latency_ms);
        }
        trace!(url = %url, bytes = data.len(), latency_ms, "Segment downloaded");
        Ok(data)
    }
}

#[async_trait]
impl SegmentDownloader for SegmentFetcher {
    #[instrument(skip(self), level = "debug")]
    async fn fetch_initialization(&self, representation: &str) -> Result<Bytes, BufferError> {
        self.check_representation(representation)?;
        let url = self.manifest.init_url(representation)?;
        self.get_with_retry(url).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn fetch_segment(&self, representation: &str, index: u64) -> Result<Bytes, BufferError> {
        self.check_representation(representation)?;
        if !self.manifest.is_valid_index(index) {
            return Err(BufferError::Bounds {
                index,
                max: self.manifest.max_segment_index,
            });
        }
        let url = self.manifest.segment_url(representation, index)?;
        self.get_with_retry(url).await
    }
}
