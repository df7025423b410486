// Manifest Loader: retrieves and parses the MPD for a session.

use crate::error::BufferError;
use crate::retry::RetryPolicy;
use dash::{Manifest, ManifestError};
use reqwest::Client;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use url::Url;

pub struct ManifestLoader {
    client: Client,
    retry: RetryPolicy,
    request_timeout: Duration,
    token: CancellationToken,
}

impl ManifestLoader {
    pub fn new(
        client: Client,
        retry: RetryPolicy,
        request_timeout: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            client,
            retry,
            request_timeout,
            token,
        }
    }

    /// Fetches the manifest. Relative segment URLs resolve against the final
    /// URL after redirects.
    #[instrument(skip(self), level = "debug")]
    pub async fn load(&self, manifest_url: &str) -> Result<Manifest, BufferError> {
        let url = Url::parse(manifest_url).map_err(|e| ManifestError::InvalidUrl {
            input: manifest_url.to_owned(),
            reason: e.to_string(),
        })?;

        let (text, final_url) = self
            .retry
            .run(&url, &self.token, None, |_| self.get_text(&url))
            .await?;

        let manifest = Manifest::from_mpd(&text, final_url.as_str())?;
        info!(
            url = %final_url,
            representations = manifest.representations.len(),
            segment_duration = manifest.segment_duration,
            max_segment_index = manifest.max_segment_index,
            "Manifest loaded"
        );
        Ok(manifest)
    }

    async fn get_text(&self, url: &Url) -> Result<(String, Url), BufferError> {
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

        let final_url = response.url().clone();
        let text = response
            .text()
            .await
            .map_err(|e| BufferError::decode(url.as_str(), e))?;
        Ok((text, final_url))
    }
}
