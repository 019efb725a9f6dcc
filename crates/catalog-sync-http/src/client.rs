use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use catalog_sync::{
    CatalogClient, CatalogError, CatalogFilter, Credentials, PageResult, SyncMode,
    clamp_page_size,
};

use crate::wire::{CatalogRequest, CatalogResponse, normalize};

/// Connection settings for a distributor's HTTP API.
#[derive(Debug, Clone)]
pub struct DistributorConfig {
    pub label: String,
    /// Catalog endpoint (POST).
    pub api_url: String,
    /// Order endpoint (POST). Order submission is unavailable without it.
    pub order_url: Option<String>,
    /// Account used for order submission.
    pub credentials: Credentials,
    /// Prefix for derived image URLs when items carry no image of their own.
    pub image_base_url: Option<String>,
    pub timeout: Duration,
    /// Minimum spacing between consecutive requests.
    pub min_request_interval: Duration,
    pub max_attempts: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
}

impl DistributorConfig {
    pub fn new(
        label: impl Into<String>,
        api_url: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            label: label.into(),
            api_url: api_url.into(),
            order_url: None,
            credentials,
            image_base_url: None,
            timeout: Duration::from_secs(30),
            min_request_interval: Duration::from_millis(500),
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Spaces requests out. Clones share the same clock, so every client built
/// with one limiter counts against a single budget.
#[derive(Debug, Clone, Default)]
pub struct RequestLimiter {
    last_request: Arc<Mutex<Option<Instant>>>,
}

impl RequestLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The limiter every [`DistributorClient::new`] client in this process
    /// shares.
    pub fn process_wide() -> Self {
        static SHARED: OnceLock<RequestLimiter> = OnceLock::new();
        SHARED.get_or_init(RequestLimiter::new).clone()
    }

    /// Wait until `interval` has passed since the last request made through
    /// this limiter, then claim the slot.
    pub async fn wait(&self, interval: Duration) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Talks to a distributor over HTTP: catalog pages and order submission.
pub struct DistributorClient {
    pub(crate) config: DistributorConfig,
    pub(crate) client: reqwest::Client,
    limiter: RequestLimiter,
}

/// Why an attempt failed, and whether to try again.
enum Attempt {
    Retry(String),
    Fatal(CatalogError),
}

impl DistributorClient {
    pub fn new(config: DistributorConfig) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("catalog-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CatalogError::Configuration(e.to_string()))?;
        Ok(Self {
            config,
            client,
            limiter: RequestLimiter::process_wide(),
        })
    }

    /// Use `limiter` instead of the process-wide one.
    pub fn with_limiter(mut self, limiter: RequestLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn config(&self) -> &DistributorConfig {
        &self.config
    }

    /// Wait until `min_request_interval` has passed since the last request.
    pub(crate) async fn throttle(&self) {
        self.limiter.wait(self.config.min_request_interval).await;
    }

    async fn attempt(&self, body: &CatalogRequest<'_>) -> Result<PageResult, Attempt> {
        self.throttle().await;

        let response = self
            .client
            .post(&self.config.api_url)
            .json(body)
            .send()
            .await
            .map_err(|e| Attempt::Retry(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".into());
            return Err(Attempt::Retry(format!("HTTP {status}: {detail}")));
        }

        let decoded: CatalogResponse = response
            .json()
            .await
            .map_err(|e| Attempt::Retry(format!("malformed response: {e}")))?;

        normalize(decoded, self.config.image_base_url.as_deref()).map_err(Attempt::Fatal)
    }
}

#[async_trait::async_trait]
impl CatalogClient for DistributorClient {
    fn label(&self) -> &str {
        &self.config.label
    }

    /// Transport failures, non-success statuses and malformed bodies are
    /// retried up to `max_attempts` times. When retries run out the page
    /// comes back as a failed [`PageResult`] rather than an error. An
    /// `{error}` payload is the distributor's answer and is not retried.
    async fn fetch_page(
        &self,
        credentials: &Credentials,
        mode: SyncMode,
        filter: &CatalogFilter,
        page: u32,
        page_size: u32,
    ) -> Result<PageResult, CatalogError> {
        if self.config.api_url.trim().is_empty() {
            return Err(CatalogError::Configuration("missing distributor api_url".into()));
        }
        if credentials.api_id.trim().is_empty() {
            return Err(CatalogError::Configuration("missing distributor api_id".into()));
        }

        let body = CatalogRequest::new(credentials, mode, filter, page, clamp_page_size(page_size));
        let attempts = self.config.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.attempt(&body).await {
                Ok(result) => {
                    tracing::debug!(
                        distributor = %self.config.label,
                        page,
                        items = result.items.len(),
                        "fetched catalog page"
                    );
                    return Ok(result);
                }
                Err(Attempt::Fatal(e)) => return Err(e),
                Err(Attempt::Retry(message)) => {
                    tracing::warn!(page, attempt, error = %message, "catalog request failed");
                    last_error = message;
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        tracing::error!(page, attempts, error = %last_error, "giving up on catalog page");
        Ok(PageResult::failed(
            page,
            format!("page {page} failed after {attempts} attempts: {last_error}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_api_url_is_a_configuration_error() {
        let credentials = Credentials::new("id", "en");
        let client =
            DistributorClient::new(DistributorConfig::new("acme", " ", credentials.clone()))
                .unwrap();
        let result = client
            .fetch_page(&credentials, SyncMode::Full, &CatalogFilter::All, 1, 10)
            .await;
        assert!(matches!(result, Err(CatalogError::Configuration(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_spaces_requests() {
        let mut config =
            DistributorConfig::new("acme", "http://localhost", Credentials::new("id", "en"));
        config.min_request_interval = Duration::from_secs(1);
        let client = DistributorClient::new(config)
            .unwrap()
            .with_limiter(RequestLimiter::new());

        let start = Instant::now();
        client.throttle().await;
        client.throttle().await;
        client.throttle().await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn clients_sharing_a_limiter_are_spaced_together() {
        let mut config =
            DistributorConfig::new("acme", "http://localhost", Credentials::new("id", "en"));
        config.min_request_interval = Duration::from_secs(1);
        let limiter = RequestLimiter::new();
        let first = DistributorClient::new(config.clone())
            .unwrap()
            .with_limiter(limiter.clone());
        let second = DistributorClient::new(config)
            .unwrap()
            .with_limiter(limiter);

        let start = Instant::now();
        first.throttle().await;
        second.throttle().await;
        first.throttle().await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[test]
    fn process_wide_limiter_is_shared() {
        let a = RequestLimiter::process_wide();
        let b = RequestLimiter::process_wide();
        assert!(Arc::ptr_eq(&a.last_request, &b.last_request));
    }
}
