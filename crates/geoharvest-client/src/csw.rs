//! CSW 2.0.2 client for harvesting metadata from OGC catalog services.
//!
//! Capabilities are fetched with a KVP GET request, record pages with an XML
//! POST to the GetRecords URL the service advertises (falling back to the
//! configured endpoint).

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use geoharvest_core::{
    AppError, CapabilitiesInfo, CatalogClient, CatalogClientFactory, HttpConfig, PageRequest,
    SearchPage,
};
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, StatusCode};
use tokio::time::sleep;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::query::get_records_body;
use crate::xml::{parse_capabilities, parse_search_results};

/// HTTP client for a single CSW endpoint.
///
/// Cloning is cheap: clones share the connection pool and the discovered
/// GetRecords URL.
#[derive(Clone)]
pub struct CswClient {
    client: Client,
    endpoint: Url,
    http: HttpConfig,
    records_url: Arc<OnceLock<Url>>,
}

impl CswClient {
    /// Upper bound for any single backoff delay.
    const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

    /// Rate limiting is transient, so it gets more attempts than other failures.
    const RATE_LIMIT_MAX_RETRIES: u32 = 10;

    /// Creates a client for the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidUrl` if the endpoint is not an absolute
    /// http(s) URL, or `AppError::ClientError` if the HTTP client cannot be
    /// built.
    pub fn new(endpoint: &str, http: HttpConfig) -> Result<Self, AppError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| AppError::InvalidUrl(format!("{}: {}", endpoint, e)))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(AppError::InvalidUrl(format!(
                "{}: unsupported scheme '{}'",
                endpoint,
                endpoint.scheme()
            )));
        }

        let client = Client::builder()
            .user_agent(&http.user_agent)
            .timeout(http.timeout)
            .build()
            .map_err(|e| AppError::ClientError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            http,
            records_url: Arc::new(OnceLock::new()),
        })
    }

    fn capabilities_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("service", "CSW")
            .append_pair("request", "GetCapabilities")
            .append_pair("acceptVersions", "2.0.2");
        url
    }

    fn records_url(&self) -> &Url {
        self.records_url.get().unwrap_or(&self.endpoint)
    }

    /// Remembers the advertised GetRecords POST URL when it is usable.
    fn adopt_records_url(&self, advertised: Option<&str>) {
        let Some(advertised) = advertised else {
            return;
        };
        match Url::parse(advertised) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                let _ = self.records_url.set(url);
            }
            _ => warn!(
                endpoint = %self.endpoint,
                advertised,
                "Ignoring unusable GetRecords URL from capabilities"
            ),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.http
            .retry_base_delay
            .saturating_mul(factor)
            .min(Self::MAX_RETRY_DELAY)
    }

    /// Sends a request, retrying transient failures.
    ///
    /// 429 responses honour `Retry-After`; 5xx responses, timeouts and
    /// connection failures back off exponentially up to `max_retries`
    /// attempts. Any other non-success status is a protocol error.
    async fn request_with_retry(&self, request: RequestBuilder) -> Result<String, AppError> {
        let max_retries = self.http.max_retries.max(1);
        let effective_max = Self::RATE_LIMIT_MAX_RETRIES.max(max_retries);
        let mut last_error = AppError::Generic("No attempts made".to_string());

        for attempt in 1..=effective_max {
            let attempt_request = request
                .try_clone()
                .ok_or_else(|| AppError::ClientError("request cannot be retried".to_string()))?;

            match attempt_request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let url = resp.url().clone();

                    if status.is_success() {
                        return resp.text().await.map_err(|e| {
                            AppError::ClientError(format!("reading response from {}: {}", url, e))
                        });
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        last_error = AppError::RateLimitExceeded;
                        if attempt < effective_max {
                            let delay = resp
                                .headers()
                                .get(RETRY_AFTER)
                                .and_then(|v| v.to_str().ok())
                                .and_then(|v| v.trim().parse::<u64>().ok())
                                .map(Duration::from_secs)
                                .unwrap_or_else(|| self.backoff(attempt + 1))
                                .min(Self::MAX_RETRY_DELAY);
                            debug!(%url, attempt, ?delay, "Rate limited, backing off");
                            sleep(delay).await;
                            continue;
                        }
                        return Err(last_error);
                    }

                    if status.is_server_error() {
                        last_error = AppError::ProtocolError(format!(
                            "HTTP {} from {}",
                            status.as_u16(),
                            url
                        ));
                        if attempt < max_retries {
                            let delay = self.backoff(attempt);
                            debug!(%url, attempt, ?delay, status = status.as_u16(), "Server error, retrying");
                            sleep(delay).await;
                            continue;
                        }
                        return Err(last_error);
                    }

                    return Err(AppError::ProtocolError(format!(
                        "HTTP {} from {}",
                        status.as_u16(),
                        url
                    )));
                }
                Err(e) => {
                    last_error = if e.is_timeout() {
                        AppError::Timeout(self.http.timeout.as_secs())
                    } else if e.is_connect() {
                        AppError::Unreachable(format!("{}: {}", self.endpoint, e))
                    } else {
                        AppError::ClientError(e.to_string())
                    };

                    if last_error.is_retryable() && attempt < max_retries {
                        let delay = self.backoff(attempt);
                        debug!(attempt, ?delay, error = %last_error, "Request failed, retrying");
                        sleep(delay).await;
                        continue;
                    }
                    return Err(last_error);
                }
            }
        }

        Err(last_error)
    }
}

impl CatalogClient for CswClient {
    fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn get_capabilities(&self) -> Result<CapabilitiesInfo, AppError> {
        let body = self
            .request_with_retry(self.client.get(self.capabilities_url()))
            .await?;
        let info = parse_capabilities(&body)?;
        self.adopt_records_url(info.get_records_url.as_deref());
        debug!(
            title = info.title.as_deref().unwrap_or("-"),
            version = info.version.as_deref().unwrap_or("-"),
            "Capabilities received"
        );
        Ok(info)
    }

    #[instrument(skip(self, request), fields(endpoint = %self.endpoint, start = request.start_position))]
    async fn get_records(&self, request: &PageRequest<'_>) -> Result<SearchPage, AppError> {
        let post = self
            .client
            .post(self.records_url().clone())
            .header(CONTENT_TYPE, "application/xml")
            .body(get_records_body(request));

        let body = self.request_with_retry(post).await?;
        let page = parse_search_results(&body)?;
        debug!(
            matched = page.matched,
            returned = page.returned,
            records = page.records.len(),
            "Search page received"
        );
        Ok(page)
    }
}

/// Factory for creating CSW clients.
#[derive(Debug, Clone, Default)]
pub struct CswClientFactory {
    http: HttpConfig,
}

impl CswClientFactory {
    pub fn new(http: HttpConfig) -> Self {
        Self { http }
    }
}

impl CatalogClientFactory for CswClientFactory {
    type Client = CswClient;

    fn create(&self, endpoint: &str) -> Result<Self::Client, AppError> {
        CswClient::new(endpoint, self.http.clone())
    }
}
