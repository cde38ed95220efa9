//! REST enumeration adapter.
//!
//! Wraps a provider's inventory-style REST surface: one collection endpoint
//! per resource type, filtered by parent reference, paginated with
//! `pageToken`/`nextPageToken`. The HTTP client is built lazily on first
//! use and requests are rate-limited client-side.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;
use tokio::sync::{Mutex, OnceCell};
use tokio::time::sleep;
use url::Url;

use super::{ApiClient, PayloadStream};
use crate::error::ApiError;
use crate::resource::Resource;

const REQUEST_TIMEOUT_SECS: u64 = 30;
const MIN_REQUEST_INTERVAL_MS: u64 = 100; // 10 req/sec
const DEFAULT_PAGE_SIZE: usize = 500;

struct RateLimiter {
    min_interval: Duration,
    last: Mutex<Instant>,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        let start = Instant::now()
            .checked_sub(min_interval)
            .unwrap_or_else(Instant::now);
        Self {
            min_interval,
            last: Mutex::new(start),
        }
    }

    /// Holding the lock across the sleep serializes concurrent callers,
    /// which is exactly the throttle we want.
    async fn wait(&self) {
        let mut last = self.last.lock().await;
        let elapsed = last.elapsed();
        if elapsed < self.min_interval {
            sleep(self.min_interval - elapsed).await;
        }
        *last = Instant::now();
    }
}

#[derive(Debug, Deserialize)]
struct EnumerationPage {
    #[serde(default)]
    items: Vec<serde_json::Value>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

pub struct RestApiClient {
    base_url: Url,
    page_size: usize,
    http: OnceCell<reqwest::Client>,
    limiter: Arc<RateLimiter>,
}

impl RestApiClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        Ok(Self {
            base_url: Url::parse(base_url)?,
            page_size: DEFAULT_PAGE_SIZE,
            http: OnceCell::new(),
            limiter: Arc::new(RateLimiter::new(Duration::from_millis(
                MIN_REQUEST_INTERVAL_MS,
            ))),
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    async fn http(&self) -> Result<reqwest::Client, ApiError> {
        let client = self
            .http
            .get_or_try_init(|| async {
                reqwest::Client::builder()
                    .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                    .build()
            })
            .await?;
        Ok(client.clone())
    }

    fn collection_url(&self, type_name: &str) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .push(type_name);
        Ok(url)
    }
}

#[async_trait]
impl ApiClient for RestApiClient {
    async fn enumerate(
        &self,
        type_name: &str,
        parent: &Resource,
    ) -> Result<PayloadStream, ApiError> {
        let client = self.http().await?;
        let url = self.collection_url(type_name)?;
        let limiter = self.limiter.clone();
        let parent_ref = parent.reference();
        let page_size = self.page_size;
        let type_name = type_name.to_string();

        // One page fetched per poll; the next page token threads through
        // the unfold state so pagination stays lazy.
        let stream = futures::stream::try_unfold(Some(String::new()), move |token| {
            let client = client.clone();
            let url = url.clone();
            let limiter = limiter.clone();
            let parent_ref = parent_ref.clone();
            let type_name = type_name.clone();
            async move {
                let Some(token) = token else {
                    return Ok::<_, ApiError>(None);
                };
                limiter.wait().await;

                let page_size = page_size.to_string();
                let mut request = client.get(url).query(&[
                    ("parent", parent_ref.as_str()),
                    ("pageSize", page_size.as_str()),
                ]);
                if !token.is_empty() {
                    request = request.query(&[("pageToken", token.as_str())]);
                }

                let enumeration_err = |reason: String| ApiError::Enumeration {
                    type_name: type_name.clone(),
                    parent: parent_ref.clone(),
                    reason,
                };

                let response = request
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| enumeration_err(e.to_string()))?;
                let page: EnumerationPage = response
                    .json()
                    .await
                    .map_err(|e| enumeration_err(e.to_string()))?;

                let next_state = page.next_page_token.filter(|t| !t.is_empty());
                let items =
                    futures::stream::iter(page.items.into_iter().map(Ok::<_, ApiError>));
                Ok(Some((items, next_state)))
            }
        })
        .try_flatten()
        .boxed();

        Ok(stream)
    }
}
