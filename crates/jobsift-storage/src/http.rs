//! Polite HTTP fetching for collectors: bounded concurrency, request spacing, retry with backoff.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::{StatusCode, Url};
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

/// Exponential backoff between attempts: `base_delay * 2^retry`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self, retry: usize) -> Duration {
        let factor = u32::try_from(retry)
            .ok()
            .and_then(|shift| 1u32.checked_shl(shift))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// Requests in flight across all hosts.
    pub max_in_flight: usize,
    pub per_host_in_flight: usize,
    pub retry: RetryPolicy,
    /// Minimum gap between two request starts; zero disables spacing.
    pub request_spacing: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: Some(format!("jobsift/{}", env!("CARGO_PKG_VERSION"))),
            max_in_flight: 3,
            per_host_in_flight: 1,
            retry: RetryPolicy::default(),
            request_spacing: Duration::ZERO,
        }
    }
}

impl HttpClientConfig {
    /// At most `concurrency` requests in flight, consecutive starts at least `request_delay` apart.
    pub fn polite(concurrency: usize, request_delay: Duration, max_retries: usize) -> Self {
        Self {
            max_in_flight: concurrency.max(1),
            retry: RetryPolicy {
                max_retries,
                ..RetryPolicy::default()
            },
            request_spacing: request_delay,
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("fetcher is shutting down")]
    Closed,
    #[error("response body for {url} is not valid utf-8")]
    Encoding { url: String },
}

impl FetchError {
    /// Throttling, server errors and transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Request(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            FetchError::Status { status, .. } => StatusCode::from_u16(*status).is_ok_and(retryable_status),
            FetchError::Closed | FetchError::Encoding { .. } => false,
        }
    }
}

fn retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Hands out request start slots at least `spacing` apart, in arrival order.
#[derive(Debug)]
pub struct RequestSpacer {
    spacing: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RequestSpacer {
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            next_slot: Mutex::new(None),
        }
    }

    pub async fn wait_turn(&self) {
        if self.spacing.is_zero() {
            return;
        }
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = next.map_or(now, |n| n.max(now));
            *next = Some(slot + self.spacing);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

fn host_key(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_default()
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    in_flight: Arc<Semaphore>,
    per_host_limit: usize,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
    spacer: RequestSpacer,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            in_flight: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            per_host_limit: config.per_host_in_flight.max(1),
            hosts: Mutex::new(HashMap::new()),
            spacer: RequestSpacer::new(config.request_spacing),
            retry: config.retry,
        })
    }

    async fn host_semaphore(&self, host: String) -> Arc<Semaphore> {
        let mut hosts = self.hosts.lock().await;
        Arc::clone(
            hosts
                .entry(host)
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit))),
        )
    }

    /// GETs `url` as UTF-8 text, holding one global and one per-host permit for the whole exchange.
    pub async fn fetch_text(&self, run_id: Uuid, source_id: &str, url: &str) -> Result<String, FetchError> {
        let _global = self.in_flight.acquire().await.map_err(|_| FetchError::Closed)?;
        let host = self.host_semaphore(host_key(url)).await;
        let _host = host.acquire().await.map_err(|_| FetchError::Closed)?;

        let span = info_span!("http_fetch", %run_id, source_id, url);
        let (final_url, body) = self.get_with_retries(url).instrument(span).await?;
        String::from_utf8(body).map_err(|_| FetchError::Encoding { url: final_url })
    }

    async fn get_once(&self, url: &str) -> Result<(String, Vec<u8>), FetchError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: final_url,
            });
        }
        let body = resp.bytes().await?.to_vec();
        debug!(status = status.as_u16(), bytes = body.len(), "fetched");
        Ok((final_url, body))
    }

    async fn get_with_retries(&self, url: &str) -> Result<(String, Vec<u8>), FetchError> {
        let mut retry = 0;
        loop {
            self.spacer.wait_turn().await;
            match self.get_once(url).await {
                Ok(page) => return Ok(page),
                Err(err) if retry < self.retry.max_retries && err.is_retryable() => {
                    let delay = self.retry.delay(retry);
                    warn!(error = %err, retry, delay_ms = delay.as_millis() as u64, "retrying fetch");
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
