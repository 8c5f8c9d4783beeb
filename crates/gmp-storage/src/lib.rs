//! Persistence gateways for reconciled offerings, and the HTTP fetcher the
//! live collectors read listing pages through.

use std::time::Duration;

use chrono::{DateTime, Utc};
use gmp_core::Source;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info_span, Instrument};

pub mod gateway;
pub mod postgres;

pub use gateway::{GatewayError, MemoryGateway, PersistenceGateway, RecordId};
pub use postgres::{PgSession, PgStore};

pub const CRATE_NAME: &str = "gmp-storage";

/// Timeout and retry budget for fetching one source's listing page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    pub timeout: Duration,
    /// Attempts in total, the first one included.
    pub max_attempts: u32,
    pub first_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_attempts: 3,
            first_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl FetchPolicy {
    /// Pause before 1-based `attempt`; the first attempt starts immediately
    /// and each retry doubles the pause up to `max_backoff`.
    pub fn backoff_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let doublings = (attempt - 2).min(16);
        self.first_backoff
            .saturating_mul(1 << doublings)
            .min(self.max_backoff)
    }
}

/// Listing sites throttle and fall over under load; anything else is final.
fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

fn is_transient_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// A listing page as served, after redirects.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub source: Source,
    pub url: String,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
    pub attempts: u32,
}

impl FetchedPage {
    pub fn html(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Lower-case hex sha256 of the body.
    pub fn content_hash(&self) -> String {
        hex::encode(Sha256::digest(&self.body))
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{site}: {url} failed after {attempts} attempt(s): {error}")]
    Request {
        site: Source,
        url: String,
        attempts: u32,
        #[source]
        error: reqwest::Error,
    },
    #[error("{site}: {url} answered HTTP {status} after {attempts} attempt(s)")]
    Status {
        site: Source,
        url: String,
        status: u16,
        attempts: u32,
    },
    #[error("building http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("page fetcher is shut down")]
    Closed,
}

/// Shared HTTP client with a cap on requests in flight across all sources.
#[derive(Debug)]
pub struct PageFetcher {
    client: reqwest::Client,
    in_flight: Semaphore,
}

impl PageFetcher {
    pub fn new(user_agent: Option<&str>, max_in_flight: usize) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder().gzip(true).brotli(true);
        if let Some(user_agent) = user_agent {
            builder = builder.user_agent(user_agent.to_string());
        }
        Ok(Self {
            client: builder.build().map_err(FetchError::Client)?,
            in_flight: Semaphore::new(max_in_flight.max(1)),
        })
    }

    pub async fn fetch_page(
        &self,
        source: Source,
        url: &str,
        policy: &FetchPolicy,
    ) -> Result<FetchedPage, FetchError> {
        let _permit = self.in_flight.acquire().await.map_err(|_| FetchError::Closed)?;
        let span = info_span!("page_fetch", source = %source, url);
        self.fetch_under(source, url, policy).instrument(span).await
    }

    async fn fetch_under(
        &self,
        source: Source,
        url: &str,
        policy: &FetchPolicy,
    ) -> Result<FetchedPage, FetchError> {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            if attempt > 1 {
                tokio::time::sleep(policy.backoff_before(attempt)).await;
            }

            let (transient, err) = match self.client.get(url).timeout(policy.timeout).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let final_url = resp.url().to_string();
                    let body = resp.bytes().await.map_err(|error| FetchError::Request {
                        site: source,
                        url: final_url.clone(),
                        attempts: attempt,
                        error,
                    })?;
                    debug!(attempt, bytes = body.len(), "fetched listing page");
                    return Ok(FetchedPage {
                        source,
                        url: final_url,
                        body: body.to_vec(),
                        fetched_at: Utc::now(),
                        attempts: attempt,
                    });
                }
                Ok(resp) => {
                    let status = resp.status();
                    let err = FetchError::Status {
                        site: source,
                        url: resp.url().to_string(),
                        status: status.as_u16(),
                        attempts: attempt,
                    };
                    (is_transient_status(status), err)
                }
                Err(error) => {
                    let transient = is_transient_error(&error);
                    let err = FetchError::Request {
                        site: source,
                        url: url.to_string(),
                        attempts: attempt,
                        error,
                    };
                    (transient, err)
                }
            };

            if !transient || attempt >= max_attempts {
                return Err(err);
            }
            debug!(attempt, error = %err, "retrying listing page");
        }
    }
}
