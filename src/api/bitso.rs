use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;
use tokio::time::{sleep, Duration};

use crate::execution::PriceFeed;

pub const BITSO_API_BASE: &str = "https://api.bitso.com";
const DEFAULT_BOOK: &str = "btc_usd";
const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_SECS: u64 = 5;
const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("invalid ticker response: {0}")]
    InvalidResponse(String),
}

/// Retry policy for ticker requests
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            retry_delay: Duration::from_secs(RETRY_DELAY_SECS),
            timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TickerResponse {
    payload: Option<TickerPayload>,
}

#[derive(Debug, Deserialize)]
struct TickerPayload {
    // Bitso sends prices as strings; accept numbers too
    last: Option<Value>,
}

/// Client for the Bitso public ticker
#[derive(Clone)]
pub struct BitsoClient {
    client: Client,
    base_url: String,
    book: String,
    policy: RetryPolicy,
}

impl BitsoClient {
    pub fn new() -> Self {
        Self::with_options(BITSO_API_BASE, DEFAULT_BOOK, RetryPolicy::default())
    }

    pub fn with_options(base_url: &str, book: &str, policy: RetryPolicy) -> Self {
        // Per-request timeout is set on each call; building the default client cannot fail
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            book: book.to_string(),
            policy,
        }
    }

    /// Last trade price, with fixed-delay retries
    ///
    /// Transport errors, non-2xx statuses and malformed bodies are all retried.
    pub async fn get_price(&self) -> Result<Decimal, FeedError> {
        let mut attempt = 1;

        loop {
            match self.fetch_price_once().await {
                Ok(price) => {
                    tracing::info!("Fetched Bitso price: ${:.2}", price);
                    return Ok(price);
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to fetch Bitso price (attempt {}/{}): {}",
                        attempt,
                        self.policy.max_retries,
                        e
                    );

                    if attempt >= self.policy.max_retries {
                        return Err(e);
                    }

                    tracing::info!(
                        "Retrying in {} seconds...",
                        self.policy.retry_delay.as_secs()
                    );
                    sleep(self.policy.retry_delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Single request without retry logic
    async fn fetch_price_once(&self) -> Result<Decimal, FeedError> {
        let url = format!("{}/v3/ticker/", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("book", self.book.as_str())])
            .timeout(self.policy.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status(status.as_u16()));
        }

        let body: TickerResponse = response.json().await?;
        let last = body
            .payload
            .and_then(|p| p.last)
            .ok_or_else(|| FeedError::InvalidResponse("missing payload.last".to_string()))?;

        parse_price(&last)
    }
}

impl Default for BitsoClient {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_price(value: &Value) -> Result<Decimal, FeedError> {
    let parsed = match value {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    };

    parsed.ok_or_else(|| FeedError::InvalidResponse(format!("non-numeric price {}", value)))
}

#[async_trait]
impl PriceFeed for BitsoClient {
    async fn current_price(&self) -> Option<Decimal> {
        match self.get_price().await {
            Ok(price) => Some(price),
            Err(_) => {
                tracing::warn!("All retries failed, falling back to alert price");
                None
            }
        }
    }
}
