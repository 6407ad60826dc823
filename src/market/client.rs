//! Typed market API client.
//!
//! Every call first acquires the shared rate limiter, then issues a GET with
//! a per-request timeout. Transient failures (connect errors, timeouts, 5xx,
//! 429) retry up to three attempts with jittered exponential backoff starting
//! at one second; other 4xx fail immediately.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::rate_limit::RateLimiter;

use super::wire::{
    ItemDetail, ItemDetailResponse, ItemIndexEntry, ItemListResponse, OrderBook, OrdersResponse,
    Statistics, StatisticsResponse,
};

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const BACKOFF_JITTER_MS: u64 = 250;

#[derive(Clone)]
pub struct MarketClient {
    http: reqwest::Client,
    limiter: Arc<RateLimiter>,
    v1_url: String,
    v2_url: String,
}

impl MarketClient {
    pub fn new(
        limiter: Arc<RateLimiter>,
        v1_url: impl Into<String>,
        v2_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(MarketClient {
            http,
            limiter,
            v1_url: v1_url.into(),
            v2_url: v2_url.into(),
        })
    }

    /// Full catalog index. Which entries are sets is decided by the caller.
    pub async fn list_items(&self) -> Result<Vec<ItemIndexEntry>> {
        let url = format!("{}/items", self.v2_url);
        let resp: ItemListResponse = self.get_json(&url).await?;
        Ok(resp
            .data
            .into_iter()
            .map(|raw| {
                let name = raw.display_name();
                ItemIndexEntry {
                    id: raw.id,
                    slug: raw.slug,
                    name,
                }
            })
            .collect())
    }

    /// Parts decomposition and quantity metadata for one item.
    pub async fn item_detail(&self, slug: &str) -> Result<ItemDetail> {
        let url = format!("{}/item/{}", self.v2_url, slug);
        let resp: ItemDetailResponse = self.get_json(&url).await?;
        Ok(resp.data.into())
    }

    /// Top online buy/sell orders for one item.
    pub async fn top_orders(&self, slug: &str) -> Result<OrderBook> {
        let url = format!("{}/orders/item/{}/top", self.v2_url, slug);
        let resp: OrdersResponse = self.get_json(&url).await?;
        Ok(resp.data.into())
    }

    /// Closed-trade statistics (48-hour and 90-day series) for one item.
    pub async fn statistics(&self, slug: &str) -> Result<Statistics> {
        let url = format!("{}/items/{}/statistics", self.v1_url, slug);
        let resp: StatisticsResponse = self.get_json(&url).await?;
        Ok(resp.payload.statistics_closed.into())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut backoff = INITIAL_BACKOFF;
        let mut last_err = EngineError::Upstream(format!("{url}: no attempt made"));

        for attempt in 1..=MAX_ATTEMPTS {
            self.limiter.acquire().await;
            debug!(url, attempt, "market GET");

            match self.http.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp
                            .json::<T>()
                            .await
                            .map_err(|e| EngineError::Parse(format!("{url}: {e}")));
                    }

                    if status == StatusCode::NOT_FOUND {
                        return Err(EngineError::NotFound(url.to_string()));
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        last_err = EngineError::RateLimited(url.to_string());
                    } else if status.is_server_error() {
                        last_err = EngineError::Upstream(format!("{url} returned {status}"));
                    } else {
                        // Remaining 4xx are our fault; retrying won't help.
                        return Err(EngineError::Upstream(format!("{url} returned {status}")));
                    }
                }
                Err(e) if e.is_timeout() => {
                    last_err = EngineError::Timeout(url.to_string());
                }
                Err(e) => {
                    last_err = EngineError::Upstream(format!("{url}: {e}"));
                }
            }

            if attempt < MAX_ATTEMPTS {
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..BACKOFF_JITTER_MS));
                warn!(url, attempt, error = %last_err, "market GET failed, backing off");
                tokio::time::sleep(backoff + jitter).await;
                backoff *= 2;
            }
        }

        Err(last_err)
    }
}
