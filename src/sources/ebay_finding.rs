//! eBay Finding API client (findItemsByKeywords). Authenticates with a
//! static application key passed as a query parameter and filters
//! server-side to new-condition, fixed-price listings sorted by total cost.
//!
//! The Finding API wraps every scalar in a one-element array; parsing digs
//! through `serde_json::Value` rather than modelling the whole envelope.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::budget::Throttle;
use super::retry::{execute, RetryPolicy};
use super::{
    money_minor_from_value, FetchError, PriceSource, RawListing, SourceKind, SourceProfile,
};
use crate::util::env::{env_opt, env_parse, env_req};

const DEFAULT_BASE_URL: &str = "https://svcs.ebay.com/services/search/FindingService/v1";

pub struct EbayFindingClient {
    base_url: String,
    http: Client,
    app_id: String,
    profile: SourceProfile,
    throttle: Throttle,
    retry: RetryPolicy,
}

impl EbayFindingClient {
    pub fn new(
        base_url: Option<&str>,
        app_id: String,
        budget_limit: u32,
        delay: Duration,
    ) -> Result<Self> {
        let base_url = base_url
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        let timeout_secs: u64 = env_parse("HTTP_TIMEOUT_SECS", 15);
        let http = Client::builder()
            .user_agent("miniprice/0.1")
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            base_url,
            http,
            app_id,
            profile: SourceProfile::for_kind(SourceKind::EbayFinding),
            throttle: Throttle::new(SourceKind::EbayFinding, budget_limit, delay),
            retry: RetryPolicy::default().slower_than(delay),
        })
    }

    /// Env: EBAY_APP_ID (required), EBAY_FINDING_BASE_URL,
    /// EBAY_FINDING_RUN_BUDGET, EBAY_DELAY_MS.
    pub fn from_env() -> Result<Self> {
        let app_id = env_req("EBAY_APP_ID")?;
        let base = env_opt("EBAY_FINDING_BASE_URL");
        let budget: u32 = env_parse("EBAY_FINDING_RUN_BUDGET", 5_000);
        let delay_ms: u64 = env_parse("EBAY_DELAY_MS", 1_000);
        Self::new(base.as_deref(), app_id, budget, Duration::from_millis(delay_ms))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.throttle = self.throttle.with_delay(delay);
        self.retry = RetryPolicy::default().slower_than(delay);
        self
    }
}

#[async_trait]
impl PriceSource for EbayFindingClient {
    fn kind(&self) -> SourceKind {
        SourceKind::EbayFinding
    }

    fn profile(&self) -> &SourceProfile {
        &self.profile
    }

    async fn search(
        &mut self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<RawListing>, FetchError> {
        self.throttle.admit().await?;

        let req = self
            .http
            .get(&self.base_url)
            .query(&[
                ("OPERATION-NAME", "findItemsByKeywords"),
                ("SERVICE-VERSION", "1.0.0"),
                ("SECURITY-APPNAME", self.app_id.as_str()),
                ("RESPONSE-DATA-FORMAT", "JSON"),
                ("REST-PAYLOAD", ""),
                ("keywords", query),
                ("itemFilter(0).name", "ListingType"),
                ("itemFilter(0).value", "FixedPrice"),
                ("itemFilter(1).name", "Condition"),
                ("itemFilter(1).value", "New"),
                ("sortOrder", "PricePlusShippingLowest"),
            ])
            .query(&[("paginationInput.entriesPerPage", max_results.to_string())]);

        let Some(resp) = execute(&self.retry, self.profile.kind.key(), req).await? else {
            return Ok(Vec::new());
        };
        let body: Value = resp.json().await.map_err(|e| FetchError::Transport {
            source_key: self.profile.kind.key(),
            detail: e.to_string(),
        })?;

        let listings = parse_finding_response(&body, max_results);
        debug!(query, found = listings.len(), "ebay-finding search parsed");
        Ok(listings)
    }
}

/// First element of the Finding API's single-element array wrappers.
fn first_str<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key)?.get(0)?.as_str()
}

pub(crate) fn parse_finding_response(body: &Value, max_results: usize) -> Vec<RawListing> {
    let items = body
        .get("findItemsByKeywordsResponse")
        .and_then(|v| v.get(0))
        .and_then(|v| v.get("searchResult"))
        .and_then(|v| v.get(0))
        .and_then(|v| v.get("item"))
        .and_then(|v| v.as_array());

    let Some(items) = items else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for item in items {
        if out.len() >= max_results {
            break;
        }
        let Some(title) = first_str(item, "title") else {
            continue;
        };
        let Some(url) = first_str(item, "viewItemURL") else {
            continue;
        };
        let price_minor = item
            .get("sellingStatus")
            .and_then(|v| v.get(0))
            .and_then(|v| v.get("currentPrice"))
            .and_then(|v| v.get(0))
            .and_then(|v| v.get("__value__"))
            .and_then(money_minor_from_value);
        let Some(price_minor) = price_minor else {
            continue;
        };
        let shipping_minor = item
            .get("shippingInfo")
            .and_then(|v| v.get(0))
            .and_then(|v| v.get("shippingServiceCost"))
            .and_then(|v| v.get(0))
            .and_then(|v| v.get("__value__"))
            .and_then(money_minor_from_value)
            .unwrap_or(0);

        out.push(RawListing {
            title: title.to_string(),
            url: url.to_string(),
            item_id: first_str(item, "itemId").unwrap_or_default().to_string(),
            price_minor,
            shipping_minor,
        });
    }
    out
}
