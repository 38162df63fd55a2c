//! eBay Browse API client. Exchanges client credentials for a bearer token
//! once per run, then searches item summaries filtered to new-condition,
//! fixed-price listings sorted by price ascending.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::budget::Throttle;
use super::retry::{execute, RetryPolicy};
use super::{
    money_minor_from_value, FetchError, PriceSource, RawListing, SourceKind, SourceProfile,
};
use crate::util::env::{env_opt, env_parse, env_req};

const DEFAULT_BASE_URL: &str = "https://api.ebay.com";
const DEFAULT_TOKEN_URL: &str = "https://api.ebay.com/identity/v1/oauth2/token";
const OAUTH_SCOPE: &str = "https://api.ebay.com/oauth/api_scope";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    token_type: String,
}

pub struct EbayBrowseClient {
    base_url: String,
    token_url: String,
    http: Client,
    client_id: String,
    client_secret: String,
    /// Bearer token held for the run's duration; fetched on first use.
    token: Option<String>,
    profile: SourceProfile,
    throttle: Throttle,
    retry: RetryPolicy,
}

impl EbayBrowseClient {
    pub fn new(
        base_url: Option<&str>,
        token_url: Option<&str>,
        client_id: String,
        client_secret: String,
        budget_limit: u32,
        delay: Duration,
    ) -> Result<Self> {
        let timeout_secs: u64 = env_parse("HTTP_TIMEOUT_SECS", 15);
        let http = Client::builder()
            .user_agent("miniprice/0.1")
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            token_url: token_url.unwrap_or(DEFAULT_TOKEN_URL).to_string(),
            http,
            client_id,
            client_secret,
            token: None,
            profile: SourceProfile::for_kind(SourceKind::EbayBrowse),
            throttle: Throttle::new(SourceKind::EbayBrowse, budget_limit, delay),
            retry: RetryPolicy::default().slower_than(delay),
        })
    }

    /// Env: EBAY_CLIENT_ID and EBAY_CLIENT_SECRET (required),
    /// EBAY_BROWSE_BASE_URL, EBAY_TOKEN_URL, EBAY_BROWSE_RUN_BUDGET,
    /// EBAY_DELAY_MS.
    pub fn from_env() -> Result<Self> {
        let client_id = env_req("EBAY_CLIENT_ID")?;
        let client_secret = env_req("EBAY_CLIENT_SECRET")?;
        let base = env_opt("EBAY_BROWSE_BASE_URL");
        let token_url = env_opt("EBAY_TOKEN_URL");
        let budget: u32 = env_parse("EBAY_BROWSE_RUN_BUDGET", 5_000);
        let delay_ms: u64 = env_parse("EBAY_DELAY_MS", 1_000);
        Self::new(
            base.as_deref(),
            token_url.as_deref(),
            client_id,
            client_secret,
            budget,
            Duration::from_millis(delay_ms),
        )
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.throttle = self.throttle.with_delay(delay);
        self.retry = RetryPolicy::default().slower_than(delay);
        self
    }

    /// OAuth2 client-credentials exchange. The token is cached on the
    /// client and reused for every call in the run. The POST goes through
    /// the shared retry loop, so a transient 5xx from the token endpoint is
    /// retried like any other transport failure; only a 4xx rejection or a
    /// malformed body counts as an authentication error.
    async fn ensure_token(&mut self) -> Result<String, FetchError> {
        if let Some(token) = &self.token {
            return Ok(token.clone());
        }

        let source = self.profile.kind.key();
        let params = [("grant_type", "client_credentials"), ("scope", OAUTH_SCOPE)];
        let req = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&params);

        let Some(resp) = execute(&self.retry, source, req).await? else {
            return Err(FetchError::Auth {
                source_key: source,
                detail: "token endpoint rejected the credential grant".to_string(),
            });
        };

        let token_data: TokenResponse =
            resp.json().await.map_err(|e| FetchError::Auth {
                source_key: source,
                detail: format!("malformed token response: {e}"),
            })?;
        info!(
            token_type = %token_data.token_type,
            expires_in = token_data.expires_in,
            "ebay-browse: bearer token acquired"
        );
        self.token = Some(token_data.access_token.clone());
        Ok(token_data.access_token)
    }
}

#[async_trait]
impl PriceSource for EbayBrowseClient {
    fn kind(&self) -> SourceKind {
        SourceKind::EbayBrowse
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
        let token = self.ensure_token().await?;

        let url = format!("{}/buy/browse/v1/item_summary/search", self.base_url);
        let req = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .query(&[
                ("q", query),
                ("filter", "buyingOptions:{FIXED_PRICE},conditions:{NEW}"),
                ("sort", "price"),
            ])
            .query(&[("limit", max_results.to_string())]);

        let Some(resp) = execute(&self.retry, self.profile.kind.key(), req).await? else {
            return Ok(Vec::new());
        };
        let body: Value = resp.json().await.map_err(|e| FetchError::Transport {
            source_key: self.profile.kind.key(),
            detail: e.to_string(),
        })?;

        let listings = parse_browse_response(&body, max_results);
        debug!(query, found = listings.len(), "ebay-browse search parsed");
        Ok(listings)
    }
}

pub(crate) fn parse_browse_response(body: &Value, max_results: usize) -> Vec<RawListing> {
    let Some(items) = body.get("itemSummaries").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for item in items {
        if out.len() >= max_results {
            break;
        }
        let Some(title) = item.get("title").and_then(|v| v.as_str()) else {
            continue;
        };
        let Some(url) = item.get("itemWebUrl").and_then(|v| v.as_str()) else {
            continue;
        };
        let price_minor = item
            .get("price")
            .and_then(|p| p.get("value"))
            .and_then(money_minor_from_value);
        let Some(price_minor) = price_minor else {
            continue;
        };
        let shipping_minor = item
            .get("shippingOptions")
            .and_then(|v| v.get(0))
            .and_then(|o| o.get("shippingCost"))
            .and_then(|c| c.get("value"))
            .and_then(money_minor_from_value)
            .unwrap_or(0);

        out.push(RawListing {
            title: title.to_string(),
            url: url.to_string(),
            item_id: item
                .get("itemId")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            price_minor,
            shipping_minor,
        });
    }
    out
}
