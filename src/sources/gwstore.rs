//! Direct webstore client: fetches the storefront's HTML search page and
//! extracts product cards. The storefront markup shifts between releases,
//! so every field is extracted through an ordered list of selector
//! strategies, first hit wins.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use super::budget::Throttle;
use super::retry::{execute, RetryPolicy};
use super::{FetchError, PriceSource, RawListing, SourceKind, SourceProfile};
use crate::util::env::{env_opt, env_parse};

const DEFAULT_BASE_URL: &str = "https://www.warhammer.com";

// Markup variants seen across storefront releases, newest first.
const CARD_SELECTORS: &[&str] = &[
    "li.product-item",
    "div.product-card",
    "article[data-product-code]",
];
const TITLE_SELECTORS: &[&str] = &[
    "a.product-item-link",
    "h3.product-card__title",
    ".product-name",
];
const PRICE_SELECTORS: &[&str] = &[
    "span.price .amount",
    "span.price",
    "[data-price]",
];
const ITEM_ID_ATTRS: &[&str] = &["data-product-code", "data-product-id"];

pub struct GwStoreClient {
    base_url: String,
    http: Client,
    profile: SourceProfile,
    throttle: Throttle,
    retry: RetryPolicy,
}

impl GwStoreClient {
    pub fn new(base_url: Option<&str>, budget_limit: u32, delay: Duration) -> Result<Self> {
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
            profile: SourceProfile::for_kind(SourceKind::GwStore),
            throttle: Throttle::new(SourceKind::GwStore, budget_limit, delay),
            retry: RetryPolicy::default().slower_than(delay),
        })
    }

    /// Env: GWSTORE_BASE_URL, GWSTORE_RUN_BUDGET, GWSTORE_DELAY_MS.
    pub fn from_env() -> Result<Self> {
        let base = env_opt("GWSTORE_BASE_URL");
        let budget: u32 = env_parse("GWSTORE_RUN_BUDGET", 500);
        let delay_ms: u64 = env_parse("GWSTORE_DELAY_MS", 1_000);
        Self::new(base.as_deref(), budget, Duration::from_millis(delay_ms))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.throttle = self.throttle.with_delay(delay);
        self.retry = RetryPolicy::default().slower_than(delay);
        self
    }
}

#[async_trait]
impl PriceSource for GwStoreClient {
    fn kind(&self) -> SourceKind {
        SourceKind::GwStore
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

        let url = format!("{}/en-GB/search", self.base_url);
        let req = self.http.get(&url).query(&[("search-term", query)]);
        let Some(resp) = execute(&self.retry, self.profile.kind.key(), req).await? else {
            return Ok(Vec::new());
        };
        let html = resp.text().await.map_err(|e| FetchError::Transport {
            source_key: self.profile.kind.key(),
            detail: e.to_string(),
        })?;

        let listings = parse_search_document(&html, &self.base_url, max_results);
        debug!(query, found = listings.len(), "gw-store search parsed");
        Ok(listings)
    }
}

/// Extract product cards from a search results document. Cards missing a
/// price or a resolvable URL are silently dropped.
pub(crate) fn parse_search_document(
    html: &str,
    base_url: &str,
    max_results: usize,
) -> Vec<RawListing> {
    let doc = Html::parse_document(html);
    let base = match Url::parse(base_url) {
        Ok(u) => u,
        Err(_) => return Vec::new(),
    };

    let mut out = Vec::new();
    for card in select_cards(&doc) {
        if out.len() >= max_results {
            break;
        }
        let Some(title) = first_text(card, TITLE_SELECTORS) else {
            continue;
        };
        let Some(price_minor) = extract_price(card) else {
            continue;
        };
        let Some(url) = extract_link(card, &base) else {
            continue;
        };
        let item_id = extract_item_id(card, &url);
        out.push(RawListing {
            title,
            url,
            item_id,
            price_minor,
            // the storefront quotes shipping at checkout, not per listing
            shipping_minor: 0,
        });
    }
    out
}

fn select_cards(doc: &Html) -> Vec<ElementRef<'_>> {
    for raw in CARD_SELECTORS {
        let Ok(sel) = Selector::parse(raw) else {
            continue;
        };
        let cards: Vec<ElementRef<'_>> = doc.select(&sel).collect();
        if !cards.is_empty() {
            return cards;
        }
    }
    Vec::new()
}

/// First selector that yields non-empty text wins.
fn first_text(card: ElementRef<'_>, selectors: &[&str]) -> Option<String> {
    for raw in selectors {
        let Ok(sel) = Selector::parse(raw) else {
            continue;
        };
        if let Some(el) = card.select(&sel).next() {
            let text: String = el.text().collect::<String>().trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

fn extract_price(card: ElementRef<'_>) -> Option<i64> {
    for raw in PRICE_SELECTORS {
        let Ok(sel) = Selector::parse(raw) else {
            continue;
        };
        if let Some(el) = card.select(&sel).next() {
            let text: String = el.text().collect::<String>().trim().to_string();
            if let Some(minor) = super::parse_money_minor(&text) {
                return Some(minor);
            }
            if let Some(attr) = el.value().attr("data-price") {
                if let Some(minor) = super::parse_money_minor(attr) {
                    return Some(minor);
                }
            }
        }
    }
    None
}

fn extract_link(card: ElementRef<'_>, base: &Url) -> Option<String> {
    let sel = Selector::parse("a[href]").ok()?;
    let href = card.select(&sel).next()?.value().attr("href")?;
    let resolved = base.join(href).ok()?;
    Some(resolved.to_string())
}

fn extract_item_id(card: ElementRef<'_>, url: &str) -> String {
    for attr in ITEM_ID_ATTRS {
        if let Some(v) = card.value().attr(attr) {
            if !v.trim().is_empty() {
                return v.trim().to_string();
            }
        }
    }
    // fall back to the last path segment of the product URL
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segs| segs.next_back().map(|s| s.to_string()))
        })
        .unwrap_or_default()
}
