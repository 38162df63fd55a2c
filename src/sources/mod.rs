//! Price source clients. Three transports, one contract: given a search
//! query, return candidate listings for the validator to sift.

pub mod budget;
pub mod ebay_browse;
pub mod ebay_finding;
pub mod gwstore;
pub mod retry;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

/// Stable keys for the supported retailers/APIs. Stored in `current_prices`
/// and `runs` rows, so these strings must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    GwStore,
    EbayFinding,
    EbayBrowse,
}

impl SourceKind {
    pub fn key(self) -> &'static str {
        match self {
            SourceKind::GwStore => "gw-store",
            SourceKind::EbayFinding => "ebay-finding",
            SourceKind::EbayBrowse => "ebay-browse",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One unvalidated search result. Money is integer minor units (cents).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawListing {
    pub title: String,
    pub url: String,
    pub item_id: String,
    pub price_minor: i64,
    pub shipping_minor: i64,
}

impl RawListing {
    /// Price plus shipping: the quantity actually compared and stored.
    pub fn total_minor(&self) -> i64 {
        self.price_minor + self.shipping_minor
    }
}

/// Failure taxonomy for a `search` call. Transport failures are retryable
/// and already retried inside the client; what surfaces here is terminal
/// for the current product.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("{source_key}: call budget exhausted ({limit} requests this run)")]
    BudgetExceeded { source_key: &'static str, limit: u32 },
    #[error("{source_key}: transport failure after retries: {detail}")]
    Transport { source_key: &'static str, detail: String },
    #[error("{source_key}: authentication failed: {detail}")]
    Auth { source_key: &'static str, detail: String },
}

/// Per-source tuning: expected listing domain, query length cap and the
/// sanity band the validator applies to candidate prices.
#[derive(Debug, Clone)]
pub struct SourceProfile {
    pub kind: SourceKind,
    /// Listings must resolve to a host ending in this suffix.
    pub domain_suffix: &'static str,
    pub query_max_len: usize,
    pub min_total_minor: i64,
    pub max_total_minor: i64,
    pub max_shipping_minor: i64,
}

impl SourceProfile {
    pub fn for_kind(kind: SourceKind) -> Self {
        match kind {
            SourceKind::GwStore => Self {
                kind,
                domain_suffix: "warhammer.com",
                query_max_len: 80,
                min_total_minor: 100,
                max_total_minor: 150_000,
                max_shipping_minor: 10_000,
            },
            // Finding API caps keyword strings harder than the Browse API.
            SourceKind::EbayFinding => Self {
                kind,
                domain_suffix: "ebay.com",
                query_max_len: 50,
                min_total_minor: 100,
                max_total_minor: 150_000,
                max_shipping_minor: 10_000,
            },
            SourceKind::EbayBrowse => Self {
                kind,
                domain_suffix: "ebay.com",
                query_max_len: 80,
                min_total_minor: 100,
                max_total_minor: 150_000,
                max_shipping_minor: 10_000,
            },
        }
    }
}

/// Shared contract for the three fetch clients. `search` takes `&mut self`
/// because each call draws down the per-run budget owned by the client.
#[async_trait]
pub trait PriceSource: Send {
    fn kind(&self) -> SourceKind;
    fn profile(&self) -> &SourceProfile;
    async fn search(
        &mut self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<RawListing>, FetchError>;
}

/// Parse a decimal money string ("24.99", "£1,299.00") into minor units.
/// Rejects negatives; extra fractional digits are truncated.
pub fn parse_money_minor(raw: &str) -> Option<i64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() || cleaned.contains('-') {
        return None;
    }
    let mut parts = cleaned.splitn(2, '.');
    let whole_str = parts.next().unwrap_or("");
    let whole: i64 = if whole_str.is_empty() {
        0
    } else {
        whole_str.parse().ok()?
    };
    let frac_str = parts.next().unwrap_or("");
    let frac_two: String = frac_str.chars().take(2).collect();
    let frac: i64 = if frac_two.is_empty() {
        0
    } else if frac_two.len() == 1 {
        frac_two.parse::<i64>().ok()? * 10
    } else {
        frac_two.parse().ok()?
    };
    whole.checked_mul(100)?.checked_add(frac)
}

/// Money out of a JSON field that may be a string or a number.
pub fn money_minor_from_value(v: &Value) -> Option<i64> {
    if let Some(s) = v.as_str() {
        return parse_money_minor(s);
    }
    if let Some(n) = v.as_f64() {
        if n < 0.0 {
            return None;
        }
        return Some((n * 100.0).round() as i64);
    }
    None
}
