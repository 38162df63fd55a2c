//! Match validation: decides whether a raw listing is genuinely the catalog
//! product and priced sanely. The pipeline is strict on keyword overlap and
//! permissive on price, because showing the wrong item hurts more than
//! missing a listing for one run.

use url::Url;

use crate::database_ops::catalog::Product;
use crate::sources::{RawListing, SourceProfile};

/// Words shorter than this are noise ("of", "the", "and") and carry no
/// matching evidence.
const MIN_TOKEN_LEN: usize = 4;

/// A single coincidental word match is not evidence of a genuine match.
const MIN_TOKEN_HITS: usize = 2;

/// When the catalog carries a reference price, listings far outside it are
/// bundles, lots or mispricings even if they sit inside the absolute band.
const REFERENCE_MAX_MULTIPLE: i64 = 3;
const REFERENCE_MIN_DIVISOR: i64 = 10;

pub fn is_valid(listing: &RawListing, product: &Product, profile: &SourceProfile) -> bool {
    if !url_belongs_to_source(&listing.url, profile.domain_suffix) {
        return false;
    }

    if token_hits(&product.name, &listing.title) < MIN_TOKEN_HITS {
        return false;
    }

    let total = listing.total_minor();
    if total < profile.min_total_minor || total > profile.max_total_minor {
        return false;
    }

    if listing.shipping_minor > profile.max_shipping_minor {
        return false;
    }

    if let Some(reference) = product.reference_minor.filter(|r| *r > 0) {
        if total > reference * REFERENCE_MAX_MULTIPLE
            || total < reference / REFERENCE_MIN_DIVISOR
        {
            return false;
        }
    }

    true
}

fn url_belongs_to_source(raw_url: &str, domain_suffix: &str) -> bool {
    if raw_url.trim().is_empty() {
        return false;
    }
    let Ok(parsed) = Url::parse(raw_url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    host == domain_suffix || host.ends_with(&format!(".{domain_suffix}"))
}

/// Count product-name tokens (length >= 4) appearing in the listing title,
/// case-insensitive substring match.
fn token_hits(product_name: &str, listing_title: &str) -> usize {
    let title = listing_title.to_lowercase();
    product_name
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\''))
        .filter(|w| w.chars().count() >= MIN_TOKEN_LEN)
        .map(|w| w.to_lowercase())
        .filter(|w| title.contains(w.as_str()))
        .count()
}
