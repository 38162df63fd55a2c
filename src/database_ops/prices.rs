//! Price normalization and persistence: one mutable `current_prices` row
//! per (product, source) pair, plus an append-only `price_history` series.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::debug;

use super::catalog::Product;
use super::db::Db;
use crate::sources::{RawListing, SourceKind};

#[derive(Debug, Clone, FromRow)]
pub struct CurrentPrice {
    pub product_sku: String,
    pub source: String,
    /// Total cost (price plus shipping) in minor units; NULL when the
    /// product was checked but not found at this source.
    pub amount_minor: Option<i64>,
    pub url: String,
    pub in_stock: bool,
    pub not_available: bool,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct HistoryPoint {
    pub amount_minor: i64,
    pub in_stock: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Record the outcome of one product/source check.
///
/// With a validated listing: upsert the current price to the listing's
/// total cost and append a history observation. With `None`: mark the pair
/// checked-but-unavailable. Absence of a price is not a historical
/// observation, so no history row is written in that case.
pub async fn record(
    db: &Db,
    product: &Product,
    source: SourceKind,
    listing: Option<&RawListing>,
) -> Result<()> {
    let now = Utc::now();
    match listing {
        Some(listing) => {
            let total = listing.total_minor();
            sqlx::query(
                "INSERT INTO current_prices
                     (product_sku, source, amount_minor, url, in_stock, not_available, last_seen_at)
                 VALUES (?, ?, ?, ?, 1, 0, ?)
                 ON CONFLICT (product_sku, source) DO UPDATE SET
                     amount_minor = excluded.amount_minor,
                     url = excluded.url,
                     in_stock = 1,
                     not_available = 0,
                     last_seen_at = excluded.last_seen_at",
            )
            .bind(&product.sku)
            .bind(source.key())
            .bind(total)
            .bind(&listing.url)
            .bind(now)
            .execute(&db.pool)
            .await?;

            sqlx::query(
                "INSERT INTO price_history (product_sku, source, amount_minor, in_stock, recorded_at)
                 VALUES (?, ?, ?, 1, ?)",
            )
            .bind(&product.sku)
            .bind(source.key())
            .bind(total)
            .bind(now)
            .execute(&db.pool)
            .await?;

            debug!(sku = %product.sku, source = %source, amount_minor = total, "price recorded");
        }
        None => {
            sqlx::query(
                "INSERT INTO current_prices
                     (product_sku, source, amount_minor, url, in_stock, not_available, last_seen_at)
                 VALUES (?, ?, NULL, '', 0, 1, ?)
                 ON CONFLICT (product_sku, source) DO UPDATE SET
                     amount_minor = NULL,
                     url = '',
                     in_stock = 0,
                     not_available = 1,
                     last_seen_at = excluded.last_seen_at",
            )
            .bind(&product.sku)
            .bind(source.key())
            .bind(now)
            .execute(&db.pool)
            .await?;

            debug!(sku = %product.sku, source = %source, "marked not available");
        }
    }
    Ok(())
}

pub async fn current_price(
    db: &Db,
    sku: &str,
    source: SourceKind,
) -> Result<Option<CurrentPrice>> {
    let row = sqlx::query_as::<_, CurrentPrice>(
        "SELECT product_sku, source, amount_minor, url, in_stock, not_available, last_seen_at
         FROM current_prices WHERE product_sku = ? AND source = ?",
    )
    .bind(sku)
    .bind(source.key())
    .fetch_optional(&db.pool)
    .await?;
    Ok(row)
}

/// Oldest-first observation series for charting.
pub async fn history_for(db: &Db, sku: &str, source: SourceKind) -> Result<Vec<HistoryPoint>> {
    let rows = sqlx::query_as::<_, HistoryPoint>(
        "SELECT amount_minor, in_stock, recorded_at
         FROM price_history
         WHERE product_sku = ? AND source = ?
         ORDER BY recorded_at ASC, id ASC",
    )
    .bind(sku)
    .bind(source.key())
    .fetch_all(&db.pool)
    .await?;
    Ok(rows)
}

pub async fn count_current_prices(db: &Db) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM current_prices")
        .fetch_one(&db.pool)
        .await?;
    Ok(n)
}

pub async fn count_history(db: &Db) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM price_history")
        .fetch_one(&db.pool)
        .await?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::catalog;

    async fn seeded_db() -> (Db, Product) {
        let db = Db::connect_memory().await.expect("connect");
        catalog::insert_product(&db, "SKU1", "Space Marine Intercessors", Some(4_500))
            .await
            .expect("seed");
        let product = catalog::product_by_sku(&db, "SKU1")
            .await
            .expect("query")
            .expect("present");
        (db, product)
    }

    fn listing(price_minor: i64, shipping_minor: i64) -> RawListing {
        RawListing {
            title: "Space Marine Intercessors warhammer".into(),
            url: "https://www.ebay.com/itm/123".into(),
            item_id: "123".into(),
            price_minor,
            shipping_minor,
        }
    }

    #[tokio::test]
    async fn found_listing_upserts_total_and_appends_history() {
        let (db, product) = seeded_db().await;
        let l = listing(3_999, 400);

        record(&db, &product, SourceKind::EbayBrowse, Some(&l)).await.expect("record");

        let cp = current_price(&db, "SKU1", SourceKind::EbayBrowse)
            .await
            .expect("query")
            .expect("row");
        assert_eq!(cp.amount_minor, Some(4_399));
        assert_eq!(cp.url, "https://www.ebay.com/itm/123");
        assert!(cp.in_stock);
        assert!(!cp.not_available);

        let history = history_for(&db, "SKU1", SourceKind::EbayBrowse).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].amount_minor, 4_399);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_except_last_seen() {
        let (db, product) = seeded_db().await;
        let l = listing(3_999, 0);

        record(&db, &product, SourceKind::EbayFinding, Some(&l)).await.expect("first");
        let first = current_price(&db, "SKU1", SourceKind::EbayFinding)
            .await.unwrap().unwrap();

        record(&db, &product, SourceKind::EbayFinding, Some(&l)).await.expect("second");
        let second = current_price(&db, "SKU1", SourceKind::EbayFinding)
            .await.unwrap().unwrap();

        assert_eq!(first.amount_minor, second.amount_minor);
        assert_eq!(first.url, second.url);
        assert_eq!(first.in_stock, second.in_stock);
        assert_eq!(first.not_available, second.not_available);
        assert!(second.last_seen_at >= first.last_seen_at);

        // still exactly one row per (product, source)
        assert_eq!(count_current_prices(&db).await.unwrap(), 1);
        // but every observation lands in history
        assert_eq!(count_history(&db).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn not_found_marks_unavailable_without_history() {
        let (db, product) = seeded_db().await;

        record(&db, &product, SourceKind::GwStore, None).await.expect("record");

        let cp = current_price(&db, "SKU1", SourceKind::GwStore)
            .await
            .expect("query")
            .expect("checked-and-unavailable is a row, not an absence");
        assert_eq!(cp.amount_minor, None);
        assert_eq!(cp.url, "");
        assert!(!cp.in_stock);
        assert!(cp.not_available);
        assert_eq!(count_history(&db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn found_then_lost_overwrites_current_but_keeps_history() {
        let (db, product) = seeded_db().await;
        let l = listing(5_000, 0);

        record(&db, &product, SourceKind::GwStore, Some(&l)).await.expect("found");
        record(&db, &product, SourceKind::GwStore, None).await.expect("lost");

        let cp = current_price(&db, "SKU1", SourceKind::GwStore).await.unwrap().unwrap();
        assert!(cp.not_available);
        assert_eq!(cp.amount_minor, None);

        let history = history_for(&db, "SKU1", SourceKind::GwStore).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].amount_minor, 5_000);
    }

    #[tokio::test]
    async fn history_reads_oldest_first() {
        let (db, product) = seeded_db().await;
        for price in [4_000, 4_200, 3_900] {
            record(&db, &product, SourceKind::EbayBrowse, Some(&listing(price, 0)))
                .await
                .expect("record");
        }
        let history = history_for(&db, "SKU1", SourceKind::EbayBrowse).await.unwrap();
        let amounts: Vec<i64> = history.iter().map(|h| h.amount_minor).collect();
        assert_eq!(amounts, vec![4_000, 4_200, 3_900]);
    }
}
