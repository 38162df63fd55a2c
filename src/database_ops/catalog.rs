//! Read access to the product catalog. The catalog is owned by the
//! storefront application; this core only needs sku, display name and the
//! optional reference price.

use anyhow::Result;
use sqlx::FromRow;

use super::db::Db;

#[derive(Debug, Clone, FromRow)]
pub struct Product {
    pub sku: String,
    pub name: String,
    /// Publisher list price in minor units, when known.
    pub reference_minor: Option<i64>,
    pub active: bool,
}

pub async fn insert_product(
    db: &Db,
    sku: &str,
    name: &str,
    reference_minor: Option<i64>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO products (sku, name, reference_minor, active) VALUES (?, ?, ?, 1)
         ON CONFLICT (sku) DO UPDATE SET name = excluded.name,
                                         reference_minor = excluded.reference_minor",
    )
    .bind(sku)
    .bind(name)
    .bind(reference_minor)
    .execute(&db.pool)
    .await?;
    Ok(())
}

pub async fn product_by_sku(db: &Db, sku: &str) -> Result<Option<Product>> {
    let row = sqlx::query_as::<_, Product>(
        "SELECT sku, name, reference_minor, active FROM products WHERE sku = ?",
    )
    .bind(sku)
    .fetch_optional(&db.pool)
    .await?;
    Ok(row)
}

pub async fn product_by_name(db: &Db, name: &str) -> Result<Option<Product>> {
    let row = sqlx::query_as::<_, Product>(
        "SELECT sku, name, reference_minor, active FROM products
         WHERE name = ? COLLATE NOCASE",
    )
    .bind(name)
    .fetch_optional(&db.pool)
    .await?;
    Ok(row)
}

/// Active products eligible for a price run, stable sku ordering.
pub async fn active_products(db: &Db, limit: Option<i64>) -> Result<Vec<Product>> {
    let rows = sqlx::query_as::<_, Product>(
        "SELECT sku, name, reference_minor, active FROM products
         WHERE active = 1 AND name <> ''
         ORDER BY sku
         LIMIT ?",
    )
    .bind(limit.unwrap_or(-1))
    .fetch_all(&db.pool)
    .await?;
    Ok(rows)
}

pub async fn count_products(db: &Db) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
        .fetch_one(&db.pool)
        .await?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_and_lookup_roundtrip() {
        let db = Db::connect_memory().await.expect("connect");
        insert_product(&db, "99120101368", "Space Marine Intercessors", Some(4_500))
            .await
            .expect("insert");

        let by_sku = product_by_sku(&db, "99120101368")
            .await
            .expect("query")
            .expect("present");
        assert_eq!(by_sku.name, "Space Marine Intercessors");
        assert_eq!(by_sku.reference_minor, Some(4_500));
        assert!(by_sku.active);

        let by_name = product_by_name(&db, "space marine intercessors")
            .await
            .expect("query")
            .expect("present");
        assert_eq!(by_name.sku, "99120101368");
    }

    #[tokio::test]
    async fn active_listing_respects_limit_and_order() {
        let db = Db::connect_memory().await.expect("connect");
        insert_product(&db, "B", "Necron Warriors", None).await.unwrap();
        insert_product(&db, "A", "Termagants", None).await.unwrap();
        insert_product(&db, "C", "Plague Marines", None).await.unwrap();

        let two = active_products(&db, Some(2)).await.expect("query");
        assert_eq!(two.len(), 2);
        assert_eq!(two[0].sku, "A");
        assert_eq!(two[1].sku, "B");

        let all = active_products(&db, None).await.expect("query");
        assert_eq!(all.len(), 3);
    }
}
