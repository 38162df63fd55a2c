use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

/// Idempotent schema bootstrap. The catalog itself is owned by an external
/// collaborator; `products` here is the minimal read model this core needs.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS products (
    sku             TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    reference_minor INTEGER,
    active          INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS current_prices (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    product_sku    TEXT NOT NULL REFERENCES products(sku),
    source         TEXT NOT NULL,
    amount_minor   INTEGER,
    url            TEXT NOT NULL DEFAULT '',
    in_stock       INTEGER NOT NULL DEFAULT 0,
    not_available  INTEGER NOT NULL DEFAULT 0,
    last_seen_at   TEXT NOT NULL,
    UNIQUE (product_sku, source)
);

CREATE TABLE IF NOT EXISTS price_history (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    product_sku  TEXT NOT NULL,
    source       TEXT NOT NULL,
    amount_minor INTEGER NOT NULL,
    in_stock     INTEGER NOT NULL DEFAULT 1,
    recorded_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_price_history_series
    ON price_history (product_sku, source, recorded_at);

CREATE TABLE IF NOT EXISTS runs (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    source            TEXT NOT NULL,
    status            TEXT NOT NULL,
    products_examined INTEGER NOT NULL DEFAULT 0,
    prices_updated    INTEGER NOT NULL DEFAULT 0,
    error_log         TEXT NOT NULL DEFAULT '',
    started_at        TEXT NOT NULL,
    finished_at       TEXT
);
"#;

#[derive(Clone)]
pub struct Db {
    pub pool: SqlitePool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let connect_options =
            SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(connect_options)
            .await?;
        info!("connected to db");
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Single-connection in-memory database for tests and dry runs.
    pub async fn connect_memory() -> Result<Self> {
        Self::connect("sqlite::memory:", 1).await
    }
}
