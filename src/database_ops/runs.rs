//! RunRecord persistence. One row per orchestrator invocation; created when
//! the run enters `running` and finalized exactly once on its exit path.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::db::Db;
use crate::sources::SourceKind;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_RUNNING: &str = "running";
pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_FAILED: &str = "failed";

#[derive(Debug, Clone, FromRow)]
pub struct RunRecord {
    pub id: i64,
    pub source: String,
    pub status: String,
    pub products_examined: i64,
    pub prices_updated: i64,
    pub error_log: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

pub async fn create_run(db: &Db, source: SourceKind) -> Result<i64> {
    let res = sqlx::query(
        "INSERT INTO runs (source, status, started_at) VALUES (?, ?, ?)",
    )
    .bind(source.key())
    .bind(STATUS_RUNNING)
    .bind(Utc::now())
    .execute(&db.pool)
    .await?;
    Ok(res.last_insert_rowid())
}

pub async fn finalize_run(
    db: &Db,
    run_id: i64,
    status: &str,
    products_examined: i64,
    prices_updated: i64,
    error_log: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE runs SET status = ?, products_examined = ?, prices_updated = ?,
                         error_log = ?, finished_at = ?
         WHERE id = ?",
    )
    .bind(status)
    .bind(products_examined)
    .bind(prices_updated)
    .bind(error_log)
    .bind(Utc::now())
    .bind(run_id)
    .execute(&db.pool)
    .await?;
    Ok(())
}

pub async fn run_by_id(db: &Db, run_id: i64) -> Result<Option<RunRecord>> {
    let row = sqlx::query_as::<_, RunRecord>(
        "SELECT id, source, status, products_examined, prices_updated, error_log,
                started_at, finished_at
         FROM runs WHERE id = ?",
    )
    .bind(run_id)
    .fetch_optional(&db.pool)
    .await?;
    Ok(row)
}

pub async fn recent_runs(db: &Db, limit: i64) -> Result<Vec<RunRecord>> {
    let rows = sqlx::query_as::<_, RunRecord>(
        "SELECT id, source, status, products_examined, prices_updated, error_log,
                started_at, finished_at
         FROM runs ORDER BY started_at DESC, id DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(&db.pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_lifecycle_create_then_finalize() {
        let db = Db::connect_memory().await.expect("connect");
        let id = create_run(&db, SourceKind::EbayBrowse).await.expect("create");

        let open = run_by_id(&db, id).await.unwrap().unwrap();
        assert_eq!(open.status, STATUS_RUNNING);
        assert!(open.finished_at.is_none());

        finalize_run(&db, id, STATUS_SUCCESS, 5, 3, "").await.expect("finalize");
        let done = run_by_id(&db, id).await.unwrap().unwrap();
        assert_eq!(done.status, STATUS_SUCCESS);
        assert_eq!(done.products_examined, 5);
        assert_eq!(done.prices_updated, 3);
        assert!(done.finished_at.is_some());
    }

    #[tokio::test]
    async fn recent_runs_newest_first() {
        let db = Db::connect_memory().await.expect("connect");
        let a = create_run(&db, SourceKind::GwStore).await.unwrap();
        let b = create_run(&db, SourceKind::GwStore).await.unwrap();
        let runs = recent_runs(&db, 10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, b);
        assert_eq!(runs[1].id, a);
    }
}
