//! Run orchestration: iterate eligible products against one fetch client,
//! validate candidates in source order, persist outcomes and keep a
//! RunRecord. One bad product never aborts the run.

use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::database_ops::catalog::{self, Product};
use crate::database_ops::db::Db;
use crate::database_ops::prices;
use crate::database_ops::runs::{self, STATUS_FAILED, STATUS_SUCCESS};
use crate::query::build_query;
use crate::sources::{FetchError, PriceSource};
use crate::validate::is_valid;

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Cap on how many products this run examines (None = all active).
    pub limit: Option<i64>,
    /// Validate and count, but write nothing (no prices, no RunRecord).
    pub dry_run: bool,
    /// Pause between products, applied after each product regardless of outcome.
    pub delay: Duration,
    /// Candidates requested per search.
    pub max_results: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            limit: None,
            dry_run: false,
            delay: Duration::from_secs(1),
            max_results: 10,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub run_id: Option<i64>,
    pub examined: u64,
    pub updated: u64,
    pub not_found: u64,
    pub errored: u64,
    pub budget_exhausted: bool,
    pub status: String,
    pub error_log: String,
}

enum ProductOutcome {
    Updated,
    NotFound,
}

/// Execute one full run of `source` over the active catalog.
///
/// Per-product failures are appended to the error log and the run moves on;
/// budget exhaustion stops iteration early but still finalizes the run as
/// a success with a note. The RunRecord always leaves `running` on every
/// exit path.
pub async fn run_source(
    db: &Db,
    source: &mut dyn PriceSource,
    opts: &RunOptions,
) -> Result<RunSummary> {
    let products = catalog::active_products(db, opts.limit).await?;
    info!(
        source = %source.kind(),
        products = products.len(),
        dry_run = opts.dry_run,
        "starting price run"
    );

    let run_id = if opts.dry_run {
        None
    } else {
        Some(runs::create_run(db, source.kind()).await?)
    };

    let mut summary = RunSummary {
        run_id,
        ..RunSummary::default()
    };
    let mut error_lines: Vec<String> = Vec::new();

    let outcome = drive(db, source, &products, opts, &mut summary, &mut error_lines).await;

    if summary.budget_exhausted {
        error_lines.push(format!(
            "note: call budget exhausted after {} products; remaining products skipped",
            summary.examined
        ));
    }
    summary.error_log = error_lines.join("\n");
    summary.status = if outcome.is_ok() {
        STATUS_SUCCESS.to_string()
    } else {
        STATUS_FAILED.to_string()
    };

    if let Some(run_id) = run_id {
        runs::finalize_run(
            db,
            run_id,
            &summary.status,
            summary.examined as i64,
            summary.updated as i64,
            &summary.error_log,
        )
        .await?;
    }
    outcome?;

    info!(
        source = %source.kind(),
        examined = summary.examined,
        updated = summary.updated,
        not_found = summary.not_found,
        errored = summary.errored,
        "price run finished"
    );
    Ok(summary)
}

async fn drive(
    db: &Db,
    source: &mut dyn PriceSource,
    products: &[Product],
    opts: &RunOptions,
    summary: &mut RunSummary,
    error_lines: &mut Vec<String>,
) -> Result<()> {
    for product in products {
        match check_product(db, source, product, opts).await {
            Ok(ProductOutcome::Updated) => {
                summary.examined += 1;
                summary.updated += 1;
            }
            Ok(ProductOutcome::NotFound) => {
                summary.examined += 1;
                summary.not_found += 1;
            }
            Err(FetchError::BudgetExceeded { .. }) => {
                summary.budget_exhausted = true;
                break;
            }
            Err(e) => {
                summary.examined += 1;
                summary.errored += 1;
                warn!(product = %product.name, error = %e, "product check failed");
                error_lines.push(format!("{}: {}", product.name, e));
            }
        }
        if !opts.delay.is_zero() {
            sleep(opts.delay).await;
        }
    }
    Ok(())
}

async fn check_product(
    db: &Db,
    source: &mut dyn PriceSource,
    product: &Product,
    opts: &RunOptions,
) -> Result<ProductOutcome, FetchError> {
    let query = build_query(&product.name, source.profile().query_max_len);
    let candidates = source.search(&query, opts.max_results).await?;

    // candidates arrive in source order (cheapest first where the source
    // supports server-side sort); the first valid one wins
    let accepted = candidates
        .iter()
        .find(|listing| is_valid(listing, product, source.profile()));

    if !opts.dry_run {
        prices::record(db, product, source.kind(), accepted)
            .await
            .map_err(|e| FetchError::Transport {
                source_key: source.kind().key(),
                detail: format!("persistence failed: {e}"),
            })?;
    }

    Ok(match accepted {
        Some(_) => ProductOutcome::Updated,
        None => ProductOutcome::NotFound,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::{catalog, prices, runs};
    use crate::sources::{RawListing, SourceKind, SourceProfile};
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Scripted stand-in for a fetch client: pops one canned response per
    /// search call, in product order.
    struct ScriptedSource {
        profile: SourceProfile,
        script: VecDeque<Result<Vec<RawListing>, FetchError>>,
        calls: usize,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Vec<RawListing>, FetchError>>) -> Self {
            Self {
                profile: SourceProfile::for_kind(SourceKind::EbayBrowse),
                script: script.into(),
                calls: 0,
            }
        }
    }

    #[async_trait]
    impl PriceSource for ScriptedSource {
        fn kind(&self) -> SourceKind {
            SourceKind::EbayBrowse
        }

        fn profile(&self) -> &SourceProfile {
            &self.profile
        }

        async fn search(
            &mut self,
            _query: &str,
            _max_results: usize,
        ) -> Result<Vec<RawListing>, FetchError> {
            self.calls += 1;
            self.script.pop_front().unwrap_or_else(|| {
                Err(FetchError::BudgetExceeded {
                    source_key: "ebay-browse",
                    limit: 0,
                })
            })
        }
    }

    fn listing_for(name: &str, price_minor: i64) -> RawListing {
        RawListing {
            title: format!("Warhammer {name} brand new"),
            url: "https://www.ebay.com/itm/1".into(),
            item_id: "1".into(),
            price_minor,
            shipping_minor: 0,
        }
    }

    async fn seeded_db(names: &[(&str, &str)]) -> Db {
        let db = Db::connect_memory().await.expect("connect");
        for (sku, name) in names {
            catalog::insert_product(&db, sku, name, None).await.expect("seed");
        }
        db
    }

    fn quick_opts() -> RunOptions {
        RunOptions {
            delay: Duration::ZERO,
            ..RunOptions::default()
        }
    }

    #[tokio::test]
    async fn one_bad_product_never_aborts_the_run() {
        let db = seeded_db(&[
            ("A", "Necron Warriors Squad"),
            ("B", "Plague Marines Squad"),
            ("C", "Space Marine Intercessors"),
        ])
        .await;

        let mut source = ScriptedSource::new(vec![
            Ok(vec![listing_for("Necron Warriors Squad", 3_000)]),
            Err(FetchError::Transport {
                source_key: "ebay-browse",
                detail: "connection reset".into(),
            }),
            Ok(vec![listing_for("Space Marine Intercessors", 3_750)]),
        ]);

        let summary = run_source(&db, &mut source, &quick_opts()).await.expect("run");

        assert_eq!(summary.status, "success");
        assert_eq!(summary.examined, 3);
        assert_eq!(summary.updated, 2);
        assert_eq!(summary.errored, 1);
        assert_eq!(summary.error_log.lines().count(), 1);
        assert!(summary.error_log.contains("Plague Marines Squad"));

        let run = runs::run_by_id(&db, summary.run_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(run.status, "success");
        assert_eq!(run.products_examined, 3);
        assert_eq!(run.prices_updated, 2);
        assert!(run.finished_at.is_some());
    }

    #[tokio::test]
    async fn empty_search_results_record_not_available() {
        let db = seeded_db(&[("A", "Necron Warriors Squad")]).await;
        let mut source = ScriptedSource::new(vec![Ok(vec![])]);

        let summary = run_source(&db, &mut source, &quick_opts()).await.expect("run");
        assert_eq!(summary.not_found, 1);
        assert_eq!(summary.updated, 0);

        let cp = prices::current_price(&db, "A", SourceKind::EbayBrowse)
            .await
            .unwrap()
            .expect("checked row exists");
        assert!(cp.not_available);
        assert_eq!(cp.amount_minor, None);
        assert_eq!(prices::count_history(&db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rejected_candidates_count_as_not_found() {
        let db = seeded_db(&[("A", "Necron Warriors Squad")]).await;
        // title shares no meaningful tokens with the product
        let bogus = RawListing {
            title: "Vintage ceramic teapot".into(),
            url: "https://www.ebay.com/itm/9".into(),
            item_id: "9".into(),
            price_minor: 3_000,
            shipping_minor: 0,
        };
        let mut source = ScriptedSource::new(vec![Ok(vec![bogus])]);

        let summary = run_source(&db, &mut source, &quick_opts()).await.expect("run");
        assert_eq!(summary.not_found, 1);
        assert!(summary.error_log.is_empty());
    }

    #[tokio::test]
    async fn budget_exhaustion_finalizes_success_with_note() {
        let db = seeded_db(&[
            ("A", "Necron Warriors Squad"),
            ("B", "Plague Marines Squad"),
            ("C", "Space Marine Intercessors"),
        ])
        .await;

        let mut source = ScriptedSource::new(vec![
            Ok(vec![listing_for("Necron Warriors Squad", 3_000)]),
            Err(FetchError::BudgetExceeded {
                source_key: "ebay-browse",
                limit: 1,
            }),
        ]);

        let summary = run_source(&db, &mut source, &quick_opts()).await.expect("run");
        assert_eq!(summary.status, "success");
        assert!(summary.budget_exhausted);
        assert_eq!(summary.examined, 1);
        assert!(summary.error_log.contains("budget exhausted"));

        let run = runs::run_by_id(&db, summary.run_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(run.status, "success");
        assert!(run.error_log.contains("note:"));
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let db = seeded_db(&[("A", "Necron Warriors Squad")]).await;
        let mut source =
            ScriptedSource::new(vec![Ok(vec![listing_for("Necron Warriors Squad", 3_000)])]);

        let opts = RunOptions {
            dry_run: true,
            delay: Duration::ZERO,
            ..RunOptions::default()
        };
        let summary = run_source(&db, &mut source, &opts).await.expect("run");

        assert_eq!(summary.updated, 1);
        assert!(summary.run_id.is_none());
        assert_eq!(prices::count_current_prices(&db).await.unwrap(), 0);
        assert_eq!(prices::count_history(&db).await.unwrap(), 0);
        assert!(runs::recent_runs(&db, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn limit_caps_examined_products() {
        let db = seeded_db(&[
            ("A", "Necron Warriors Squad"),
            ("B", "Plague Marines Squad"),
        ])
        .await;
        let mut source =
            ScriptedSource::new(vec![Ok(vec![listing_for("Necron Warriors Squad", 3_000)])]);

        let opts = RunOptions {
            limit: Some(1),
            delay: Duration::ZERO,
            ..RunOptions::default()
        };
        let summary = run_source(&db, &mut source, &opts).await.expect("run");
        assert_eq!(summary.examined, 1);
        assert_eq!(source.calls, 1);
    }
}
