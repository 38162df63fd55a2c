use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use miniprice::database_ops::{catalog, db::Db, prices, runs};
use miniprice::runner::{run_source, RunOptions, RunSummary};
use miniprice::sources::ebay_browse::EbayBrowseClient;
use miniprice::sources::ebay_finding::EbayFindingClient;
use miniprice::sources::gwstore::GwStoreClient;
use miniprice::sources::PriceSource;
use miniprice::util::env;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "wpc", version, about = "Miniature price reconciliation CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Optional override for the database URL
    #[arg(long)]
    db_url: Option<String>,
    /// Maximum number of products to examine this run
    #[arg(long)]
    limit: Option<i64>,
    /// Validate and report without persisting anything
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    /// Override the inter-request delay in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,
    /// Candidates requested per product search
    #[arg(long, default_value_t = 10)]
    max_results: usize,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Refresh prices from the official webstore (HTML scrape)
    Gwstore(RunArgs),
    /// Refresh prices from the eBay Finding API (app-key auth)
    EbayFinding(RunArgs),
    /// Refresh prices from the eBay Browse API (OAuth2 client credentials)
    EbayBrowse(RunArgs),
    /// Show recent price runs with counts and error logs
    Runs {
        #[arg(long)]
        db_url: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// Print row counts for the core tables
    DbCounts {
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Seed a handful of demo catalog products
    SeedDemo {
        #[arg(long)]
        db_url: Option<String>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

async fn connect(db_url: Option<String>) -> Result<Db> {
    let url = db_url.unwrap_or_else(env::db_url);
    Db::connect(&url, 5).await
}

fn run_options(args: &RunArgs) -> RunOptions {
    RunOptions {
        limit: args.limit,
        // MINIPRICE_DRY_RUN=1 forces dry runs without touching invocations
        dry_run: args.dry_run || env::env_flag("MINIPRICE_DRY_RUN", false),
        delay: Duration::from_millis(args.delay_ms.unwrap_or(1_000)),
        max_results: args.max_results,
    }
}

fn print_summary(summary: &RunSummary) {
    println!(
        "run {} status={} examined={} updated={} not_found={} errored={}{}",
        summary
            .run_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "(dry-run)".to_string()),
        summary.status,
        summary.examined,
        summary.updated,
        summary.not_found,
        summary.errored,
        if summary.budget_exhausted {
            " [budget exhausted]"
        } else {
            ""
        }
    );
    if !summary.error_log.is_empty() {
        println!("--- error log ---");
        println!("{}", summary.error_log);
    }
}

async fn run_with(source: &mut dyn PriceSource, args: RunArgs) -> Result<()> {
    let db = connect(args.db_url.clone()).await?;
    let summary = run_source(&db, source, &run_options(&args)).await?;
    print_summary(&summary);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    env::init_env();

    let cli = Cli::parse();
    match cli.command {
        Commands::Gwstore(args) => {
            let mut source = GwStoreClient::from_env()?;
            if let Some(ms) = args.delay_ms {
                source = source.with_delay(Duration::from_millis(ms));
            }
            run_with(&mut source, args).await
        }
        Commands::EbayFinding(args) => {
            // missing EBAY_APP_ID is a configuration error: fail before any run
            let mut source = EbayFindingClient::from_env()?;
            if let Some(ms) = args.delay_ms {
                source = source.with_delay(Duration::from_millis(ms));
            }
            run_with(&mut source, args).await
        }
        Commands::EbayBrowse(args) => {
            let mut source = EbayBrowseClient::from_env()?;
            if let Some(ms) = args.delay_ms {
                source = source.with_delay(Duration::from_millis(ms));
            }
            run_with(&mut source, args).await
        }
        Commands::Runs { db_url, limit } => {
            let db = connect(db_url).await?;
            for run in runs::recent_runs(&db, limit).await? {
                let duration = run
                    .finished_at
                    .map(|f| format!("{}s", (f - run.started_at).num_seconds()))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "#{} {} {} examined={} updated={} took={} started={}",
                    run.id,
                    run.source,
                    run.status,
                    run.products_examined,
                    run.prices_updated,
                    duration,
                    run.started_at.to_rfc3339()
                );
                if !run.error_log.is_empty() {
                    for line in run.error_log.lines() {
                        println!("    {line}");
                    }
                }
            }
            Ok(())
        }
        Commands::DbCounts { db_url } => {
            let db = connect(db_url).await?;
            println!("products:       {}", catalog::count_products(&db).await?);
            println!("current_prices: {}", prices::count_current_prices(&db).await?);
            println!("price_history:  {}", prices::count_history(&db).await?);
            println!("runs:           {}", runs::recent_runs(&db, i64::MAX).await?.len());
            Ok(())
        }
        Commands::SeedDemo { db_url } => {
            let db = connect(db_url).await?;
            let demo: &[(&str, &str, Option<i64>)] = &[
                ("99120101368", "Space Marine Intercessors", Some(4_500)),
                ("99120110055", "Necron Warriors", Some(3_825)),
                ("99120102124", "Death Guard Plague Marines", Some(4_750)),
                ("99189950052", "Citadel Colour Abaddon Black", Some(325)),
                ("99120106047", "Adeptus Mechanicus Serberys Raiders", Some(4_000)),
            ];
            for (sku, name, reference) in demo {
                catalog::insert_product(&db, sku, name, *reference).await?;
            }
            println!("seeded {} demo products", demo.len());
            Ok(())
        }
    }
}
