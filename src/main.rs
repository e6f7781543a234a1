//! refflow - Referral Reconciliation and Payout Runtime
//!
//! Fetches purchase histories, attributes revenue to referral codes,
//! settles affiliate transfers against the durable ledger, and writes the
//! CSV report.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release -- [--start ISO8601] [--end ISO8601] \
//!     [--output DIR] [--ledger PATH] [--manual] [--execute]
//! ```
//!
//! Transfers are dry-run by default; pass `--execute` to move money.
//!
//! ## Environment Variables
//!
//! - PURCHASE_API_BASE_URL / PURCHASE_API_KEY - purchase-verification API (required)
//! - USER_STORE_BASE_URL / USER_STORE_API_KEY - user/referral directory
//! - PAYMENTS_BASE_URL / PAYMENTS_SECRET_KEY - payments processor
//! - LEDGER_DB_PATH - referral ledger database (default: data/refflow.db)
//! - REFFLOW_OUTPUT_DIR - report output directory (default: reports)
//! - AFFILIATE_SHARE - fraction of attributed revenue owed (default: 0.40)
//! - REFFLOW_DRY_RUN - default transfer mode (default: true)
//! - RUST_LOG - logging level (optional, default: info)

pub mod config;
pub mod window;

pub mod reconcile_core;
pub mod store_core;
pub mod report;
pub mod run;

use chrono::{DateTime, Utc};
use crate::config::AppConfig;
use crate::store_core::{
    HttpPaymentsClient, PurchaseHistoryClient, SqliteLedger, UserDirectoryClient,
};
use crate::window::ReportingWindow;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Default)]
struct CliArgs {
    start: Option<String>,
    end: Option<String>,
    output: Option<PathBuf>,
    ledger: Option<String>,
    manual: bool,
    execute: bool,
}

fn parse_args() -> Result<CliArgs, String> {
    let mut parsed = CliArgs::default();
    let mut args = env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--start" => {
                parsed.start = Some(args.next().ok_or("--start requires a value")?);
            }
            "--end" => {
                parsed.end = Some(args.next().ok_or("--end requires a value")?);
            }
            "--output" => {
                parsed.output = Some(args.next().ok_or("--output requires a value")?.into());
            }
            "--ledger" => {
                parsed.ledger = Some(args.next().ok_or("--ledger requires a value")?);
            }
            "--manual" => parsed.manual = true,
            "--execute" => parsed.execute = true,
            other => return Err(format!("Unknown argument: {}", other)),
        }
    }

    Ok(parsed)
}

fn parse_iso(value: &str, flag: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| format!("{} must be an ISO 8601 timestamp: {}", flag, e))
}

fn determine_window(args: &CliArgs) -> Result<ReportingWindow, Box<dyn std::error::Error>> {
    let default = ReportingWindow::last_days(7);
    let start = match &args.start {
        Some(raw) => parse_iso(raw, "--start")?,
        None => default.start,
    };
    let end = match &args.end {
        Some(raw) => parse_iso(raw, "--end")?,
        None => default.end,
    };
    Ok(ReportingWindow::new(start, end)?)
}

async fn run_report() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args()?;

    let mut config = AppConfig::from_env()?;
    let window = determine_window(&args)?;
    if let Some(output) = args.output {
        config.output_dir = output;
    }
    if let Some(ledger_path) = args.ledger {
        config.ledger_db_path = ledger_path;
    }
    if args.execute {
        config.dry_run = false;
    }

    let run_id = if args.manual {
        Utc::now().format("%Y%m%d_%H%M%S_manual").to_string()
    } else {
        Utc::now().format("%Y%m%d_%H%M%S").to_string()
    };

    log::info!("🚀 Starting payout reconciliation run {}", run_id);
    log::info!("   Ledger: {}", config.ledger_db_path);
    log::info!("   Output: {}", config.output_dir.display());
    log::info!("   Affiliate share: {}", config.affiliate_share);
    log::info!("   Dry run: {}", config.dry_run);

    let purchases = PurchaseHistoryClient::new(
        config.purchase_api_base_url.clone(),
        config.purchase_api_sandbox_url.clone(),
        config.purchase_api_key.clone(),
    )?;
    let directory = UserDirectoryClient::new(
        config.user_store_base_url.clone(),
        config.user_store_api_key.clone(),
    )?;
    let ledger = SqliteLedger::open(&config.ledger_db_path)?;
    let payments = HttpPaymentsClient::new(
        config.payments_base_url.clone(),
        config.payments_secret_key.clone(),
        config.dry_run,
        config.transfer_description.clone(),
    )?;

    let summary = run::run(
        &config, &window, &run_id, &purchases, &directory, &ledger, &payments,
    )
    .await?;

    log::info!("Report written to {}", summary.report_path.display());
    Ok(())
}

#[tokio::main]
pub async fn main() {
    dotenv::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    if let Err(e) = run_report().await {
        log::error!("Payout run aborted: {}", e);
        std::process::exit(1);
    }
}
