//! The sequential batch pipeline: load snapshots, fetch histories,
//! normalize, aggregate, settle transfers, compute metrics, render.
//!
//! Every collaborator comes in as a trait object constructed by the
//! caller; nothing here reaches for global state. Per-user fetch failures
//! exclude that user and continue - partial data never aborts the batch.

use crate::config::AppConfig;
use crate::reconcile_core::metrics::{
    compute_subscription_metrics, compute_user_metrics, ProductClasses, UserSnapshot,
};
use crate::reconcile_core::normalizer::build_transaction_records;
use crate::reconcile_core::payouts::{compute_influencer_payouts, InfluencerPayout};
use crate::reconcile_core::transfer::TransferOrchestrator;
use crate::report::{render_csv, ReportData};
use crate::store_core::ledger::LedgerStore;
use crate::store_core::payments::PaymentsClient;
use crate::store_core::purchases::{DecodedTransaction, TransactionSource};
use crate::store_core::users::{self, UserDirectory};
use crate::window::ReportingWindow;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::PathBuf;

pub struct RunSummary {
    pub run_id: String,
    pub user_count: usize,
    pub record_count: usize,
    pub total_revenue: Decimal,
    pub total_affiliate_payout: Decimal,
    pub payouts: HashMap<String, InfluencerPayout>,
    pub report_path: PathBuf,
}

async fn fetch_transactions_for_users(
    source: &dyn TransactionSource,
    snapshots: &[UserSnapshot],
) -> HashMap<String, Vec<DecodedTransaction>> {
    let mut transactions = HashMap::new();

    for user in snapshots {
        let original_transaction_id = match user.original_transaction_id() {
            Some(id) => id,
            None => {
                log::debug!(
                    "Skipping user {} because originalTransactionID is missing or zero.",
                    user.uid
                );
                continue;
            }
        };

        match source
            .transaction_history(&original_transaction_id, user.environment())
            .await
        {
            Ok(history) => {
                transactions.insert(user.uid.clone(), history);
            }
            Err(e) => {
                log::error!(
                    "Failed to fetch transactions for user {} (originalTransactionId={}): {}",
                    user.uid,
                    original_transaction_id,
                    e
                );
            }
        }
    }

    transactions
}

pub async fn run(
    config: &AppConfig,
    window: &ReportingWindow,
    run_id: &str,
    source: &dyn TransactionSource,
    directory: &dyn UserDirectory,
    ledger: &dyn LedgerStore,
    payments: &dyn PaymentsClient,
) -> Result<RunSummary, Box<dyn std::error::Error>> {
    log::info!(
        "Reporting window: {} to {}",
        window.start.to_rfc3339(),
        window.end.to_rfc3339()
    );

    let identities = directory.list_users().await?;
    let documents = directory.user_documents().await?;
    let code_documents = directory.referral_code_documents().await?;

    let snapshots = users::collect_user_snapshots(&identities, &documents);
    let referral_info = users::collect_referral_info(&documents);

    // Mirror directory identity into the ledger, then read back the merged
    // view: identity from the directory, durable payout state (processed
    // ids, cumulative totals) from the ledger.
    let directory_codes = users::collect_referral_codes(&code_documents);
    for snapshot in directory_codes.values() {
        ledger.upsert_referral_code(snapshot).await?;
    }
    let referral_codes = ledger.load_referral_codes().await?;

    let transactions_by_user = fetch_transactions_for_users(source, &snapshots).await;

    let records = build_transaction_records(
        &transactions_by_user,
        &referral_info,
        config.catalog.expected_prices(),
        window,
    );

    let total_revenue: Decimal = records.iter().map(|r| r.price).sum();

    let mut payouts = compute_influencer_payouts(&records, &referral_codes, config.affiliate_share);
    let total_affiliate_payout: Decimal = payouts.values().map(|p| p.total_payout).sum();

    let orchestrator =
        TransferOrchestrator::new(payments, ledger, run_id, &config.payout_currency);
    orchestrator.settle_all(&mut payouts).await;

    let user_metrics = compute_user_metrics(&snapshots, window);
    let classes = ProductClasses {
        monthly: config.catalog.monthly_id.clone(),
        yearly: config.catalog.yearly_id.clone(),
        lifetime: config.catalog.lifetime_id.clone(),
    };
    let subscription_metrics =
        compute_subscription_metrics(&snapshots, &transactions_by_user, window, &classes);

    let report_path = config
        .output_dir
        .join("reports")
        .join(window.date_folder())
        .join(format!("{}.csv", run_id));
    render_csv(
        &report_path,
        &ReportData {
            run_id,
            window,
            user_metrics: &user_metrics,
            subscription_metrics: &subscription_metrics,
            payouts: &payouts,
            transactions: &records,
            total_revenue,
            total_affiliate_payout,
            currency: &config.report_currency,
        },
    )?;

    log::info!(
        "✅ Run {} complete: {} records, revenue {} {}, affiliate share {} {}",
        run_id,
        records.len(),
        total_revenue,
        config.report_currency,
        total_affiliate_payout,
        config.report_currency
    );

    Ok(RunSummary {
        run_id: run_id.to_string(),
        user_count: snapshots.len(),
        record_count: records.len(),
        total_revenue,
        total_affiliate_payout,
        payouts,
        report_path,
    })
}
