//! Per-code transfer state machine
//!
//! Each referral code's payout is settled independently. Every state is
//! terminal for the run; the ledger is mutated only in the `Executed`
//! branch, through a single atomic write.

use crate::reconcile_core::payouts::InfluencerPayout;
use crate::store_core::ledger::{LedgerStore, PayoutRunRecord};
use crate::store_core::payments::{PaymentsClient, TransferRequest};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};

/// Terminal settlement outcome for one referral code in one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutState {
    NoTransactions,
    NonPositive,
    MissingAccount,
    DryRun,
    Executed,
    Failed,
}

impl PayoutState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutState::NoTransactions => "NO_TRANSACTIONS",
            PayoutState::NonPositive => "NON_POSITIVE",
            PayoutState::MissingAccount => "MISSING_ACCOUNT",
            PayoutState::DryRun => "DRY_RUN",
            PayoutState::Executed => "EXECUTED",
            PayoutState::Failed => "FAILED",
        }
    }
}

/// How many transaction ids are carried in transfer metadata for
/// traceability; the full list always goes to the ledger.
const METADATA_TRANSACTION_LIMIT: usize = 20;

pub struct TransferOrchestrator<'a> {
    payments: &'a dyn PaymentsClient,
    ledger: &'a dyn LedgerStore,
    run_id: String,
    payout_currency: String,
}

impl<'a> TransferOrchestrator<'a> {
    pub fn new(
        payments: &'a dyn PaymentsClient,
        ledger: &'a dyn LedgerStore,
        run_id: &str,
        payout_currency: &str,
    ) -> Self {
        Self {
            payments,
            ledger,
            run_id: run_id.to_string(),
            payout_currency: payout_currency.to_string(),
        }
    }

    /// Settle every payout in turn. Codes are independent; a failure on
    /// one never stops the rest.
    pub async fn settle_all(&self, payouts: &mut HashMap<String, InfluencerPayout>) {
        for payout in payouts.values_mut() {
            let state = self.settle(payout).await;
            log::info!(
                "Referral {} settled as {} (payout {} {})",
                payout.referral_code,
                state.as_str(),
                payout.total_payout,
                payout.currency
            );
        }
    }

    pub async fn settle(&self, payout: &mut InfluencerPayout) -> PayoutState {
        let state = self.evaluate(payout).await;
        payout.state = Some(state);
        state
    }

    async fn evaluate(&self, payout: &mut InfluencerPayout) -> PayoutState {
        payout.dry_run = self.payments.is_dry_run();

        if payout.transaction_ids.is_empty() {
            payout
                .notes
                .push("No new referral transactions in this window.".to_string());
            return PayoutState::NoTransactions;
        }

        if payout.total_payout <= Decimal::ZERO {
            if payout.total_payout < Decimal::ZERO {
                payout
                    .notes
                    .push("Net negative balance (credit carried forward).".to_string());
            } else {
                payout.notes.push("No positive payout due.".to_string());
            }
            return PayoutState::NonPositive;
        }

        let account = match payout.payout_account_id.clone() {
            Some(account) => account,
            None => {
                payout
                    .notes
                    .push("Missing payout account ID; manual follow-up required.".to_string());
                log::warn!(
                    "Referral {} has no payout account; skipping transfer.",
                    payout.referral_code
                );
                return PayoutState::MissingAccount;
            }
        };

        let unique_ids: Vec<String> = payout
            .transaction_ids
            .iter()
            .cloned()
            .collect::<BTreeSet<String>>()
            .into_iter()
            .collect();

        let mut metadata = HashMap::new();
        metadata.insert("run_id".to_string(), self.run_id.clone());
        metadata.insert("referral_code".to_string(), payout.referral_code.clone());
        metadata.insert(
            "transactions".to_string(),
            unique_ids
                .iter()
                .take(METADATA_TRANSACTION_LIMIT)
                .cloned()
                .collect::<Vec<_>>()
                .join(","),
        );

        let request = TransferRequest {
            amount: payout.total_payout,
            currency: self.payout_currency.clone(),
            destination_account: account,
            metadata,
        };
        let result = self.payments.create_transfer(&request).await;
        payout.transfer_id = result.transfer_id.clone();
        payout.dry_run = result.dry_run;

        if result.dry_run {
            payout
                .notes
                .push("Dry-run mode: transfer not sent.".to_string());
            return PayoutState::DryRun;
        }

        if let Some(error) = result.error_message {
            payout.notes.push(format!("Transfer error: {}", error));
            return PayoutState::Failed;
        }

        let transfer_id = match result.transfer_id {
            Some(id) => id,
            None => {
                payout
                    .notes
                    .push("Transfer failed without an id; see logs.".to_string());
                return PayoutState::Failed;
            }
        };

        let new_total_paid = payout.existing_total_paid + payout.total_payout;
        let record = PayoutRunRecord {
            referral_code: payout.referral_code.clone(),
            run_id: self.run_id.clone(),
            amount: payout.total_payout,
            new_total_paid,
            currency: self.payout_currency.clone(),
            transaction_ids: unique_ids,
            transfer_id: transfer_id.clone(),
            executed_at: Utc::now(),
        };

        match self.ledger.record_payout_run(&record).await {
            Ok(()) => {
                payout.existing_total_paid = new_total_paid;
                payout.notes.push(format!("Transfer {} sent.", transfer_id));
                payout.notes.push(format!(
                    "Lifetime paid: {:.2} {}",
                    new_total_paid, self.payout_currency
                ));
                PayoutState::Executed
            }
            Err(e) => {
                // The money moved; the run must not pretend otherwise.
                log::error!(
                    "Ledger update failed after transfer {} for referral {}: {}",
                    transfer_id,
                    payout.referral_code,
                    e
                );
                payout.notes.push(format!(
                    "Transfer {} sent but ledger update failed: {}; manual reconciliation required.",
                    transfer_id, e
                ));
                PayoutState::Executed
            }
        }
    }
}
