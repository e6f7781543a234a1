//! Per-code payout aggregation with the processed-id idempotency guard
//!
//! A transaction id already present in a code's processed set never
//! contributes to a new aggregate; this is the control that makes repeated
//! and resumed runs safe.

use super::transfer::PayoutState;
use crate::reconcile_core::normalizer::TransactionRecord;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::{HashMap, HashSet};

/// Transaction reasons that represent credits back to the buyer; revenue
/// for these reduces the influencer's balance.
pub const NEGATIVE_REASONS: [&str; 4] = ["REFUND", "DOWNGRADE", "REVERSAL", "CHARGEBACK"];

/// Snapshot of a referral code's ledger document at run start.
#[derive(Debug, Clone, Default)]
pub struct ReferralCodeSnapshot {
    pub code: String,
    pub influencer_name: Option<String>,
    pub influencer_email: Option<String>,
    pub payout_account_id: Option<String>,
    pub payout_provider: Option<String>,
    pub payout_frequency: Option<String>,
    pub processed_transaction_ids: HashSet<String>,
    pub total_paid: Decimal,
    pub payout_currency: Option<String>,
}

/// Per-run payout aggregate for one referral code. Built incrementally by
/// the aggregator, finalized by the transfer orchestrator, consumed by the
/// report renderer.
#[derive(Debug, Clone)]
pub struct InfluencerPayout {
    pub referral_code: String,
    pub influencer_name: Option<String>,
    pub influencer_email: Option<String>,
    pub payout_account_id: Option<String>,
    pub payout_provider: Option<String>,
    pub payout_frequency: Option<String>,
    pub total_revenue: Decimal,
    pub total_payout: Decimal,
    pub transaction_count: usize,
    pub transaction_ids: Vec<String>,
    pub existing_total_paid: Decimal,
    pub currency: String,
    pub transfer_id: Option<String>,
    pub dry_run: bool,
    pub state: Option<PayoutState>,
    pub notes: Vec<String>,
}

impl InfluencerPayout {
    fn new(code: &str, snapshot: Option<&ReferralCodeSnapshot>, record_currency: &str) -> Self {
        Self {
            referral_code: code.to_string(),
            influencer_name: snapshot.and_then(|s| s.influencer_name.clone()),
            influencer_email: snapshot.and_then(|s| s.influencer_email.clone()),
            payout_account_id: snapshot.and_then(|s| s.payout_account_id.clone()),
            payout_provider: snapshot.and_then(|s| s.payout_provider.clone()),
            payout_frequency: snapshot.and_then(|s| s.payout_frequency.clone()),
            total_revenue: Decimal::ZERO,
            total_payout: Decimal::ZERO,
            transaction_count: 0,
            transaction_ids: Vec::new(),
            existing_total_paid: snapshot.map(|s| s.total_paid).unwrap_or(Decimal::ZERO),
            currency: snapshot
                .and_then(|s| s.payout_currency.clone())
                .unwrap_or_else(|| record_currency.to_string()),
            transfer_id: None,
            dry_run: true,
            state: None,
            notes: Vec::new(),
        }
    }
}

/// Aggregate attributed revenue into per-code payouts.
///
/// The payout amount is rounded half-even to 2 decimal places per
/// transaction, then summed; the sum can therefore differ slightly from
/// `total_revenue * share` rounded once. That is the intended behavior,
/// not an approximation.
pub fn compute_influencer_payouts(
    transactions: &[TransactionRecord],
    referral_codes: &HashMap<String, ReferralCodeSnapshot>,
    affiliate_share: Decimal,
) -> HashMap<String, InfluencerPayout> {
    let mut payouts: HashMap<String, InfluencerPayout> = HashMap::new();

    for record in transactions {
        let code = match &record.referral_code {
            Some(code) => code,
            None => continue,
        };

        let snapshot = referral_codes.get(code);
        let already_processed = snapshot
            .map(|s| s.processed_transaction_ids.contains(&record.transaction_id))
            .unwrap_or(false);
        if already_processed {
            log::debug!(
                "Skipping transaction {} for referral {} because it has already been processed.",
                record.transaction_id,
                code
            );
            continue;
        }

        let mut revenue = record.price;
        let reason = record
            .transaction_reason
            .as_deref()
            .unwrap_or("")
            .to_uppercase();
        if revenue > Decimal::ZERO && NEGATIVE_REASONS.contains(&reason.as_str()) {
            revenue = -revenue;
        }

        let payout_amount = (revenue * affiliate_share)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven);

        let entry = payouts
            .entry(code.clone())
            .or_insert_with(|| InfluencerPayout::new(code, snapshot, &record.currency));
        entry.total_revenue += revenue;
        entry.total_payout += payout_amount;
        entry.transaction_count += 1;
        entry.transaction_ids.push(record.transaction_id.clone());
    }

    payouts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveDateTime, Utc};

    fn ts(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    fn create_test_record(
        transaction_id: &str,
        code: Option<&str>,
        price: &str,
        reason: Option<&str>,
    ) -> TransactionRecord {
        TransactionRecord {
            user_id: "user1".to_string(),
            referral_code: code.map(|c| c.to_string()),
            product_id: "yearly".to_string(),
            purchase_date: ts("2026-01-02 12:00:00"),
            price: price.parse().unwrap(),
            currency: "USD".to_string(),
            transaction_reason: reason.map(|r| r.to_string()),
            original_transaction_id: "orig_1".to_string(),
            environment: "Production".to_string(),
            transaction_id: transaction_id.to_string(),
        }
    }

    fn share() -> Decimal {
        "0.40".parse().unwrap()
    }

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_end_to_end_totals() {
        let records = vec![
            create_test_record("t1", Some("ALICE10"), "29.99", None),
            create_test_record("t2", Some("ALICE10"), "89.99", None),
        ];
        let payouts = compute_influencer_payouts(&records, &HashMap::new(), share());

        let payout = &payouts["ALICE10"];
        assert_eq!(payout.total_revenue, dec("119.98"));
        // round(29.99 * 0.40) + round(89.99 * 0.40) = 12.00 + 36.00
        assert_eq!(payout.total_payout, dec("48.00"));
        assert_eq!(payout.transaction_count, 2);
        assert_eq!(payout.transaction_ids, vec!["t1", "t2"]);
    }

    #[test]
    fn test_unattributed_records_are_ignored() {
        let records = vec![create_test_record("t1", None, "29.99", None)];
        let payouts = compute_influencer_payouts(&records, &HashMap::new(), share());
        assert!(payouts.is_empty());
    }

    #[test]
    fn test_refund_contributes_negative_revenue() {
        let records = vec![create_test_record("t1", Some("ALICE10"), "29.99", Some("REFUND"))];
        let payouts = compute_influencer_payouts(&records, &HashMap::new(), share());

        let payout = &payouts["ALICE10"];
        assert_eq!(payout.total_revenue, dec("-29.99"));
        assert_eq!(payout.total_payout, dec("-12.00"));
    }

    #[test]
    fn test_reason_is_case_insensitive() {
        let records = vec![create_test_record("t1", Some("ALICE10"), "29.99", Some("chargeback"))];
        let payouts = compute_influencer_payouts(&records, &HashMap::new(), share());
        assert_eq!(payouts["ALICE10"].total_revenue, dec("-29.99"));
    }

    #[test]
    fn test_processed_ids_are_skipped() {
        let mut snapshot = ReferralCodeSnapshot {
            code: "ALICE10".to_string(),
            ..Default::default()
        };
        snapshot.processed_transaction_ids.insert("t1".to_string());
        let mut codes = HashMap::new();
        codes.insert("ALICE10".to_string(), snapshot);

        let records = vec![
            create_test_record("t1", Some("ALICE10"), "29.99", None),
            create_test_record("t2", Some("ALICE10"), "89.99", None),
        ];
        let payouts = compute_influencer_payouts(&records, &codes, share());

        let payout = &payouts["ALICE10"];
        assert_eq!(payout.transaction_ids, vec!["t2"]);
        assert_eq!(payout.total_payout, dec("36.00"));
    }

    #[test]
    fn test_rerun_with_unchanged_ledger_is_identical() {
        let records = vec![
            create_test_record("t1", Some("ALICE10"), "29.99", None),
            create_test_record("t2", Some("ALICE10"), "89.99", None),
        ];
        let codes = HashMap::new();

        let first = compute_influencer_payouts(&records, &codes, share());
        let second = compute_influencer_payouts(&records, &codes, share());

        assert_eq!(first["ALICE10"].total_payout, second["ALICE10"].total_payout);
        assert_eq!(first["ALICE10"].transaction_ids, second["ALICE10"].transaction_ids);
    }

    #[test]
    fn test_all_ids_processed_yields_empty_aggregate_fields() {
        let mut snapshot = ReferralCodeSnapshot {
            code: "ALICE10".to_string(),
            ..Default::default()
        };
        snapshot.processed_transaction_ids.insert("t1".to_string());
        snapshot.processed_transaction_ids.insert("t2".to_string());
        let mut codes = HashMap::new();
        codes.insert("ALICE10".to_string(), snapshot);

        let records = vec![
            create_test_record("t1", Some("ALICE10"), "29.99", None),
            create_test_record("t2", Some("ALICE10"), "89.99", None),
        ];
        let payouts = compute_influencer_payouts(&records, &codes, share());

        // Every record was deduplicated, so no aggregate exists at all
        assert!(payouts.is_empty());
    }

    #[test]
    fn test_rounding_is_half_even_per_transaction() {
        // 0.25 * 0.50 = 0.125 → 0.12 (round to even), 0.75 * 0.50 = 0.375 → 0.38
        let records = vec![
            create_test_record("t1", Some("CODE"), "0.25", None),
            create_test_record("t2", Some("CODE"), "0.75", None),
        ];
        let payouts = compute_influencer_payouts(&records, &HashMap::new(), dec("0.50"));
        assert_eq!(payouts["CODE"].total_payout, dec("0.50"));
    }

    #[test]
    fn test_per_transaction_rounding_differs_from_aggregate() {
        // Three 1.01 purchases at 40%: per-transaction 3 * 0.40 = 1.20,
        // aggregate would be round(3.03 * 0.40) = 1.21. The per-transaction
        // figure is the contract.
        let records = vec![
            create_test_record("t1", Some("CODE"), "1.01", None),
            create_test_record("t2", Some("CODE"), "1.01", None),
            create_test_record("t3", Some("CODE"), "1.01", None),
        ];
        let payouts = compute_influencer_payouts(&records, &HashMap::new(), share());

        let payout = &payouts["CODE"];
        assert_eq!(payout.total_revenue, dec("3.03"));
        assert_eq!(payout.total_payout, dec("1.20"));
    }

    #[test]
    fn test_identity_copied_from_snapshot() {
        let snapshot = ReferralCodeSnapshot {
            code: "ALICE10".to_string(),
            influencer_name: Some("Alice".to_string()),
            payout_account_id: Some("acct_123".to_string()),
            total_paid: dec("100.00"),
            payout_currency: Some("EUR".to_string()),
            ..Default::default()
        };
        let mut codes = HashMap::new();
        codes.insert("ALICE10".to_string(), snapshot);

        let records = vec![create_test_record("t1", Some("ALICE10"), "29.99", None)];
        let payouts = compute_influencer_payouts(&records, &codes, share());

        let payout = &payouts["ALICE10"];
        assert_eq!(payout.influencer_name.as_deref(), Some("Alice"));
        assert_eq!(payout.payout_account_id.as_deref(), Some("acct_123"));
        assert_eq!(payout.existing_total_paid, dec("100.00"));
        assert_eq!(payout.currency, "EUR");
    }
}
