//! Transaction normalization from decoded purchase payloads to canonical records
//!
//! Applies window filtering, the price-correction heuristic for the known
//! upstream unit-scaling defect, and referral attribution.

use crate::store_core::purchases::DecodedTransaction;
use crate::window::ReportingWindow;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

/// Per-user referral attribution input
#[derive(Debug, Clone, Default)]
pub struct ReferralInfo {
    pub code: Option<String>,
    pub used_for_purchase: bool,
}

/// Canonical transaction record. The purchase date always lies inside the
/// reporting window the record was built for.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionRecord {
    pub user_id: String,
    pub referral_code: Option<String>,
    pub product_id: String,
    pub purchase_date: DateTime<Utc>,
    pub price: Decimal,
    pub currency: String,
    pub transaction_reason: Option<String>,
    pub original_transaction_id: String,
    pub environment: String,
    pub transaction_id: String,
}

/// Tolerance bands for the upstream unit-scaling defect: a reported price
/// whose ratio to the expected price lands in a band is divided by that
/// band's factor. The bands are empirical; do not widen them or infer
/// additional factors.
fn scale_bands() -> [(Decimal, Decimal, Decimal); 3] {
    [
        (Decimal::new(99, 0), Decimal::new(101, 0), Decimal::new(100, 0)),
        (Decimal::new(999, 0), Decimal::new(1001, 0), Decimal::new(1000, 0)),
        (
            Decimal::new(9999, 0),
            Decimal::new(10001, 0),
            Decimal::new(10000, 0),
        ),
    ]
}

fn resolve_price(
    reported: Option<f64>,
    expected: Option<Decimal>,
    transaction_id: &str,
    product_id: &str,
) -> Option<Decimal> {
    match reported {
        Some(raw) => {
            let mut value = match Decimal::from_f64(raw) {
                Some(v) => v,
                None => {
                    log::warn!(
                        "Transaction {} (product {}) reported a non-finite price {}",
                        transaction_id,
                        product_id,
                        raw
                    );
                    return expected;
                }
            };
            if let Some(expected) = expected {
                if value != expected && !expected.is_zero() {
                    let ratio = value / expected;
                    for (low, high, factor) in scale_bands() {
                        if ratio >= low && ratio <= high {
                            value = (value / factor).round_dp(2);
                            break;
                        }
                    }
                }
            } else if value >= Decimal::new(1000, 0) {
                // No expected price to compare against; values this large
                // are the same upstream defect reported in minor units.
                value = (value / Decimal::new(1000, 0)).round_dp(2);
            }
            Some(value)
        }
        None => {
            if expected.is_some() {
                log::warn!(
                    "Transaction {} missing price; falling back to static price for product {}",
                    transaction_id,
                    product_id
                );
            }
            expected
        }
    }
}

/// Build canonical records from per-user purchase histories.
///
/// Transactions without a purchase date, outside the window, or with no
/// resolvable price are skipped (non-fatal, logged). A referral code is
/// attached only when the user's code was used for the purchase; other
/// records are retained for metrics but contribute no payout.
pub fn build_transaction_records(
    user_transactions: &HashMap<String, Vec<DecodedTransaction>>,
    user_referrals: &HashMap<String, ReferralInfo>,
    product_prices: &HashMap<String, Decimal>,
    window: &ReportingWindow,
) -> Vec<TransactionRecord> {
    let mut records = Vec::new();

    for (uid, txs) in user_transactions {
        let referral = user_referrals.get(uid);

        for tx in txs {
            let purchase_date = match tx.purchase_date {
                Some(date) => date,
                None => continue,
            };
            if !window.contains(purchase_date) {
                continue;
            }

            let expected = product_prices.get(&tx.product_id).copied();
            let price = match resolve_price(tx.price, expected, &tx.transaction_id, &tx.product_id)
            {
                Some(price) => price,
                None => {
                    log::warn!(
                        "Skipping transaction {} (product {}) because price is unavailable",
                        tx.transaction_id,
                        tx.product_id
                    );
                    continue;
                }
            };

            let referral_code = referral.and_then(|info| {
                if info.used_for_purchase {
                    info.code.clone()
                } else {
                    None
                }
            });

            records.push(TransactionRecord {
                user_id: uid.clone(),
                referral_code,
                product_id: tx.product_id.clone(),
                purchase_date,
                price,
                currency: tx.currency.clone().unwrap_or_else(|| "USD".to_string()),
                transaction_reason: tx.transaction_reason.clone(),
                original_transaction_id: tx.original_transaction_id.clone(),
                environment: tx.environment.clone(),
                transaction_id: tx.transaction_id.clone(),
            });
        }
    }

    log::info!(
        "Built {} transaction records within reporting window.",
        records.len()
    );
    records
}
