//! User-growth and subscription-growth metrics over the reporting window
//!
//! Independent of the payout path but sharing its input snapshots. All
//! ratios guard the zero denominator and return 0.0 instead of dividing.

use crate::store_core::purchases::DecodedTransaction;
use crate::window::ReportingWindow;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Immutable per-user snapshot assembled at run start from the directory.
#[derive(Debug, Clone)]
pub struct UserSnapshot {
    pub uid: String,
    pub email: Option<String>,
    pub creation_time: DateTime<Utc>,
    pub referral_code: Option<String>,
    pub referral_code_claimed_at: Option<DateTime<Utc>>,
    pub referral_purchase_product_id: Option<String>,
    pub referral_purchase_date: Option<DateTime<Utc>>,
    pub subscription_status: serde_json::Value,
    pub is_referral_purchase: bool,
}

impl UserSnapshot {
    /// The subscription identity used to fetch purchase history. Missing,
    /// empty, or zero ids mean the user has never subscribed.
    pub fn original_transaction_id(&self) -> Option<String> {
        match self.subscription_status.get("originalTransactionID") {
            Some(serde_json::Value::String(s)) => {
                let trimmed = s.trim();
                if trimmed.is_empty() || trimmed == "0" {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            Some(serde_json::Value::Number(n)) => match n.as_i64() {
                Some(0) | None => None,
                Some(id) => Some(id.to_string()),
            },
            _ => None,
        }
    }

    pub fn environment(&self) -> Option<&str> {
        self.subscription_status
            .get("environment")
            .and_then(|v| v.as_str())
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[derive(Debug, Clone)]
pub struct UserMetrics {
    pub total_users: usize,
    pub new_users: usize,
    pub total_referred_users: usize,
    pub new_referred_users: usize,
    pub new_referred_ratio: f64,
    pub total_referred_ratio: f64,
}

pub fn compute_user_metrics(users: &[UserSnapshot], window: &ReportingWindow) -> UserMetrics {
    let total_users = users.len();
    let new_users: Vec<&UserSnapshot> = users
        .iter()
        .filter(|u| window.contains(u.creation_time))
        .collect();
    let total_referred_users = users.iter().filter(|u| u.referral_code.is_some()).count();
    let new_referred_users = new_users
        .iter()
        .filter(|u| u.referral_code.is_some())
        .count();

    log::info!(
        "User metrics: total={}, new={}",
        total_users,
        new_users.len()
    );

    UserMetrics {
        total_users,
        new_users: new_users.len(),
        total_referred_users,
        new_referred_users,
        new_referred_ratio: ratio(new_referred_users, new_users.len()),
        total_referred_ratio: ratio(total_referred_users, total_users),
    }
}

/// The three product classes tracked by subscription metrics
#[derive(Debug, Clone)]
pub struct ProductClasses {
    pub monthly: String,
    pub yearly: String,
    pub lifetime: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProductClassMetrics {
    pub new_subscribers: usize,
    pub active_subscribers: usize,
    pub new_referred_ratio: f64,
    pub active_referred_ratio: f64,
}

#[derive(Debug, Clone)]
pub struct SubscriptionMetrics {
    pub monthly: ProductClassMetrics,
    pub yearly: ProductClassMetrics,
    pub lifetime: ProductClassMetrics,
}

/// Determine new vs active subscribers per product class.
///
/// A user is a new subscriber when their first purchase of the product
/// falls inside the window. A one-time product is active once purchased;
/// recurring products are active when the latest transaction's expiry
/// reaches the window end. Uses the decoded transactions because the
/// active check needs the expiry timestamp.
pub fn compute_subscription_metrics(
    users: &[UserSnapshot],
    transactions_by_user: &HashMap<String, Vec<DecodedTransaction>>,
    window: &ReportingWindow,
    classes: &ProductClasses,
) -> SubscriptionMetrics {
    let user_map: HashMap<&str, &UserSnapshot> =
        users.iter().map(|u| (u.uid.as_str(), u)).collect();

    let class_metrics = |product_id: &str, one_time: bool| -> ProductClassMetrics {
        let mut new_subscribers: HashSet<&str> = HashSet::new();
        let mut active_subscribers: HashSet<&str> = HashSet::new();

        for (uid, txs) in transactions_by_user {
            let mut product_txs: Vec<&DecodedTransaction> = txs
                .iter()
                .filter(|t| t.product_id == product_id && t.purchase_date.is_some())
                .collect();
            if product_txs.is_empty() {
                continue;
            }
            // Ascending by purchase time: first element decides "new",
            // last element decides "active"
            product_txs.sort_by_key(|t| t.purchase_date);

            if let Some(first_purchase) = product_txs[0].purchase_date {
                if window.contains(first_purchase) {
                    new_subscribers.insert(uid.as_str());
                }
            }

            let latest = product_txs[product_txs.len() - 1];
            let is_active = if one_time {
                true
            } else {
                latest.expires_date.map_or(false, |exp| exp >= window.end)
            };
            if is_active {
                active_subscribers.insert(uid.as_str());
            }
        }

        let referred = |uids: &HashSet<&str>| {
            uids.iter()
                .filter(|uid| {
                    user_map
                        .get(*uid)
                        .map_or(false, |u| u.referral_code.is_some())
                })
                .count()
        };

        ProductClassMetrics {
            new_subscribers: new_subscribers.len(),
            active_subscribers: active_subscribers.len(),
            new_referred_ratio: ratio(referred(&new_subscribers), new_subscribers.len()),
            active_referred_ratio: ratio(referred(&active_subscribers), active_subscribers.len()),
        }
    };

    SubscriptionMetrics {
        monthly: class_metrics(&classes.monthly, false),
        yearly: class_metrics(&classes.yearly, false),
        lifetime: class_metrics(&classes.lifetime, true),
    }
}
