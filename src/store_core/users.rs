//! User/referral directory client and boundary normalizers
//!
//! The directory serves loosely-typed, string-keyed documents. Everything
//! the reconciliation core consumes is normalized here: referral codes are
//! uppercased, timestamps parsed, totals coerced to exact decimals, and
//! malformed values degraded with a log line instead of a silent zero
//! where the field is load-bearing.

use crate::reconcile_core::metrics::UserSnapshot;
use crate::reconcile_core::normalizer::ReferralInfo;
use crate::reconcile_core::payouts::ReferralCodeSnapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[derive(Debug)]
pub enum UserDirectoryError {
    Http(reqwest::Error),
    Status(u16),
}

impl From<reqwest::Error> for UserDirectoryError {
    fn from(err: reqwest::Error) -> Self {
        UserDirectoryError::Http(err)
    }
}

impl std::fmt::Display for UserDirectoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserDirectoryError::Http(e) => write!(f, "HTTP error: {}", e),
            UserDirectoryError::Status(code) => {
                write!(f, "User directory returned status {}", code)
            }
        }
    }
}

impl std::error::Error for UserDirectoryError {}

/// One auth identity from the directory listing
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub uid: String,
    pub email: Option<String>,
    /// Account creation time, epoch milliseconds
    pub created_at: i64,
}

/// Loosely-typed per-user document
#[derive(Debug, Clone, Deserialize)]
pub struct UserDocument {
    pub uid: String,
    pub data: Value,
}

/// Loosely-typed referral-code document
#[derive(Debug, Clone, Deserialize)]
pub struct ReferralCodeDocument {
    pub code: String,
    pub data: Value,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn list_users(&self) -> Result<Vec<UserIdentity>, UserDirectoryError>;
    async fn user_documents(&self) -> Result<Vec<UserDocument>, UserDirectoryError>;
    async fn referral_code_documents(&self) -> Result<Vec<ReferralCodeDocument>, UserDirectoryError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserPage {
    users: Vec<UserIdentity>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserDocumentPage {
    documents: Vec<UserDocument>,
}

#[derive(Debug, Deserialize)]
struct ReferralCodePage {
    documents: Vec<ReferralCodeDocument>,
}

pub struct UserDirectoryClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl UserDirectoryClient {
    pub fn new(base_url: String, api_key: String) -> Result<Self, UserDirectoryError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, UserDirectoryError> {
        let response = self.http.get(url).bearer_auth(&self.api_key).send().await?;
        if !response.status().is_success() {
            return Err(UserDirectoryError::Status(response.status().as_u16()));
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl UserDirectory for UserDirectoryClient {
    async fn list_users(&self) -> Result<Vec<UserIdentity>, UserDirectoryError> {
        let mut users = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let url = match &page_token {
                Some(token) => format!("{}?pageToken={}", self.endpoint("v1/users"), token),
                None => self.endpoint("v1/users"),
            };
            let page: UserPage = self.get_json(&url).await?;
            users.extend(page.users);
            log::debug!("Fetched user page (total so far: {})", users.len());
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        log::info!("Loaded {} directory users.", users.len());
        Ok(users)
    }

    async fn user_documents(&self) -> Result<Vec<UserDocument>, UserDirectoryError> {
        let page: UserDocumentPage = self.get_json(&self.endpoint("v1/userDocuments")).await?;
        Ok(page.documents)
    }

    async fn referral_code_documents(&self) -> Result<Vec<ReferralCodeDocument>, UserDirectoryError> {
        let page: ReferralCodePage = self.get_json(&self.endpoint("v1/referralCodes")).await?;
        Ok(page.documents)
    }
}

fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn bool_field(data: &Value, key: &str) -> bool {
    data.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn datetime_field(data: &Value, key: &str) -> Option<DateTime<Utc>> {
    match data.get(key)? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    }
}

/// Join auth identities with their documents into run-owned snapshots.
pub fn collect_user_snapshots(
    identities: &[UserIdentity],
    documents: &[UserDocument],
) -> Vec<UserSnapshot> {
    let doc_map: HashMap<&str, &Value> = documents
        .iter()
        .map(|doc| (doc.uid.as_str(), &doc.data))
        .collect();
    let empty = Value::Null;

    let mut snapshots = Vec::with_capacity(identities.len());
    for identity in identities {
        let creation_time = match DateTime::<Utc>::from_timestamp_millis(identity.created_at) {
            Some(ts) => ts,
            None => {
                log::warn!(
                    "Skipping user {} with out-of-range creation timestamp {}",
                    identity.uid,
                    identity.created_at
                );
                continue;
            }
        };
        let data = doc_map.get(identity.uid.as_str()).copied().unwrap_or(&empty);

        snapshots.push(UserSnapshot {
            uid: identity.uid.clone(),
            email: identity.email.clone(),
            creation_time,
            referral_code: str_field(data, "referralCode").map(|c| c.to_uppercase()),
            referral_code_claimed_at: datetime_field(data, "referralCodeClaimedAt"),
            referral_purchase_product_id: str_field(data, "referralPurchaseProductID"),
            referral_purchase_date: datetime_field(data, "referralPurchaseDate"),
            subscription_status: data.get("subscriptionStatus").cloned().unwrap_or(Value::Null),
            is_referral_purchase: bool_field(data, "referralCodeUsedForPurchase"),
        });
    }

    log::info!("Prepared {} user snapshots.", snapshots.len());
    snapshots
}

/// Per-user attribution input for the normalizer.
pub fn collect_referral_info(documents: &[UserDocument]) -> HashMap<String, ReferralInfo> {
    documents
        .iter()
        .map(|doc| {
            (
                doc.uid.clone(),
                ReferralInfo {
                    code: str_field(&doc.data, "referralCode").map(|c| c.to_uppercase()),
                    used_for_purchase: bool_field(&doc.data, "referralCodeUsedForPurchase"),
                },
            )
        })
        .collect()
}

fn decimal_field(payout: &Value, key: &str, code: &str) -> Decimal {
    match payout.get(key) {
        Some(Value::String(s)) => s.parse::<Decimal>().unwrap_or_else(|_| {
            log::warn!("Referral {} has unparseable {} '{}'; treating as 0.00", code, key, s);
            Decimal::ZERO
        }),
        Some(Value::Number(n)) => n
            .as_f64()
            .and_then(Decimal::from_f64)
            .unwrap_or(Decimal::ZERO),
        _ => Decimal::ZERO,
    }
}

/// Normalize referral-code documents into ledger snapshots.
///
/// Codes are uppercased; processed transaction ids are coerced to strings
/// whatever their wire type; totals written by older tool versions may be
/// strings or numbers.
pub fn collect_referral_codes(
    documents: &[ReferralCodeDocument],
) -> HashMap<String, ReferralCodeSnapshot> {
    let mut codes = HashMap::new();

    for doc in documents {
        let data = &doc.data;
        let empty = Value::Null;
        let payout = data.get("payout").unwrap_or(&empty);

        let processed_transaction_ids: HashSet<String> = payout
            .get("processedTransactionIds")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| match id {
                        Value::String(s) => Some(s.clone()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let code = doc.code.to_uppercase();
        let snapshot = ReferralCodeSnapshot {
            code: code.clone(),
            influencer_name: str_field(data, "influencerName"),
            influencer_email: str_field(data, "influencerEmail"),
            payout_account_id: str_field(payout, "accountId")
                .or_else(|| str_field(data, "payoutAccountId")),
            payout_provider: str_field(payout, "provider"),
            payout_frequency: str_field(payout, "frequency")
                .or_else(|| str_field(data, "payoutFrequency")),
            total_paid: decimal_field(payout, "totalPaid", &code),
            payout_currency: str_field(payout, "currency"),
            processed_transaction_ids,
        };
        codes.insert(code, snapshot);
    }

    log::info!("Loaded {} referral codes.", codes.len());
    codes
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(uid: &str, data: Value) -> UserDocument {
        UserDocument {
            uid: uid.to_string(),
            data,
        }
    }

    fn code_doc(code: &str, data: Value) -> ReferralCodeDocument {
        ReferralCodeDocument {
            code: code.to_string(),
            data,
        }
    }

    #[test]
    fn test_collect_user_snapshots_joins_documents() {
        let identities = vec![
            UserIdentity {
                uid: "u1".to_string(),
                email: Some("alice@example.com".to_string()),
                created_at: 1767225600000,
            },
            UserIdentity {
                uid: "u2".to_string(),
                email: None,
                created_at: 1767225600000,
            },
        ];
        let documents = vec![doc(
            "u1",
            json!({
                "referralCode": "alice10",
                "referralCodeUsedForPurchase": true,
                "referralCodeClaimedAt": "2026-01-01T10:00:00Z",
                "subscriptionStatus": {"originalTransactionID": "9000001", "environment": "Production"}
            }),
        )];

        let snapshots = collect_user_snapshots(&identities, &documents);
        assert_eq!(snapshots.len(), 2);

        let alice = &snapshots[0];
        assert_eq!(alice.referral_code.as_deref(), Some("ALICE10"));
        assert!(alice.is_referral_purchase);
        assert!(alice.referral_code_claimed_at.is_some());
        assert_eq!(alice.original_transaction_id().as_deref(), Some("9000001"));

        // No document: snapshot still exists with empty referral state
        let bare = &snapshots[1];
        assert!(bare.referral_code.is_none());
        assert!(!bare.is_referral_purchase);
        assert_eq!(bare.original_transaction_id(), None);
    }

    #[test]
    fn test_collect_referral_info_uppercases_codes() {
        let documents = vec![
            doc("u1", json!({"referralCode": "alice10", "referralCodeUsedForPurchase": true})),
            doc("u2", json!({"referralCode": "BOB20"})),
        ];
        let info = collect_referral_info(&documents);

        assert_eq!(info["u1"].code.as_deref(), Some("ALICE10"));
        assert!(info["u1"].used_for_purchase);
        assert_eq!(info["u2"].code.as_deref(), Some("BOB20"));
        assert!(!info["u2"].used_for_purchase);
    }

    #[test]
    fn test_collect_referral_codes_normalizes_payout_block() {
        let documents = vec![code_doc(
            "alice10",
            json!({
                "influencerName": "Alice",
                "payout": {
                    "accountId": "acct_123",
                    "provider": "stripe",
                    "frequency": "monthly",
                    "currency": "USD",
                    "totalPaid": "123.45",
                    "processedTransactionIds": ["t1", 42, "t3"]
                }
            }),
        )];
        let codes = collect_referral_codes(&documents);

        let snapshot = &codes["ALICE10"];
        assert_eq!(snapshot.code, "ALICE10");
        assert_eq!(snapshot.influencer_name.as_deref(), Some("Alice"));
        assert_eq!(snapshot.payout_account_id.as_deref(), Some("acct_123"));
        assert_eq!(snapshot.total_paid, "123.45".parse::<Decimal>().unwrap());
        assert_eq!(snapshot.processed_transaction_ids.len(), 3);
        assert!(snapshot.processed_transaction_ids.contains("42"));
    }

    #[test]
    fn test_referral_code_fallbacks() {
        let documents = vec![code_doc(
            "BOB20",
            json!({
                "payoutAccountId": "acct_999",
                "payoutFrequency": "quarterly",
                "payout": {"totalPaid": 10.50}
            }),
        )];
        let codes = collect_referral_codes(&documents);

        let snapshot = &codes["BOB20"];
        assert_eq!(snapshot.payout_account_id.as_deref(), Some("acct_999"));
        assert_eq!(snapshot.payout_frequency.as_deref(), Some("quarterly"));
        assert_eq!(snapshot.total_paid, "10.5".parse::<Decimal>().unwrap());
        assert!(snapshot.processed_transaction_ids.is_empty());
    }

    #[test]
    fn test_unparseable_total_treated_as_zero() {
        let documents = vec![code_doc(
            "EVE30",
            json!({"payout": {"totalPaid": "not-a-number"}}),
        )];
        let codes = collect_referral_codes(&documents);
        assert_eq!(codes["EVE30"].total_paid, Decimal::ZERO);
    }
}
