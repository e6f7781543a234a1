//! Purchase-verification API client
//!
//! Fetches per-user purchase histories and decodes the loosely-typed wire
//! payloads into `DecodedTransaction` at the boundary. Upstream timestamps
//! are epoch milliseconds; signature verification has already happened on
//! the provider side.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug)]
pub enum PurchaseApiError {
    Http(reqwest::Error),
    Status(u16),
    Decode(String),
}

impl From<reqwest::Error> for PurchaseApiError {
    fn from(err: reqwest::Error) -> Self {
        PurchaseApiError::Http(err)
    }
}

impl std::fmt::Display for PurchaseApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PurchaseApiError::Http(e) => write!(f, "HTTP error: {}", e),
            PurchaseApiError::Status(code) => write!(f, "Purchase API returned status {}", code),
            PurchaseApiError::Decode(msg) => write!(f, "Undecodable transaction payload: {}", msg),
        }
    }
}

impl std::error::Error for PurchaseApiError {}

/// API environment a subscription lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Sandbox,
}

impl Environment {
    /// Resolve an upstream environment tag; anything unrecognized or
    /// absent means production.
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag {
            Some("Sandbox") | Some("SANDBOX") | Some("XCODE") => Environment::Sandbox,
            _ => Environment::Production,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "Production",
            Environment::Sandbox => "Sandbox",
        }
    }
}

/// A decoded purchase event, normalized from the wire shape
#[derive(Debug, Clone)]
pub struct DecodedTransaction {
    pub original_transaction_id: String,
    pub transaction_id: String,
    pub product_id: String,
    pub purchase_date: Option<DateTime<Utc>>,
    pub expires_date: Option<DateTime<Utc>>,
    pub currency: Option<String>,
    pub price: Option<f64>,
    pub transaction_reason: Option<String>,
    pub environment: String,
}

/// Wire shape of a single transaction payload
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionPayload {
    original_transaction_id: String,
    transaction_id: Option<String>,
    product_id: String,
    /// Epoch milliseconds
    purchase_date: Option<i64>,
    /// Epoch milliseconds
    expires_date: Option<i64>,
    currency: Option<String>,
    price: Option<f64>,
    transaction_reason: Option<String>,
    environment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    transactions: Vec<serde_json::Value>,
}

fn millis_to_utc(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
}

impl DecodedTransaction {
    /// Decode one wire payload. A payload missing its identifying fields
    /// is an explicit error, never a silently-defaulted record.
    pub fn from_payload(
        payload: &serde_json::Value,
        default_environment: Environment,
    ) -> Result<Self, PurchaseApiError> {
        let raw: TransactionPayload = serde_json::from_value(payload.clone())
            .map_err(|e| PurchaseApiError::Decode(e.to_string()))?;

        // Some histories carry entries without their own transaction id;
        // the original transaction id is the stable fallback.
        let transaction_id = raw
            .transaction_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| raw.original_transaction_id.clone());

        Ok(Self {
            original_transaction_id: raw.original_transaction_id,
            transaction_id,
            product_id: raw.product_id,
            purchase_date: raw.purchase_date.and_then(millis_to_utc),
            expires_date: raw.expires_date.and_then(millis_to_utc),
            currency: raw.currency,
            price: raw.price,
            transaction_reason: raw.transaction_reason,
            environment: raw
                .environment
                .unwrap_or_else(|| default_environment.as_str().to_string()),
        })
    }
}

/// Source of per-user purchase histories
#[async_trait]
pub trait TransactionSource: Send + Sync {
    async fn transaction_history(
        &self,
        original_transaction_id: &str,
        environment: Option<&str>,
    ) -> Result<Vec<DecodedTransaction>, PurchaseApiError>;
}

pub struct PurchaseHistoryClient {
    http: reqwest::Client,
    production_url: String,
    sandbox_url: String,
    api_key: String,
}

impl PurchaseHistoryClient {
    pub fn new(
        production_url: String,
        sandbox_url: String,
        api_key: String,
    ) -> Result<Self, PurchaseApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            production_url,
            sandbox_url,
            api_key,
        })
    }

    fn base_url(&self, env: Environment) -> &str {
        match env {
            Environment::Production => &self.production_url,
            Environment::Sandbox => &self.sandbox_url,
        }
    }
}

#[async_trait]
impl TransactionSource for PurchaseHistoryClient {
    async fn transaction_history(
        &self,
        original_transaction_id: &str,
        environment: Option<&str>,
    ) -> Result<Vec<DecodedTransaction>, PurchaseApiError> {
        let env = Environment::from_tag(environment);
        let url = format!(
            "{}/v1/history/{}",
            self.base_url(env).trim_end_matches('/'),
            original_transaction_id
        );

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PurchaseApiError::Status(response.status().as_u16()));
        }

        let history: HistoryResponse = response
            .json()
            .await
            .map_err(PurchaseApiError::from)?;

        let mut transactions = Vec::with_capacity(history.transactions.len());
        for payload in &history.transactions {
            match DecodedTransaction::from_payload(payload, env) {
                Ok(tx) => transactions.push(tx),
                Err(e) => {
                    log::error!(
                        "Failed to decode transaction for originalTransactionId={}: {}",
                        original_transaction_id,
                        e
                    );
                }
            }
        }

        log::info!(
            "Fetched {} transactions for originalTransactionId={} ({} environment)",
            transactions.len(),
            original_transaction_id,
            env.as_str()
        );
        Ok(transactions)
    }
}
