//! Funds-transfer collaborator
//!
//! Transfers are form-encoded posts to a Stripe-style `/v1/transfers`
//! endpoint, with amounts in minor units. Dry-run mode and a missing
//! secret key both short-circuit before any network call; API errors come
//! back inside `TransferResult` so a single rejected transfer never stops
//! the run.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub amount: Decimal,
    pub currency: String,
    pub destination_account: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct TransferResult {
    pub amount: Decimal,
    pub currency: String,
    pub destination: String,
    pub transfer_id: Option<String>,
    pub dry_run: bool,
    pub error_message: Option<String>,
}

#[async_trait]
pub trait PaymentsClient: Send + Sync {
    fn is_dry_run(&self) -> bool;

    /// Create a transfer. Never called with a non-positive amount by the
    /// orchestrator; the client guards anyway and returns a simulated
    /// result without touching the network.
    async fn create_transfer(&self, request: &TransferRequest) -> TransferResult;
}

pub struct HttpPaymentsClient {
    http: reqwest::Client,
    base_url: String,
    secret_key: Option<String>,
    dry_run: bool,
    description: Option<String>,
}

impl HttpPaymentsClient {
    pub fn new(
        base_url: String,
        secret_key: Option<String>,
        dry_run: bool,
        description: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        let dry_run = if secret_key.is_none() {
            log::warn!("Payments secret key not provided; running in dry-run mode.");
            true
        } else {
            dry_run
        };

        if !dry_run {
            log::info!("Payments client initialized for live transfers.");
        }

        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
            base_url,
            secret_key,
            dry_run,
            description,
        })
    }

    /// Convert a major-unit amount to minor units (cents), half-even.
    fn to_minor_units(amount: Decimal) -> Option<i64> {
        (amount * Decimal::new(100, 0))
            .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
            .to_i64()
    }

    fn result(
        &self,
        request: &TransferRequest,
        transfer_id: Option<String>,
        dry_run: bool,
        error_message: Option<String>,
    ) -> TransferResult {
        TransferResult {
            amount: request.amount,
            currency: request.currency.clone(),
            destination: request.destination_account.clone(),
            transfer_id,
            dry_run,
            error_message,
        }
    }
}

#[async_trait]
impl PaymentsClient for HttpPaymentsClient {
    fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    async fn create_transfer(&self, request: &TransferRequest) -> TransferResult {
        if request.amount <= Decimal::ZERO {
            log::info!(
                "Skipping transfer to {} because amount is {}.",
                request.destination_account,
                request.amount
            );
            return self.result(request, None, true, None);
        }

        log::info!(
            "Preparing transfer: {} {} to account {} (dry_run={}).",
            request.amount,
            request.currency,
            request.destination_account,
            self.dry_run
        );

        if self.dry_run {
            return self.result(request, None, true, None);
        }

        let secret_key = match &self.secret_key {
            Some(key) => key,
            None => return self.result(request, None, true, None),
        };

        let cents = match Self::to_minor_units(request.amount) {
            Some(cents) => cents,
            None => {
                return self.result(
                    request,
                    None,
                    false,
                    Some(format!("Amount {} out of range for minor units", request.amount)),
                )
            }
        };

        let mut form: Vec<(String, String)> = vec![
            ("amount".to_string(), cents.to_string()),
            ("currency".to_string(), request.currency.to_lowercase()),
            (
                "destination".to_string(),
                request.destination_account.clone(),
            ),
        ];
        if let Some(description) = &self.description {
            form.push(("description".to_string(), description.clone()));
        }
        for (key, value) in &request.metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
        }

        let url = format!("{}/v1/transfers", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(secret_key)
            .form(&form)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                match response.json::<serde_json::Value>().await {
                    Ok(body) => {
                        let transfer_id = body
                            .get("id")
                            .and_then(|v| v.as_str())
                            .map(str::to_string);
                        if let Some(id) = &transfer_id {
                            log::info!(
                                "Transfer {} created for account {} ({} {}).",
                                id,
                                request.destination_account,
                                request.amount,
                                request.currency
                            );
                        }
                        self.result(request, transfer_id, false, None)
                    }
                    Err(e) => self.result(
                        request,
                        None,
                        false,
                        Some(format!("Unreadable transfer response: {}", e)),
                    ),
                }
            }
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                log::error!(
                    "Transfer failed for account {} ({} {}): status {} {}",
                    request.destination_account,
                    request.amount,
                    request.currency,
                    status,
                    body
                );
                self.result(
                    request,
                    None,
                    false,
                    Some(format!("Payments API returned status {}", status)),
                )
            }
            Err(e) => {
                log::error!(
                    "Transfer request error for account {} ({} {}): {}",
                    request.destination_account,
                    request.amount,
                    request.currency,
                    e
                );
                self.result(request, None, false, Some(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn create_test_request(amount: &str) -> TransferRequest {
        TransferRequest {
            amount: dec(amount),
            currency: "USD".to_string(),
            destination_account: "acct_123".to_string(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_to_minor_units() {
        assert_eq!(HttpPaymentsClient::to_minor_units(dec("48.00")), Some(4800));
        assert_eq!(HttpPaymentsClient::to_minor_units(dec("0.01")), Some(1));
        // Half-even at the cent midpoint
        assert_eq!(HttpPaymentsClient::to_minor_units(dec("0.125")), Some(12));
        assert_eq!(HttpPaymentsClient::to_minor_units(dec("0.135")), Some(14));
    }

    #[tokio::test]
    async fn test_non_positive_amount_never_hits_network() {
        // Live configuration pointed at an unroutable host: the guard must
        // return before any request is attempted
        let client = HttpPaymentsClient::new(
            "http://refflow-test.invalid".to_string(),
            Some("sk_test".to_string()),
            false,
            None,
        )
        .unwrap();

        let result = client.create_transfer(&create_test_request("0.00")).await;
        assert!(result.transfer_id.is_none());
        assert!(result.dry_run);
        assert!(result.error_message.is_none());
    }

    #[tokio::test]
    async fn test_dry_run_returns_simulated_result() {
        let client = HttpPaymentsClient::new(
            "http://refflow-test.invalid".to_string(),
            Some("sk_test".to_string()),
            true,
            None,
        )
        .unwrap();

        let result = client.create_transfer(&create_test_request("48.00")).await;
        assert!(result.dry_run);
        assert!(result.transfer_id.is_none());
        assert!(result.error_message.is_none());
        assert_eq!(result.amount, dec("48.00"));
    }

    #[test]
    fn test_missing_secret_forces_dry_run() {
        let client = HttpPaymentsClient::new(
            "http://refflow-test.invalid".to_string(),
            None,
            false,
            None,
        )
        .unwrap();
        assert!(client.is_dry_run());
    }
}
