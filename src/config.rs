//! Runtime configuration from environment variables
//!
//! Loaded once by the binary and passed by reference into every component.
//! Missing credentials or invalid values abort the run before any
//! processing begins.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Product catalog: the three product classes with their expected prices.
///
/// Supplies the normalizer's static price table and the metrics
/// calculator's product-class ids.
#[derive(Debug, Clone)]
pub struct ProductCatalog {
    pub monthly_id: String,
    pub yearly_id: String,
    pub lifetime_id: String,
    prices: HashMap<String, Decimal>,
}

impl ProductCatalog {
    pub fn new(
        monthly: (String, Decimal),
        yearly: (String, Decimal),
        lifetime: (String, Decimal),
    ) -> Self {
        let mut prices = HashMap::new();
        prices.insert(monthly.0.clone(), monthly.1);
        prices.insert(yearly.0.clone(), yearly.1);
        prices.insert(lifetime.0.clone(), lifetime.1);
        Self {
            monthly_id: monthly.0,
            yearly_id: yearly.0,
            lifetime_id: lifetime.0,
            prices,
        }
    }

    pub fn expected_prices(&self) -> &HashMap<String, Decimal> {
        &self.prices
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Purchase-verification API
    pub purchase_api_base_url: String,
    pub purchase_api_sandbox_url: String,
    pub purchase_api_key: String,

    /// User/referral directory service (defaults to the purchase API host)
    pub user_store_base_url: String,
    pub user_store_api_key: String,

    /// Payments processor; absent secret forces dry-run
    pub payments_base_url: String,
    pub payments_secret_key: Option<String>,
    pub transfer_description: Option<String>,

    pub ledger_db_path: String,
    pub output_dir: PathBuf,

    pub report_currency: String,
    pub payout_currency: String,
    pub affiliate_share: Decimal,
    pub dry_run: bool,

    pub catalog: ProductCatalog,
}

fn required(name: &str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingVariable(name.to_string())),
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn price_from_env(name: &str, default: &str) -> Result<Decimal, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<Decimal>()
        .map_err(|_| ConfigError::InvalidValue(format!("{} must be a decimal price, got '{}'", name, raw)))
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// Required:
    /// - `PURCHASE_API_BASE_URL`
    /// - `PURCHASE_API_KEY`
    ///
    /// Optional (with defaults):
    /// - `PURCHASE_API_SANDBOX_URL` (default: base URL)
    /// - `USER_STORE_BASE_URL` / `USER_STORE_API_KEY` (default: purchase API)
    /// - `PAYMENTS_BASE_URL` (default: https://api.stripe.com)
    /// - `PAYMENTS_SECRET_KEY` (absent: transfers forced to dry-run)
    /// - `TRANSFER_DESCRIPTION`
    /// - `LEDGER_DB_PATH` (default: data/refflow.db)
    /// - `REFFLOW_OUTPUT_DIR` (default: reports)
    /// - `REFFLOW_REPORT_CURRENCY` (default: USD)
    /// - `PAYOUT_CURRENCY` (default: report currency)
    /// - `AFFILIATE_SHARE` (default: 0.40, must lie in (0, 1])
    /// - `REFFLOW_DRY_RUN` (default: true; accepts true/1/yes)
    /// - `PRODUCT_PRICE_MONTHLY` / `_YEARLY` / `_LIFETIME`
    pub fn from_env() -> Result<Self, ConfigError> {
        let purchase_api_base_url = required("PURCHASE_API_BASE_URL")?;
        if !purchase_api_base_url.starts_with("http://") && !purchase_api_base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "PURCHASE_API_BASE_URL must start with http:// or https://".to_string(),
            ));
        }
        let purchase_api_key = required("PURCHASE_API_KEY")?;

        let purchase_api_sandbox_url =
            optional("PURCHASE_API_SANDBOX_URL").unwrap_or_else(|| purchase_api_base_url.clone());

        let user_store_base_url =
            optional("USER_STORE_BASE_URL").unwrap_or_else(|| purchase_api_base_url.clone());
        let user_store_api_key =
            optional("USER_STORE_API_KEY").unwrap_or_else(|| purchase_api_key.clone());

        let payments_base_url =
            optional("PAYMENTS_BASE_URL").unwrap_or_else(|| "https://api.stripe.com".to_string());
        let payments_secret_key = optional("PAYMENTS_SECRET_KEY");
        let transfer_description = optional("TRANSFER_DESCRIPTION");

        let ledger_db_path =
            optional("LEDGER_DB_PATH").unwrap_or_else(|| "data/refflow.db".to_string());
        let output_dir: PathBuf = optional("REFFLOW_OUTPUT_DIR")
            .unwrap_or_else(|| "reports".to_string())
            .into();

        let report_currency =
            optional("REFFLOW_REPORT_CURRENCY").unwrap_or_else(|| "USD".to_string());
        let payout_currency = optional("PAYOUT_CURRENCY")
            .unwrap_or_else(|| report_currency.clone())
            .to_uppercase();

        let share_raw = env::var("AFFILIATE_SHARE").unwrap_or_else(|_| "0.40".to_string());
        let affiliate_share = share_raw.parse::<Decimal>().map_err(|_| {
            ConfigError::InvalidValue(format!("AFFILIATE_SHARE must be a decimal, got '{}'", share_raw))
        })?;
        if affiliate_share <= Decimal::ZERO || affiliate_share > Decimal::ONE {
            return Err(ConfigError::InvalidValue(format!(
                "AFFILIATE_SHARE must lie in (0, 1], got {}",
                affiliate_share
            )));
        }

        let dry_run = match env::var("REFFLOW_DRY_RUN") {
            Ok(v) => matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"),
            Err(_) => true,
        };

        let catalog = ProductCatalog::new(
            (
                optional("PRODUCT_ID_MONTHLY")
                    .unwrap_or_else(|| "com.refflow.premium.monthly".to_string()),
                price_from_env("PRODUCT_PRICE_MONTHLY", "3.99")?,
            ),
            (
                optional("PRODUCT_ID_YEARLY")
                    .unwrap_or_else(|| "com.refflow.premium.yearly".to_string()),
                price_from_env("PRODUCT_PRICE_YEARLY", "29.99")?,
            ),
            (
                optional("PRODUCT_ID_LIFETIME")
                    .unwrap_or_else(|| "com.refflow.premium.lifetime".to_string()),
                price_from_env("PRODUCT_PRICE_LIFETIME", "89.99")?,
            ),
        );

        Ok(Self {
            purchase_api_base_url,
            purchase_api_sandbox_url,
            purchase_api_key,
            user_store_base_url,
            user_store_api_key,
            payments_base_url,
            payments_secret_key,
            transfer_description,
            ledger_db_path,
            output_dir,
            report_currency,
            payout_currency,
            affiliate_share,
            dry_run,
            catalog,
        })
    }
}
