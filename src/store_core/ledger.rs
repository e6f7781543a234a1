//! Durable referral ledger backed by SQLite
//!
//! The ledger is the only cross-run state: which transaction ids have
//! already been paid per code, and the cumulative total paid. The
//! `record_payout_run` write is a single SQLite transaction so a partial
//! update (amount recorded but ids missing, or vice versa) can never be
//! observed by a later run.

use crate::reconcile_core::payouts::ReferralCodeSnapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug)]
pub enum LedgerError {
    Database(String),
    Serialization(serde_json::Error),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        LedgerError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Serialization(err)
    }
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::Database(e) => write!(f, "Ledger database error: {}", e),
            LedgerError::Serialization(e) => write!(f, "Ledger serialization error: {}", e),
        }
    }
}

impl std::error::Error for LedgerError {}

/// Append-only record of one executed payout run for one code
#[derive(Debug, Clone)]
pub struct PayoutRunRecord {
    pub referral_code: String,
    pub run_id: String,
    pub amount: Decimal,
    pub new_total_paid: Decimal,
    pub currency: String,
    pub transaction_ids: Vec<String>,
    pub transfer_id: String,
    pub executed_at: DateTime<Utc>,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Read every code's durable state at run start.
    async fn load_referral_codes(
        &self,
    ) -> Result<HashMap<String, ReferralCodeSnapshot>, LedgerError>;

    /// Mirror directory identity into the ledger. Never overwrites the
    /// cumulative total or processed set the ledger already owns.
    async fn upsert_referral_code(&self, snapshot: &ReferralCodeSnapshot)
        -> Result<(), LedgerError>;

    /// Append one executed run: run row, processed ids, and the new
    /// cumulative total, in one durable operation.
    async fn record_payout_run(&self, record: &PayoutRunRecord) -> Result<(), LedgerError>;
}

pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedger {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    LedgerError::Database(format!(
                        "Failed to create ledger directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS referral_codes (
                code TEXT PRIMARY KEY,
                influencer_name TEXT,
                influencer_email TEXT,
                payout_account_id TEXT,
                payout_provider TEXT,
                payout_frequency TEXT,
                total_paid TEXT NOT NULL DEFAULT '0.00',
                payout_currency TEXT
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS payout_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                code TEXT NOT NULL,
                run_id TEXT NOT NULL,
                amount TEXT NOT NULL,
                currency TEXT NOT NULL,
                transaction_ids TEXT NOT NULL,
                transfer_id TEXT NOT NULL,
                executed_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS processed_transactions (
                code TEXT NOT NULL,
                transaction_id TEXT NOT NULL,
                PRIMARY KEY (code, transaction_id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_payout_runs_code ON payout_runs(code, executed_at DESC)",
            [],
        )?;

        log::info!("✅ Referral ledger initialized with WAL mode");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn parse_total(raw: &str, code: &str) -> Result<Decimal, LedgerError> {
    raw.parse::<Decimal>().map_err(|_| {
        LedgerError::Database(format!(
            "Corrupt total_paid '{}' for referral code {}",
            raw, code
        ))
    })
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn load_referral_codes(
        &self,
    ) -> Result<HashMap<String, ReferralCodeSnapshot>, LedgerError> {
        let conn = self.conn.lock().unwrap();
        let mut codes: HashMap<String, ReferralCodeSnapshot> = HashMap::new();

        let mut stmt = conn.prepare(
            "SELECT code, influencer_name, influencer_email, payout_account_id,
                    payout_provider, payout_frequency, total_paid, payout_currency
             FROM referral_codes",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, Option<String>>(7)?,
            ))
        })?;

        for row in rows {
            let (code, name, email, account, provider, frequency, total_raw, currency) = row?;
            let total_paid = parse_total(&total_raw, &code)?;
            codes.insert(
                code.clone(),
                ReferralCodeSnapshot {
                    code,
                    influencer_name: name,
                    influencer_email: email,
                    payout_account_id: account,
                    payout_provider: provider,
                    payout_frequency: frequency,
                    processed_transaction_ids: Default::default(),
                    total_paid,
                    payout_currency: currency,
                },
            );
        }

        let mut stmt = conn.prepare("SELECT code, transaction_id FROM processed_transactions")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (code, transaction_id) = row?;
            codes
                .entry(code.clone())
                .or_insert_with(|| ReferralCodeSnapshot {
                    code,
                    ..Default::default()
                })
                .processed_transaction_ids
                .insert(transaction_id);
        }

        Ok(codes)
    }

    async fn upsert_referral_code(
        &self,
        snapshot: &ReferralCodeSnapshot,
    ) -> Result<(), LedgerError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO referral_codes
                (code, influencer_name, influencer_email, payout_account_id,
                 payout_provider, payout_frequency, total_paid, payout_currency)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(code) DO UPDATE SET
                influencer_name = excluded.influencer_name,
                influencer_email = excluded.influencer_email,
                payout_account_id = excluded.payout_account_id,
                payout_provider = excluded.payout_provider,
                payout_frequency = excluded.payout_frequency",
            params![
                snapshot.code,
                snapshot.influencer_name,
                snapshot.influencer_email,
                snapshot.payout_account_id,
                snapshot.payout_provider,
                snapshot.payout_frequency,
                snapshot.total_paid.to_string(),
                snapshot.payout_currency,
            ],
        )?;

        // Seed processed ids the directory already knows about (one-time
        // migration path from ledgers embedded in code documents)
        for transaction_id in &snapshot.processed_transaction_ids {
            tx.execute(
                "INSERT OR IGNORE INTO processed_transactions (code, transaction_id)
                 VALUES (?1, ?2)",
                params![snapshot.code, transaction_id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    async fn record_payout_run(&self, record: &PayoutRunRecord) -> Result<(), LedgerError> {
        let ids_json = serde_json::to_string(&record.transaction_ids)?;

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO payout_runs
                (code, run_id, amount, currency, transaction_ids, transfer_id, executed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.referral_code,
                record.run_id,
                record.amount.to_string(),
                record.currency,
                ids_json,
                record.transfer_id,
                record.executed_at.timestamp(),
            ],
        )?;

        for transaction_id in &record.transaction_ids {
            tx.execute(
                "INSERT OR IGNORE INTO processed_transactions (code, transaction_id)
                 VALUES (?1, ?2)",
                params![record.referral_code, transaction_id],
            )?;
        }

        tx.execute(
            "INSERT INTO referral_codes (code, total_paid, payout_currency)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(code) DO UPDATE SET
                total_paid = excluded.total_paid,
                payout_currency = excluded.payout_currency",
            params![
                record.referral_code,
                record.new_total_paid.to_string(),
                record.currency,
            ],
        )?;

        tx.commit()?;

        log::info!(
            "Recorded payout run {} for referral code {} (amount={} {}, transactions={})",
            record.run_id,
            record.referral_code,
            record.amount,
            record.currency,
            record.transaction_ids.len()
        );
        Ok(())
    }
}
