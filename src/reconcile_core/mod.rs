//! Reconcile Core - Payout Reconciliation and Attribution Engine
//!
//! Turns raw purchase histories into canonical transaction records,
//! attributes revenue to referral codes, aggregates payouts against the
//! durable ledger, and drives the per-code transfer state machine.
//!
//! # Architecture
//!
//! ```text
//! DecodedTransaction (per user) → build_transaction_records
//!     ↓
//! TransactionRecord (window-filtered, price-corrected, attributed)
//!     ↓
//! compute_influencer_payouts (idempotency guard vs processed-id ledger)
//!     ↓
//! InfluencerPayout (per referral code)
//!     ↓
//! TransferOrchestrator → PayoutState + ledger append on Executed
//!
//! UserSnapshot + DecodedTransaction → metrics (independent of payouts)
//! ```

pub mod metrics;
pub mod normalizer;
pub mod payouts;
pub mod transfer;

pub use metrics::{
    compute_subscription_metrics, compute_user_metrics, ProductClasses, SubscriptionMetrics,
    UserMetrics, UserSnapshot,
};
pub use normalizer::{build_transaction_records, ReferralInfo, TransactionRecord};
pub use payouts::{compute_influencer_payouts, InfluencerPayout, ReferralCodeSnapshot};
pub use transfer::{PayoutState, TransferOrchestrator};
