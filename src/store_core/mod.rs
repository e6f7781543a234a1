//! External collaborators: purchase-verification API, user/referral
//! directory, durable referral ledger, and the payments processor.
//!
//! Each collaborator sits behind a trait so the run driver and tests can
//! substitute implementations. Loosely-typed wire payloads are normalized
//! here, at the boundary; unrecognized shapes fail explicitly instead of
//! defaulting to empty values.

pub mod ledger;
pub mod payments;
pub mod purchases;
pub mod users;

pub use ledger::{LedgerError, LedgerStore, PayoutRunRecord, SqliteLedger};
pub use payments::{HttpPaymentsClient, PaymentsClient, TransferRequest, TransferResult};
pub use purchases::{DecodedTransaction, PurchaseApiError, PurchaseHistoryClient, TransactionSource};
pub use users::{UserDirectory, UserDirectoryClient, UserDirectoryError};
