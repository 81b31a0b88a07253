//! Transaction (loan) model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use super::book::BookShort;

/// Canonical loan record from the transactions table.
///
/// `is_active` alone does not imply the loan is usable; a transaction is
/// live only while it is both active and unexpired. Records are never
/// deleted, and `is_active` never flips back to true once cleared.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Transaction {
    pub id: i32,
    pub user_id: i32,
    pub book_id: i32,
    pub token: String,
    pub start_time: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
}

impl Transaction {
    /// Liveness is derived, never stored
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at > now
    }
}

/// Fields of a transaction about to be persisted
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: i32,
    pub book_id: i32,
    pub token: String,
    pub start_time: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// What a successful borrow hands back to the caller
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BorrowReceipt {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// A still-live loan joined with book display metadata
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LiveLoan {
    pub token: String,
    pub start_time: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub book: BookShort,
}

/// Borrower display metadata for admin transaction listings
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct BorrowerBrief {
    pub id: i32,
    pub name: String,
    pub surname: String,
    pub email: String,
}

/// Transaction joined with user and book display metadata
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionDetails {
    pub id: i32,
    pub token: String,
    pub start_time: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub user: Option<BorrowerBrief>,
    pub book: Option<BookShort>,
}

/// Result of an expiry reconciliation pass
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReconcileOutcome {
    /// Transactions deactivated by this pass
    pub expired_count: usize,
    /// Loans still live after the pass, joined with book metadata
    pub live_loans: Vec<LiveLoan>,
}
