//! Loan lifecycle service
//!
//! Sole writer of transaction activation state and of the per-user
//! borrowed-books index. The transactions table is authoritative; the
//! index is a read cache mirrored on borrow and repaired on
//! reconciliation, so a failed secondary write is logged and tolerated
//! rather than rolled back.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::{
    config::LoansConfig,
    error::{AppError, AppResult},
    models::{
        transaction::{
            BorrowReceipt, NewTransaction, ReconcileOutcome, Transaction, TransactionDetails,
        },
        user::BorrowedBook,
    },
    repository::LoanStore,
};

#[derive(Clone)]
pub struct LoansService {
    store: Arc<dyn LoanStore>,
    config: LoansConfig,
}

impl LoansService {
    pub fn new(store: Arc<dyn LoanStore>, config: LoansConfig) -> Self {
        Self { store, config }
    }

    /// Borrow a book: persist a transaction, then mirror it into the
    /// user's borrowed-books list.
    ///
    /// The two writes are not atomic. Once the transaction insert has
    /// committed the loan exists, whatever happens to the mirror write;
    /// reconciliation rebuilds the index from the transactions table.
    pub async fn create_loan(&self, user_id: i32, book_id: i32) -> AppResult<BorrowReceipt> {
        let now = Utc::now();

        if !self.store.user_exists(user_id).await? {
            return Err(AppError::NotFound(format!(
                "User with id {} not found",
                user_id
            )));
        }
        let book = self
            .store
            .book_summary(book_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", book_id)))?;

        // Expired loans still flagged active would trip the live-loan
        // uniqueness constraint; retire them first.
        self.sweep_expired(user_id, now).await?;

        if self.store.has_live_loan(user_id, book_id, now).await? {
            return Err(AppError::Conflict(
                "Book is already borrowed by this user".to_string(),
            ));
        }

        let transaction = self
            .store
            .insert_transaction(&NewTransaction {
                user_id,
                book_id,
                token: Uuid::new_v4().to_string(),
                start_time: now,
                expires_at: now + Duration::days(self.config.period_days),
            })
            .await?;

        let entry = BorrowedBook {
            token: transaction.token.clone(),
            book_id,
            date_created: transaction.start_time,
        };
        if let Err(e) = self.store.push_loan_entry(user_id, &entry).await {
            tracing::error!(
                "Borrow committed but mirroring the loan entry for user {} failed: {}",
                user_id,
                e
            );
        }
        if let Err(e) = self.store.increment_borrow_count(book_id).await {
            tracing::error!("Failed to bump borrow count for book {}: {}", book.id, e);
        }

        Ok(BorrowReceipt {
            token: transaction.token,
            expires_at: transaction.expires_at,
        })
    }

    /// Return a borrowed book.
    ///
    /// Idempotent: returning an already-returned or expired loan is
    /// harmless cleanup, not an error.
    pub async fn return_loan(&self, user_id: i32, token: &str) -> AppResult<()> {
        let transaction = self
            .store
            .find_by_token(token)
            .await?
            .filter(|t| t.user_id == user_id)
            .ok_or_else(|| {
                AppError::NotFound("Transaction with that token not found".to_string())
            })?;

        self.store.deactivate(&transaction.token).await?;

        if let Err(e) = self.store.remove_loan_entry(user_id, token).await {
            tracing::error!(
                "Return committed but pruning the loan entry for user {} failed: {}",
                user_id,
                e
            );
        }
        Ok(())
    }

    /// Retire every expired loan of the user and bring the
    /// borrowed-books index back in line with the transactions table.
    ///
    /// Runs inline with reads that need accurate data; there is no
    /// background sweep. Idempotent: a second immediate pass reports
    /// zero expirations.
    pub async fn reconcile_expired(&self, user_id: i32) -> AppResult<ReconcileOutcome> {
        let now = Utc::now();

        if !self.store.user_exists(user_id).await? {
            return Err(AppError::NotFound(format!(
                "User with id {} not found",
                user_id
            )));
        }

        let expired = self.store.expire_due(user_id, now).await?;
        let live_loans = self.store.live_loans(user_id, now).await?;

        // Rebuilding from the live set both prunes expired entries and
        // restores entries lost to a failed mirror write.
        let entries: Vec<BorrowedBook> = live_loans
            .iter()
            .map(|loan| BorrowedBook {
                token: loan.token.clone(),
                book_id: loan.book.id,
                date_created: loan.start_time,
            })
            .collect();
        if let Err(e) = self.store.rebuild_loan_index(user_id, &entries).await {
            tracing::error!(
                "Expiry sweep committed but rebuilding the index for user {} failed: {}",
                user_id,
                e
            );
        }

        Ok(ReconcileOutcome {
            expired_count: expired.len(),
            live_loans,
        })
    }

    /// May this token read this book for this user right now?
    ///
    /// Grants only on a transaction matching token, book and user all at
    /// once, still active and unexpired. Read-only: expired transactions
    /// are denied here, not cleaned up.
    pub async fn check_access(
        &self,
        token: &str,
        book_id: i32,
        user_id: i32,
    ) -> AppResult<Transaction> {
        let now = Utc::now();
        self.store
            .find_live_match(token, book_id, user_id, now)
            .await?
            .ok_or_else(|| AppError::Authentication("Invalid or expired book token".to_string()))
    }

    /// Full loan history of one user, newest first
    pub async fn user_transactions(&self, user_id: i32) -> AppResult<Vec<TransactionDetails>> {
        self.store.user_transactions(user_id).await
    }

    /// Full loan history across all users, newest first
    pub async fn all_transactions(&self) -> AppResult<Vec<TransactionDetails>> {
        self.store.all_transactions().await
    }

    /// Deactivate expired transactions and drop their index entries
    async fn sweep_expired(&self, user_id: i32, now: DateTime<Utc>) -> AppResult<usize> {
        let expired = self.store.expire_due(user_id, now).await?;
        for token in &expired {
            if let Err(e) = self.store.remove_loan_entry(user_id, token).await {
                tracing::error!(
                    "Expiry sweep committed but pruning entry for user {} failed: {}",
                    user_id,
                    e
                );
            }
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::models::book::BookShort;
    use crate::models::transaction::LiveLoan;
    use crate::repository::loans::MockLoanStore;

    /// In-memory stand-in for the Postgres loan store, with the same
    /// conditional-update semantics (including the one-active-loan
    /// constraint).
    #[derive(Default)]
    struct MemoryStore {
        books: Mutex<HashMap<i32, BookShort>>,
        indexes: Mutex<HashMap<i32, Vec<BorrowedBook>>>,
        transactions: Mutex<Vec<Transaction>>,
        fail_mirror: AtomicBool,
    }

    impl MemoryStore {
        fn with_user_and_book() -> Self {
            let store = Self::default();
            store.add_user(1);
            store.add_book(10, "Dune");
            store
        }

        fn add_user(&self, id: i32) {
            self.indexes.lock().unwrap().insert(id, Vec::new());
        }

        fn add_book(&self, id: i32, name: &str) {
            self.books.lock().unwrap().insert(
                id,
                BookShort {
                    id,
                    name: name.to_string(),
                    author: "Frank Herbert".to_string(),
                    cover_image_url: "https://covers.example/dune.jpg".to_string(),
                },
            );
        }

        /// Seed a transaction directly, bypassing the service
        fn seed_transaction(&self, user_id: i32, book_id: i32, token: &str, days_left: i64) {
            let now = Utc::now();
            let mut txs = self.transactions.lock().unwrap();
            let id = txs.len() as i32 + 1;
            txs.push(Transaction {
                id,
                user_id,
                book_id,
                token: token.to_string(),
                start_time: now - Duration::days(8),
                expires_at: now + Duration::days(days_left),
                is_active: true,
            });
        }

        /// Rewind a transaction's expiry into the past, leaving the
        /// active flag untouched
        fn force_expire(&self, token: &str) {
            let mut txs = self.transactions.lock().unwrap();
            let tx = txs.iter_mut().find(|t| t.token == token).unwrap();
            tx.expires_at = Utc::now() - Duration::days(1);
        }

        fn transaction(&self, token: &str) -> Transaction {
            self.transactions
                .lock()
                .unwrap()
                .iter()
                .find(|t| t.token == token)
                .cloned()
                .unwrap()
        }

        fn index_of(&self, user_id: i32) -> Vec<BorrowedBook> {
            self.indexes.lock().unwrap().get(&user_id).cloned().unwrap()
        }
    }

    #[async_trait]
    impl LoanStore for MemoryStore {
        async fn user_exists(&self, user_id: i32) -> AppResult<bool> {
            Ok(self.indexes.lock().unwrap().contains_key(&user_id))
        }

        async fn book_summary(&self, book_id: i32) -> AppResult<Option<BookShort>> {
            Ok(self.books.lock().unwrap().get(&book_id).cloned())
        }

        async fn has_live_loan(
            &self,
            user_id: i32,
            book_id: i32,
            now: DateTime<Utc>,
        ) -> AppResult<bool> {
            Ok(self
                .transactions
                .lock()
                .unwrap()
                .iter()
                .any(|t| t.user_id == user_id && t.book_id == book_id && t.is_live(now)))
        }

        async fn insert_transaction(&self, tx: &NewTransaction) -> AppResult<Transaction> {
            let mut txs = self.transactions.lock().unwrap();
            // Same shape as the partial unique index: one *active* loan
            // per (user, book), expired or not.
            if txs
                .iter()
                .any(|t| t.user_id == tx.user_id && t.book_id == tx.book_id && t.is_active)
            {
                return Err(AppError::Conflict(
                    "Book is already borrowed by this user".to_string(),
                ));
            }
            let created = Transaction {
                id: txs.len() as i32 + 1,
                user_id: tx.user_id,
                book_id: tx.book_id,
                token: tx.token.clone(),
                start_time: tx.start_time,
                expires_at: tx.expires_at,
                is_active: true,
            };
            txs.push(created.clone());
            Ok(created)
        }

        async fn find_by_token(&self, token: &str) -> AppResult<Option<Transaction>> {
            Ok(self
                .transactions
                .lock()
                .unwrap()
                .iter()
                .find(|t| t.token == token)
                .cloned())
        }

        async fn find_live_match(
            &self,
            token: &str,
            book_id: i32,
            user_id: i32,
            now: DateTime<Utc>,
        ) -> AppResult<Option<Transaction>> {
            Ok(self
                .transactions
                .lock()
                .unwrap()
                .iter()
                .find(|t| {
                    t.token == token
                        && t.book_id == book_id
                        && t.user_id == user_id
                        && t.is_live(now)
                })
                .cloned())
        }

        async fn deactivate(&self, token: &str) -> AppResult<bool> {
            let mut txs = self.transactions.lock().unwrap();
            match txs.iter_mut().find(|t| t.token == token && t.is_active) {
                Some(t) => {
                    t.is_active = false;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn expire_due(&self, user_id: i32, now: DateTime<Utc>) -> AppResult<Vec<String>> {
            let mut txs = self.transactions.lock().unwrap();
            let mut tokens = Vec::new();
            for t in txs
                .iter_mut()
                .filter(|t| t.user_id == user_id && t.is_active && t.expires_at <= now)
            {
                t.is_active = false;
                tokens.push(t.token.clone());
            }
            Ok(tokens)
        }

        async fn live_loans(
            &self,
            user_id: i32,
            now: DateTime<Utc>,
        ) -> AppResult<Vec<LiveLoan>> {
            let books = self.books.lock().unwrap();
            Ok(self
                .transactions
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.user_id == user_id && t.is_live(now))
                .filter_map(|t| {
                    books.get(&t.book_id).map(|book| LiveLoan {
                        token: t.token.clone(),
                        start_time: t.start_time,
                        expires_at: t.expires_at,
                        book: book.clone(),
                    })
                })
                .collect())
        }

        async fn user_transactions(&self, user_id: i32) -> AppResult<Vec<TransactionDetails>> {
            let books = self.books.lock().unwrap();
            Ok(self
                .transactions
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.user_id == user_id)
                .map(|t| TransactionDetails {
                    id: t.id,
                    token: t.token.clone(),
                    start_time: t.start_time,
                    expires_at: t.expires_at,
                    is_active: t.is_active,
                    user: None,
                    book: books.get(&t.book_id).cloned(),
                })
                .collect())
        }

        async fn all_transactions(&self) -> AppResult<Vec<TransactionDetails>> {
            let books = self.books.lock().unwrap();
            Ok(self
                .transactions
                .lock()
                .unwrap()
                .iter()
                .map(|t| TransactionDetails {
                    id: t.id,
                    token: t.token.clone(),
                    start_time: t.start_time,
                    expires_at: t.expires_at,
                    is_active: t.is_active,
                    user: None,
                    book: books.get(&t.book_id).cloned(),
                })
                .collect())
        }

        async fn push_loan_entry(&self, user_id: i32, entry: &BorrowedBook) -> AppResult<()> {
            if self.fail_mirror.load(Ordering::SeqCst) {
                return Err(AppError::Database(sqlx::Error::PoolClosed));
            }
            self.indexes
                .lock()
                .unwrap()
                .get_mut(&user_id)
                .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", user_id)))?
                .push(entry.clone());
            Ok(())
        }

        async fn remove_loan_entry(&self, user_id: i32, token: &str) -> AppResult<()> {
            if let Some(entries) = self.indexes.lock().unwrap().get_mut(&user_id) {
                entries.retain(|e| e.token != token);
            }
            Ok(())
        }

        async fn rebuild_loan_index(
            &self,
            user_id: i32,
            entries: &[BorrowedBook],
        ) -> AppResult<()> {
            self.indexes
                .lock()
                .unwrap()
                .insert(user_id, entries.to_vec());
            Ok(())
        }

        async fn loan_entries(&self, user_id: i32) -> AppResult<Vec<BorrowedBook>> {
            self.indexes
                .lock()
                .unwrap()
                .get(&user_id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", user_id)))
        }

        async fn increment_borrow_count(&self, _book_id: i32) -> AppResult<()> {
            Ok(())
        }
    }

    fn service(store: Arc<MemoryStore>) -> LoansService {
        LoansService::new(store, LoansConfig { period_days: 7 })
    }

    #[tokio::test]
    async fn borrow_then_read_grants() {
        let store = Arc::new(MemoryStore::with_user_and_book());
        let loans = service(store.clone());

        let receipt = loans.create_loan(1, 10).await.unwrap();
        assert_eq!((receipt.expires_at - Utc::now()).num_days(), 6); // just under 7

        let granted = loans.check_access(&receipt.token, 10, 1).await.unwrap();
        assert_eq!(granted.token, receipt.token);

        // Mirrored into the embedded list
        let index = store.index_of(1);
        assert_eq!(index.len(), 1);
        assert_eq!(index[0].token, receipt.token);
        assert_eq!(index[0].book_id, 10);
    }

    #[tokio::test]
    async fn borrow_unknown_user_fails() {
        let store = Arc::new(MemoryStore::with_user_and_book());
        let loans = service(store);

        let err = loans.create_loan(99, 10).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn borrow_unknown_book_fails() {
        let store = Arc::new(MemoryStore::with_user_and_book());
        let loans = service(store);

        let err = loans.create_loan(1, 99).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_borrow_is_rejected() {
        let store = Arc::new(MemoryStore::with_user_and_book());
        let loans = service(store);

        loans.create_loan(1, 10).await.unwrap();
        let err = loans.create_loan(1, 10).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn borrow_again_after_expiry_succeeds() {
        let store = Arc::new(MemoryStore::with_user_and_book());
        let loans = service(store.clone());

        // An expired loan still flagged active must not block a new
        // borrow of the same book.
        store.seed_transaction(1, 10, "stale-token", -1);

        let receipt = loans.create_loan(1, 10).await.unwrap();
        assert_ne!(receipt.token, "stale-token");
        assert!(!store.transaction("stale-token").is_active);
    }

    #[tokio::test]
    async fn access_denied_for_wrong_user() {
        let store = Arc::new(MemoryStore::with_user_and_book());
        store.add_user(2);
        let loans = service(store);

        let receipt = loans.create_loan(1, 10).await.unwrap();
        let err = loans.check_access(&receipt.token, 10, 2).await.unwrap_err();
        assert!(matches!(err, AppError::Authentication(_)));
    }

    #[tokio::test]
    async fn access_denied_for_wrong_book() {
        let store = Arc::new(MemoryStore::with_user_and_book());
        store.add_book(11, "Foundation");
        let loans = service(store);

        let receipt = loans.create_loan(1, 10).await.unwrap();
        let err = loans.check_access(&receipt.token, 11, 1).await.unwrap_err();
        assert!(matches!(err, AppError::Authentication(_)));
    }

    #[tokio::test]
    async fn expired_token_denied_even_while_flagged_active() {
        let store = Arc::new(MemoryStore::with_user_and_book());
        let loans = service(store.clone());

        let receipt = loans.create_loan(1, 10).await.unwrap();
        store.force_expire(&receipt.token);

        // Flag untouched, expiry alone must deny
        assert!(store.transaction(&receipt.token).is_active);
        let err = loans.check_access(&receipt.token, 10, 1).await.unwrap_err();
        assert!(matches!(err, AppError::Authentication(_)));
    }

    #[tokio::test]
    async fn return_deactivates_and_prunes_index() {
        let store = Arc::new(MemoryStore::with_user_and_book());
        let loans = service(store.clone());

        let receipt = loans.create_loan(1, 10).await.unwrap();
        loans.return_loan(1, &receipt.token).await.unwrap();

        assert!(!store.transaction(&receipt.token).is_active);
        assert!(store.index_of(1).is_empty());

        let err = loans.check_access(&receipt.token, 10, 1).await.unwrap_err();
        assert!(matches!(err, AppError::Authentication(_)));
    }

    #[tokio::test]
    async fn return_is_idempotent() {
        let store = Arc::new(MemoryStore::with_user_and_book());
        let loans = service(store.clone());

        let receipt = loans.create_loan(1, 10).await.unwrap();
        loans.return_loan(1, &receipt.token).await.unwrap();
        // Second return: same end state, no error
        loans.return_loan(1, &receipt.token).await.unwrap();

        assert!(!store.transaction(&receipt.token).is_active);
        assert!(store.index_of(1).is_empty());
    }

    #[tokio::test]
    async fn return_of_expired_loan_is_harmless_cleanup() {
        let store = Arc::new(MemoryStore::with_user_and_book());
        let loans = service(store.clone());

        let receipt = loans.create_loan(1, 10).await.unwrap();
        store.force_expire(&receipt.token);

        loans.return_loan(1, &receipt.token).await.unwrap();
        assert!(!store.transaction(&receipt.token).is_active);
        assert!(store.index_of(1).is_empty());
    }

    #[tokio::test]
    async fn return_unknown_token_not_found() {
        let store = Arc::new(MemoryStore::with_user_and_book());
        let loans = service(store);

        let err = loans.return_loan(1, "no-such-token").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn return_scoped_to_borrowing_user() {
        let store = Arc::new(MemoryStore::with_user_and_book());
        store.add_user(2);
        let loans = service(store.clone());

        let receipt = loans.create_loan(1, 10).await.unwrap();
        let err = loans.return_loan(2, &receipt.token).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(store.transaction(&receipt.token).is_active);
    }

    #[tokio::test]
    async fn reconcile_retires_expired_and_prunes_index() {
        let store = Arc::new(MemoryStore::with_user_and_book());
        store.add_book(11, "Foundation");
        let loans = service(store.clone());

        let expired = loans.create_loan(1, 10).await.unwrap();
        let live = loans.create_loan(1, 11).await.unwrap();
        store.force_expire(&expired.token);

        let outcome = loans.reconcile_expired(1).await.unwrap();
        assert_eq!(outcome.expired_count, 1);
        assert_eq!(outcome.live_loans.len(), 1);
        assert_eq!(outcome.live_loans[0].book.id, 11);

        assert!(!store.transaction(&expired.token).is_active);

        // Both directions: every index entry is a live transaction, and
        // every live transaction has its index entry.
        let index = store.index_of(1);
        assert_eq!(index.len(), 1);
        assert_eq!(index[0].token, live.token);
    }

    #[tokio::test]
    async fn reconcile_twice_reports_zero() {
        let store = Arc::new(MemoryStore::with_user_and_book());
        let loans = service(store.clone());

        let receipt = loans.create_loan(1, 10).await.unwrap();
        store.force_expire(&receipt.token);

        let first = loans.reconcile_expired(1).await.unwrap();
        assert_eq!(first.expired_count, 1);

        let second = loans.reconcile_expired(1).await.unwrap();
        assert_eq!(second.expired_count, 0);
        assert!(second.live_loans.is_empty());
    }

    #[tokio::test]
    async fn reconcile_repairs_index_after_failed_mirror_write() {
        let store = Arc::new(MemoryStore::with_user_and_book());
        let loans = service(store.clone());

        // Borrow succeeds even though the mirror write fails: the
        // transaction store is authoritative.
        store.fail_mirror.store(true, Ordering::SeqCst);
        let receipt = loans.create_loan(1, 10).await.unwrap();
        store.fail_mirror.store(false, Ordering::SeqCst);

        assert!(store.index_of(1).is_empty());
        loans.check_access(&receipt.token, 10, 1).await.unwrap();

        let outcome = loans.reconcile_expired(1).await.unwrap();
        assert_eq!(outcome.expired_count, 0);

        let index = store.index_of(1);
        assert_eq!(index.len(), 1);
        assert_eq!(index[0].token, receipt.token);
    }

    #[tokio::test]
    async fn reconcile_unknown_user_fails() {
        let store = Arc::new(MemoryStore::with_user_and_book());
        let loans = service(store);

        let err = loans.reconcile_expired(99).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn access_gate_is_read_only() {
        // MockLoanStore panics on any call without an expectation, so
        // this also proves the gate touches nothing but the live match.
        let mut mock = MockLoanStore::new();
        mock.expect_find_live_match()
            .times(1)
            .returning(|_, _, _, _| Ok(None));

        let loans = LoansService::new(Arc::new(mock), LoansConfig { period_days: 7 });
        let err = loans.check_access("token", 10, 1).await.unwrap_err();
        assert!(matches!(err, AppError::Authentication(_)));
    }

    #[tokio::test]
    async fn store_failures_propagate_from_borrow() {
        let mut mock = MockLoanStore::new();
        mock.expect_user_exists()
            .returning(|_| Err(AppError::Database(sqlx::Error::PoolClosed)));

        let loans = LoansService::new(Arc::new(mock), LoansConfig { period_days: 7 });
        let err = loans.create_loan(1, 10).await.unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
    }
}
