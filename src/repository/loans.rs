//! Loan store: transactions and the per-user borrowed-books index

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, Pool, Postgres, Row};

use crate::{
    error::{AppError, AppResult},
    models::{
        book::BookShort,
        transaction::{BorrowerBrief, LiveLoan, NewTransaction, Transaction, TransactionDetails},
        user::BorrowedBook,
    },
};

/// Persistence surface consumed by the loan lifecycle.
///
/// Every method is a single conditional statement against the store; the
/// multi-step borrow/return/reconcile sequences live in the service layer,
/// which is the sole writer of `is_active` and of the borrowed-books index.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LoanStore: Send + Sync {
    async fn user_exists(&self, user_id: i32) -> AppResult<bool>;

    async fn book_summary(&self, book_id: i32) -> AppResult<Option<BookShort>>;

    /// Whether the user currently holds a live loan for this book
    async fn has_live_loan(
        &self,
        user_id: i32,
        book_id: i32,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Persist a new active transaction. A violation of the single live
    /// loan constraint surfaces as `Conflict`.
    async fn insert_transaction(&self, tx: &NewTransaction) -> AppResult<Transaction>;

    async fn find_by_token(&self, token: &str) -> AppResult<Option<Transaction>>;

    /// Three-way live match used by the access gate. Read-only.
    async fn find_live_match(
        &self,
        token: &str,
        book_id: i32,
        user_id: i32,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Transaction>>;

    /// Clear `is_active` for the given token. Returns whether the flag
    /// actually flipped, so repeated calls report false.
    async fn deactivate(&self, token: &str) -> AppResult<bool>;

    /// Deactivate every expired-but-active transaction of the user,
    /// returning the affected tokens.
    async fn expire_due(&self, user_id: i32, now: DateTime<Utc>) -> AppResult<Vec<String>>;

    /// Live transactions of the user joined with book metadata
    async fn live_loans(&self, user_id: i32, now: DateTime<Utc>) -> AppResult<Vec<LiveLoan>>;

    /// Full loan history of one user, newest first
    async fn user_transactions(&self, user_id: i32) -> AppResult<Vec<TransactionDetails>>;

    /// Full loan history across all users, newest first
    async fn all_transactions(&self) -> AppResult<Vec<TransactionDetails>>;

    /// Append one entry to the user's borrowed-books index
    async fn push_loan_entry(&self, user_id: i32, entry: &BorrowedBook) -> AppResult<()>;

    /// Drop the index entry carrying this token, if present
    async fn remove_loan_entry(&self, user_id: i32, token: &str) -> AppResult<()>;

    /// Overwrite the user's borrowed-books index wholesale
    async fn rebuild_loan_index(&self, user_id: i32, entries: &[BorrowedBook]) -> AppResult<()>;

    async fn loan_entries(&self, user_id: i32) -> AppResult<Vec<BorrowedBook>>;

    async fn increment_borrow_count(&self, book_id: i32) -> AppResult<()>;
}

#[derive(Clone)]
pub struct LoansRepository {
    pool: Pool<Postgres>,
}

impl LoansRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn details_from_row(row: &sqlx::postgres::PgRow) -> TransactionDetails {
        let user = row
            .get::<Option<i32>, _>("u_id")
            .map(|id| BorrowerBrief {
                id,
                name: row.get("u_name"),
                surname: row.get("u_surname"),
                email: row.get("u_email"),
            });
        let book = row
            .get::<Option<i32>, _>("b_id")
            .map(|id| BookShort {
                id,
                name: row.get("b_name"),
                author: row.get("b_author"),
                cover_image_url: row.get("b_cover"),
            });
        TransactionDetails {
            id: row.get("id"),
            token: row.get("token"),
            start_time: row.get("start_time"),
            expires_at: row.get("expires_at"),
            is_active: row.get("is_active"),
            user,
            book,
        }
    }
}

const DETAILS_SELECT: &str = r#"
    SELECT t.id, t.token, t.start_time, t.expires_at, t.is_active,
           u.id AS u_id, u.name AS u_name, u.surname AS u_surname, u.email AS u_email,
           b.id AS b_id, b.name AS b_name, b.author AS b_author,
           b.cover_image_url AS b_cover
    FROM transactions t
    LEFT JOIN users u ON u.id = t.user_id
    LEFT JOIN books b ON b.id = t.book_id
"#;

#[async_trait]
impl LoanStore for LoansRepository {
    async fn user_exists(&self, user_id: i32) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn book_summary(&self, book_id: i32) -> AppResult<Option<BookShort>> {
        let book = sqlx::query_as::<_, BookShort>(
            "SELECT id, name, author, cover_image_url FROM books WHERE id = $1",
        )
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(book)
    }

    async fn has_live_loan(
        &self,
        user_id: i32,
        book_id: i32,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM transactions
                WHERE user_id = $1 AND book_id = $2 AND is_active AND expires_at > $3
            )
            "#,
        )
        .bind(user_id)
        .bind(book_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert_transaction(&self, tx: &NewTransaction) -> AppResult<Transaction> {
        let result = sqlx::query_as::<_, Transaction>(
            r#"
            INSERT INTO transactions (user_id, book_id, token, start_time, expires_at, is_active)
            VALUES ($1, $2, $3, $4, $5, TRUE)
            RETURNING *
            "#,
        )
        .bind(tx.user_id)
        .bind(tx.book_id)
        .bind(&tx.token)
        .bind(tx.start_time)
        .bind(tx.expires_at)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(created) => Ok(created),
            Err(sqlx::Error::Database(db))
                if db.constraint() == Some("transactions_live_loan_key") =>
            {
                Err(AppError::Conflict(
                    "Book is already borrowed by this user".to_string(),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_token(&self, token: &str) -> AppResult<Option<Transaction>> {
        let tx = sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tx)
    }

    async fn find_live_match(
        &self,
        token: &str,
        book_id: i32,
        user_id: i32,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Transaction>> {
        let tx = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT * FROM transactions
            WHERE token = $1 AND book_id = $2 AND user_id = $3
              AND is_active AND expires_at > $4
            "#,
        )
        .bind(token)
        .bind(book_id)
        .bind(user_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tx)
    }

    async fn deactivate(&self, token: &str) -> AppResult<bool> {
        let result =
            sqlx::query("UPDATE transactions SET is_active = FALSE WHERE token = $1 AND is_active")
                .bind(token)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn expire_due(&self, user_id: i32, now: DateTime<Utc>) -> AppResult<Vec<String>> {
        let tokens: Vec<String> = sqlx::query_scalar(
            r#"
            UPDATE transactions SET is_active = FALSE
            WHERE user_id = $1 AND is_active AND expires_at <= $2
            RETURNING token
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(tokens)
    }

    async fn live_loans(&self, user_id: i32, now: DateTime<Utc>) -> AppResult<Vec<LiveLoan>> {
        let rows = sqlx::query(
            r#"
            SELECT t.token, t.start_time, t.expires_at,
                   b.id, b.name, b.author, b.cover_image_url
            FROM transactions t
            JOIN books b ON b.id = t.book_id
            WHERE t.user_id = $1 AND t.is_active AND t.expires_at > $2
            ORDER BY t.start_time DESC
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| LiveLoan {
                token: row.get("token"),
                start_time: row.get("start_time"),
                expires_at: row.get("expires_at"),
                book: BookShort {
                    id: row.get("id"),
                    name: row.get("name"),
                    author: row.get("author"),
                    cover_image_url: row.get("cover_image_url"),
                },
            })
            .collect())
    }

    async fn user_transactions(&self, user_id: i32) -> AppResult<Vec<TransactionDetails>> {
        let rows = sqlx::query(&format!(
            "{} WHERE t.user_id = $1 ORDER BY t.start_time DESC",
            DETAILS_SELECT
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::details_from_row).collect())
    }

    async fn all_transactions(&self) -> AppResult<Vec<TransactionDetails>> {
        let rows = sqlx::query(&format!("{} ORDER BY t.start_time DESC", DETAILS_SELECT))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(Self::details_from_row).collect())
    }

    async fn push_loan_entry(&self, user_id: i32, entry: &BorrowedBook) -> AppResult<()> {
        let result =
            sqlx::query("UPDATE users SET borrowed_books = borrowed_books || $2 WHERE id = $1")
                .bind(user_id)
                .bind(Json(entry))
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "User with id {} not found",
                user_id
            )));
        }
        Ok(())
    }

    async fn remove_loan_entry(&self, user_id: i32, token: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET borrowed_books = COALESCE(
                (SELECT jsonb_agg(e)
                 FROM jsonb_array_elements(borrowed_books) AS e
                 WHERE e->>'token' <> $2),
                '[]'::jsonb)
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn rebuild_loan_index(&self, user_id: i32, entries: &[BorrowedBook]) -> AppResult<()> {
        sqlx::query("UPDATE users SET borrowed_books = $2 WHERE id = $1")
            .bind(user_id)
            .bind(Json(entries))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn loan_entries(&self, user_id: i32) -> AppResult<Vec<BorrowedBook>> {
        let entries: Option<Json<Vec<BorrowedBook>>> =
            sqlx::query_scalar("SELECT borrowed_books FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        entries
            .map(|e| e.0)
            .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", user_id)))
    }

    async fn increment_borrow_count(&self, book_id: i32) -> AppResult<()> {
        sqlx::query("UPDATE books SET borrow_count = borrow_count + 1 WHERE id = $1")
            .bind(book_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
