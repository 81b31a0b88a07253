//! Users repository for database operations

use sqlx::{Pool, Postgres, Row};

use crate::{
    error::{AppError, AppResult},
    models::user::{RegisterUser, Role, User, UserRow, UserShort},
};

#[derive(Clone)]
pub struct UsersRepository {
    pool: Pool<Postgres>,
}

impl UsersRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get user by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<User> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", id)))?;

        Ok(row.into())
    }

    /// Get user by email (primary authentication method)
    pub async fn get_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let row =
            sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(Into::into))
    }

    /// Check if email already exists
    pub async fn email_exists(&self, email: &str) -> AppResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE LOWER(email) = LOWER($1))")
                .bind(email)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    /// Create a new user with an already-hashed password
    pub async fn create(&self, user: &RegisterUser, password_hash: &str) -> AppResult<User> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (email, password, name, surname, roles)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&user.email)
        .bind(password_hash)
        .bind(&user.name)
        .bind(&user.surname)
        .bind(vec![Role::User.as_str().to_string()])
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    /// List all users with their active loan counts, newest first
    pub async fn list(&self) -> AppResult<Vec<UserShort>> {
        let rows = sqlx::query(
            r#"
            SELECT u.id, u.email, u.name, u.surname, u.roles,
                   (SELECT COUNT(*) FROM transactions t
                    WHERE t.user_id = u.id AND t.is_active AND t.expires_at > NOW()) AS nb_loans
            FROM users u
            ORDER BY u.created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| UserShort {
                id: row.get("id"),
                email: row.get("email"),
                name: row.get("name"),
                surname: row.get("surname"),
                roles: row
                    .get::<Vec<String>, _>("roles")
                    .iter()
                    .filter_map(|r| r.parse().ok())
                    .collect(),
                nb_loans: row.get("nb_loans"),
            })
            .collect())
    }

    /// Delete a user
    pub async fn delete(&self, id: i32) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User with id {} not found", id)));
        }
        Ok(())
    }
}
