//! Authentication and account service

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;

use crate::{
    config::AuthConfig,
    error::{AppError, AppResult},
    models::user::{RegisterUser, User, UserClaims, UserShort},
    repository::Repository,
};

/// Access/refresh token pair handed out at login
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Clone)]
pub struct AuthService {
    repository: Repository,
    config: AuthConfig,
}

impl AuthService {
    pub fn new(repository: Repository, config: AuthConfig) -> Self {
        Self { repository, config }
    }

    /// Register a new account with the default role
    pub async fn register(&self, user: RegisterUser) -> AppResult<User> {
        if self.repository.users.email_exists(&user.email).await? {
            return Err(AppError::Conflict("Email already exists".to_string()));
        }

        let password_hash = self.hash_password(&user.password)?;
        self.repository.users.create(&user, &password_hash).await
    }

    /// Authenticate by email and password, returning a token pair
    pub async fn authenticate(&self, email: &str, password: &str) -> AppResult<(TokenPair, User)> {
        let user = self
            .repository
            .users
            .get_by_email(email)
            .await?
            .ok_or_else(|| AppError::Authentication("Invalid email or password".to_string()))?;

        if !self.verify_password(&user, password)? {
            return Err(AppError::Authentication(
                "Invalid email or password".to_string(),
            ));
        }

        let tokens = self.issue_tokens(&user)?;
        Ok((tokens, user))
    }

    /// Exchange a valid refresh token for a fresh access token
    pub async fn refresh(&self, refresh_token: &str) -> AppResult<String> {
        let claims = UserClaims::from_token(refresh_token, &self.config.refresh_secret)
            .map_err(|e| AppError::Authentication(e.to_string()))?;

        // Re-read the account so revoked users and role changes take
        // effect at refresh time.
        let user = self.repository.users.get_by_id(claims.user_id).await?;
        self.access_token(&user)
    }

    /// Fetch the authenticated user's own record
    pub async fn profile(&self, user_id: i32) -> AppResult<User> {
        self.repository.users.get_by_id(user_id).await
    }

    /// List all accounts with active loan counts
    pub async fn list_users(&self) -> AppResult<Vec<UserShort>> {
        self.repository.users.list().await
    }

    /// Delete an account
    pub async fn delete_user(&self, user_id: i32) -> AppResult<()> {
        self.repository.users.delete(user_id).await
    }

    fn issue_tokens(&self, user: &User) -> AppResult<TokenPair> {
        let access_token = self.access_token(user)?;

        let now = Utc::now().timestamp();
        let exp = now + (self.config.refresh_expiration_days as i64 * 24 * 3600);
        let refresh_token = self
            .claims(user, now, exp)
            .create_token(&self.config.refresh_secret)
            .map_err(|e| AppError::Internal(format!("Failed to create refresh token: {}", e)))?;

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    fn access_token(&self, user: &User) -> AppResult<String> {
        let now = Utc::now().timestamp();
        let exp = now + (self.config.jwt_expiration_hours as i64 * 3600);
        self.claims(user, now, exp)
            .create_token(&self.config.jwt_secret)
            .map_err(|e| AppError::Internal(format!("Failed to create token: {}", e)))
    }

    fn claims(&self, user: &User, iat: i64, exp: i64) -> UserClaims {
        UserClaims {
            sub: user.email.clone(),
            user_id: user.id,
            roles: user.roles.clone(),
            exp,
            iat,
        }
    }

    /// Hash a password using Argon2
    pub fn hash_password(&self, password: &str) -> AppResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();
        let hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;
        Ok(hash.to_string())
    }

    /// Verify user password
    fn verify_password(&self, user: &User, password: &str) -> AppResult<bool> {
        let parsed_hash = PasswordHash::new(&user.password)
            .map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }
}
