//! Transaction (loan) endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    error::AppResult,
    models::transaction::{ReconcileOutcome, TransactionDetails},
};

use super::AuthenticatedUser;

/// Return confirmation
#[derive(Serialize, ToSchema)]
pub struct ReturnResponse {
    pub status: String,
    pub token: String,
}

/// Get the authenticated user's full loan history
#[utoipa::path(
    get,
    path = "/transactions/my",
    tag = "transactions",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Own loan history", body = Vec<TransactionDetails>)
    )
)]
pub async fn my_transactions(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<TransactionDetails>>> {
    let transactions = state
        .services
        .loans
        .user_transactions(claims.user_id)
        .await?;
    Ok(Json(transactions))
}

/// Get the authenticated user's live loans.
///
/// This is the reconciling read: expired loans are retired and the
/// borrowed-books index is realigned before the live list is returned,
/// so the answer is always accurate without a background job.
#[utoipa::path(
    get,
    path = "/transactions/active",
    tag = "transactions",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Live loans after reconciliation", body = ReconcileOutcome)
    )
)]
pub async fn active_transactions(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<ReconcileOutcome>> {
    let outcome = state
        .services
        .loans
        .reconcile_expired(claims.user_id)
        .await?;
    Ok(Json(outcome))
}

/// Return a borrowed book by its token
#[utoipa::path(
    post,
    path = "/transactions/{token}/return",
    tag = "transactions",
    security(("bearer_auth" = [])),
    params(("token" = String, Path, description = "Borrow token")),
    responses(
        (status = 200, description = "Book returned", body = ReturnResponse),
        (status = 404, description = "No loan with that token for this user")
    )
)]
pub async fn return_loan(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(token): Path<String>,
) -> AppResult<Json<ReturnResponse>> {
    state
        .services
        .loans
        .return_loan(claims.user_id, &token)
        .await?;

    Ok(Json(ReturnResponse {
        status: "returned".to_string(),
        token,
    }))
}

/// Get all transactions (admin only)
#[utoipa::path(
    get,
    path = "/transactions",
    tag = "transactions",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "All transactions", body = Vec<TransactionDetails>),
        (status = 403, description = "Not an administrator")
    )
)]
pub async fn all_transactions(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<TransactionDetails>>> {
    claims.require_admin()?;

    let transactions = state.services.loans.all_transactions().await?;
    Ok(Json(transactions))
}

/// Get transactions of a specific user (admin only)
#[utoipa::path(
    get,
    path = "/transactions/user/{id}",
    tag = "transactions",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "User ID")),
    responses(
        (status = 200, description = "User's loan history", body = Vec<TransactionDetails>),
        (status = 403, description = "Not an administrator")
    )
)]
pub async fn transactions_by_user(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(user_id): Path<i32>,
) -> AppResult<Json<Vec<TransactionDetails>>> {
    claims.require_admin()?;

    let transactions = state.services.loans.user_transactions(user_id).await?;
    Ok(Json(transactions))
}
