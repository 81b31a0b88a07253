//! Book catalog and borrow/read endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::book::{Book, CreateBook, UpdateBook},
};

use super::{AuthenticatedUser, BookToken};

/// Suggestions query parameters
#[derive(Deserialize, IntoParams)]
pub struct SuggestionsQuery {
    /// Maximum number of books to return (default 10)
    pub limit: Option<i64>,
}

/// Borrow response with the access token
#[derive(Serialize, ToSchema)]
pub struct BorrowResponse {
    pub message: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Read-access response
#[derive(Serialize, ToSchema)]
pub struct ReadResponse {
    pub message: String,
    pub book_id: i32,
    pub reader_url: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// List all books
#[utoipa::path(
    get,
    path = "/books",
    tag = "books",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "All books", body = Vec<Book>)
    )
)]
pub async fn list_books(
    State(state): State<crate::AppState>,
    AuthenticatedUser(_claims): AuthenticatedUser,
) -> AppResult<Json<Vec<Book>>> {
    let books = state.services.catalog.list_books().await?;
    Ok(Json(books))
}

/// Most borrowed books
#[utoipa::path(
    get,
    path = "/books/suggestions",
    tag = "books",
    security(("bearer_auth" = [])),
    params(SuggestionsQuery),
    responses(
        (status = 200, description = "Most borrowed books", body = Vec<Book>)
    )
)]
pub async fn suggestions(
    State(state): State<crate::AppState>,
    AuthenticatedUser(_claims): AuthenticatedUser,
    Query(query): Query<SuggestionsQuery>,
) -> AppResult<Json<Vec<Book>>> {
    let limit = query.limit.unwrap_or(10).clamp(1, 100);
    let books = state.services.catalog.top_borrowed_books(limit).await?;
    Ok(Json(books))
}

/// Get a single book
#[utoipa::path(
    get,
    path = "/books/{id}",
    tag = "books",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Book ID")),
    responses(
        (status = 200, description = "Book details", body = Book),
        (status = 404, description = "Book not found")
    )
)]
pub async fn get_book(
    State(state): State<crate::AppState>,
    AuthenticatedUser(_claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Book>> {
    let book = state.services.catalog.get_book(id).await?;
    Ok(Json(book))
}

/// Create a new book (admin only)
#[utoipa::path(
    post,
    path = "/books",
    tag = "books",
    security(("bearer_auth" = [])),
    request_body = CreateBook,
    responses(
        (status = 201, description = "Book created", body = Book),
        (status = 400, description = "Invalid payload"),
        (status = 403, description = "Not an administrator"),
        (status = 404, description = "Referenced category not found")
    )
)]
pub async fn create_book(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<CreateBook>,
) -> AppResult<(StatusCode, Json<Book>)> {
    claims.require_admin()?;
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let book = state.services.catalog.create_book(request).await?;
    Ok((StatusCode::CREATED, Json(book)))
}

/// Update a book (admin only)
#[utoipa::path(
    put,
    path = "/books/{id}",
    tag = "books",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Book ID")),
    request_body = UpdateBook,
    responses(
        (status = 200, description = "Book updated", body = Book),
        (status = 403, description = "Not an administrator"),
        (status = 404, description = "Book or referenced category not found")
    )
)]
pub async fn update_book(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    Json(request): Json<UpdateBook>,
) -> AppResult<Json<Book>> {
    claims.require_admin()?;
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let book = state.services.catalog.update_book(id, request).await?;
    Ok(Json(book))
}

/// Delete a book (admin only)
#[utoipa::path(
    delete,
    path = "/books/{id}",
    tag = "books",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Book ID")),
    responses(
        (status = 204, description = "Book deleted"),
        (status = 403, description = "Not an administrator"),
        (status = 404, description = "Book not found")
    )
)]
pub async fn delete_book(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    claims.require_admin()?;
    state.services.catalog.delete_book(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Borrow a book, receiving a timed access token
#[utoipa::path(
    post,
    path = "/books/{id}/borrow",
    tag = "books",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Book ID")),
    responses(
        (status = 201, description = "Book borrowed", body = BorrowResponse),
        (status = 404, description = "Book not found"),
        (status = 409, description = "Book already borrowed by this user")
    )
)]
pub async fn borrow_book(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<(StatusCode, Json<BorrowResponse>)> {
    let receipt = state.services.loans.create_loan(claims.user_id, id).await?;

    Ok((
        StatusCode::CREATED,
        Json(BorrowResponse {
            message: "Book borrowed successfully".to_string(),
            token: receipt.token,
            expires_at: receipt.expires_at,
        }),
    ))
}

/// Read a borrowed book.
///
/// The borrow token is presented via the `Book-Token` header or a
/// `token` query parameter and must match this book and this user while
/// still live.
#[utoipa::path(
    get,
    path = "/books/{id}/read",
    tag = "books",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Book ID"),
        ("token" = Option<String>, Query, description = "Borrow token (alternative to the Book-Token header)")
    ),
    responses(
        (status = 200, description = "Access granted", body = ReadResponse),
        (status = 401, description = "Missing, invalid or expired book token")
    )
)]
pub async fn read_book(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    BookToken(token): BookToken,
    Path(id): Path<i32>,
) -> AppResult<Json<ReadResponse>> {
    let transaction = state
        .services
        .loans
        .check_access(&token, id, claims.user_id)
        .await?;
    let book = state.services.catalog.get_book(id).await?;

    Ok(Json(ReadResponse {
        message: "Access granted to book".to_string(),
        book_id: id,
        reader_url: book.reader_url,
        token: transaction.token,
        expires_at: transaction.expires_at,
    }))
}
