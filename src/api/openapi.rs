//! OpenAPI documentation

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{auth, books, categories, health, loans, users};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Bibliotheca API",
        version = "1.0.0",
        description = "Library Lending System REST API",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Auth
        auth::register,
        auth::login,
        auth::refresh,
        auth::profile,
        // Books
        books::list_books,
        books::suggestions,
        books::get_book,
        books::create_book,
        books::update_book,
        books::delete_book,
        books::borrow_book,
        books::read_book,
        // Categories
        categories::list_categories,
        categories::get_category,
        categories::create_category,
        categories::update_category,
        categories::delete_category,
        // Transactions
        loans::my_transactions,
        loans::active_transactions,
        loans::return_loan,
        loans::all_transactions,
        loans::transactions_by_user,
        // Users
        users::list_users,
        users::get_user,
        users::delete_user,
    ),
    components(
        schemas(
            // Auth
            auth::LoginRequest,
            auth::LoginResponse,
            auth::RefreshRequest,
            auth::RefreshResponse,
            auth::UserInfo,
            // Books
            crate::models::book::Book,
            crate::models::book::BookShort,
            crate::models::book::CategoryRef,
            crate::models::book::CreateBook,
            crate::models::book::UpdateBook,
            books::BorrowResponse,
            books::ReadResponse,
            // Categories
            crate::models::category::Category,
            crate::models::category::CreateCategory,
            crate::models::category::UpdateCategory,
            // Transactions
            crate::models::transaction::Transaction,
            crate::models::transaction::TransactionDetails,
            crate::models::transaction::BorrowerBrief,
            crate::models::transaction::BorrowReceipt,
            crate::models::transaction::LiveLoan,
            crate::models::transaction::ReconcileOutcome,
            loans::ReturnResponse,
            // Users
            crate::models::user::User,
            crate::models::user::UserShort,
            crate::models::user::BorrowedBook,
            crate::models::user::RegisterUser,
            crate::models::user::Role,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "auth", description = "Authentication endpoints"),
        (name = "books", description = "Book catalog, borrowing and reading"),
        (name = "categories", description = "Category management"),
        (name = "transactions", description = "Loan records and reconciliation"),
        (name = "users", description = "User administration")
    )
)]
pub struct ApiDoc;

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
