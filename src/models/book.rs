//! Book model and related types

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

/// Embedded category reference carried by a book
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct CategoryRef {
    pub id: i32,
    pub name: String,
}

/// Book row without category references
#[derive(Debug, Clone, FromRow)]
pub struct BookRow {
    pub id: i32,
    pub name: String,
    pub author: String,
    pub description: String,
    pub cover_image_url: String,
    pub reader_url: String,
    pub borrow_count: i32,
}

/// Full book model with categories
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Book {
    pub id: i32,
    pub name: String,
    pub author: String,
    pub description: String,
    pub cover_image_url: String,
    pub reader_url: String,
    pub borrow_count: i32,
    pub categories: Vec<CategoryRef>,
}

impl Book {
    pub fn from_row(row: BookRow, categories: Vec<CategoryRef>) -> Self {
        Book {
            id: row.id,
            name: row.name,
            author: row.author,
            description: row.description,
            cover_image_url: row.cover_image_url,
            reader_url: row.reader_url,
            borrow_count: row.borrow_count,
            categories,
        }
    }
}

/// Short book representation for loan listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct BookShort {
    pub id: i32,
    pub name: String,
    pub author: String,
    pub cover_image_url: String,
}

/// Create book request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateBook {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub author: String,
    #[validate(length(min = 1))]
    pub description: String,
    #[validate(url)]
    pub cover_image_url: String,
    #[validate(url)]
    pub reader_url: String,
    #[serde(default)]
    pub categories: Vec<i32>,
}

/// Update book request (partial)
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateBook {
    #[validate(length(min = 1))]
    pub name: Option<String>,
    #[validate(length(min = 1))]
    pub author: Option<String>,
    #[validate(length(min = 1))]
    pub description: Option<String>,
    #[validate(url)]
    pub cover_image_url: Option<String>,
    #[validate(url)]
    pub reader_url: Option<String>,
    pub categories: Option<Vec<i32>>,
}
