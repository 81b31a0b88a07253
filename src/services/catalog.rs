//! Catalog management service: books and categories

use crate::{
    error::{AppError, AppResult},
    models::{
        book::{Book, CreateBook, UpdateBook},
        category::{Category, CreateCategory, UpdateCategory},
    },
    repository::Repository,
};

#[derive(Clone)]
pub struct CatalogService {
    repository: Repository,
}

impl CatalogService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// List all books
    pub async fn list_books(&self) -> AppResult<Vec<Book>> {
        self.repository.books.list().await
    }

    /// Get book by ID
    pub async fn get_book(&self, id: i32) -> AppResult<Book> {
        self.repository.books.get_by_id(id).await
    }

    /// Most borrowed books, for the suggestions listing
    pub async fn top_borrowed_books(&self, limit: i64) -> AppResult<Vec<Book>> {
        self.repository.books.top_borrowed(limit).await
    }

    /// Create a new book; every referenced category must exist
    pub async fn create_book(&self, book: CreateBook) -> AppResult<Book> {
        self.check_categories(&book.categories).await?;
        self.repository.books.create(&book).await
    }

    /// Update an existing book
    pub async fn update_book(&self, id: i32, book: UpdateBook) -> AppResult<Book> {
        if let Some(ref categories) = book.categories {
            self.check_categories(categories).await?;
        }
        self.repository.books.update(id, &book).await
    }

    /// Delete a book
    pub async fn delete_book(&self, id: i32) -> AppResult<()> {
        self.repository.books.delete(id).await
    }

    /// List all categories
    pub async fn list_categories(&self) -> AppResult<Vec<Category>> {
        self.repository.categories.list().await
    }

    /// Get category by ID
    pub async fn get_category(&self, id: i32) -> AppResult<Category> {
        self.repository.categories.get_by_id(id).await
    }

    /// Create a new category
    pub async fn create_category(&self, category: CreateCategory) -> AppResult<Category> {
        self.repository.categories.create(&category).await
    }

    /// Update an existing category
    pub async fn update_category(&self, id: i32, category: UpdateCategory) -> AppResult<Category> {
        self.repository.categories.update(id, &category).await
    }

    /// Delete a category
    pub async fn delete_category(&self, id: i32) -> AppResult<()> {
        self.repository.categories.delete(id).await
    }

    async fn check_categories(&self, categories: &[i32]) -> AppResult<()> {
        for category_id in categories {
            if !self.repository.categories.exists(*category_id).await? {
                return Err(AppError::NotFound(format!(
                    "Category with id {} not found",
                    category_id
                )));
            }
        }
        Ok(())
    }
}
