//! Books repository for database operations

use std::collections::HashMap;

use sqlx::{Pool, Postgres, Row};

use crate::{
    error::{AppError, AppResult},
    models::book::{Book, BookRow, CategoryRef, CreateBook, UpdateBook},
};

#[derive(Clone)]
pub struct BooksRepository {
    pool: Pool<Postgres>,
}

impl BooksRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get book by ID with its category references
    pub async fn get_by_id(&self, id: i32) -> AppResult<Book> {
        let row = sqlx::query_as::<_, BookRow>("SELECT * FROM books WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))?;

        let categories = self.categories_of(&[id]).await?.remove(&id).unwrap_or_default();
        Ok(Book::from_row(row, categories))
    }

    /// List all books with category references
    pub async fn list(&self) -> AppResult<Vec<Book>> {
        let rows = sqlx::query_as::<_, BookRow>("SELECT * FROM books ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        self.attach_categories(rows).await
    }

    /// Most borrowed books first
    pub async fn top_borrowed(&self, limit: i64) -> AppResult<Vec<Book>> {
        let rows = sqlx::query_as::<_, BookRow>(
            "SELECT * FROM books ORDER BY borrow_count DESC, name LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        self.attach_categories(rows).await
    }

    /// Create a new book and its category links
    pub async fn create(&self, book: &CreateBook) -> AppResult<Book> {
        let row = sqlx::query_as::<_, BookRow>(
            r#"
            INSERT INTO books (name, author, description, cover_image_url, reader_url)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&book.name)
        .bind(&book.author)
        .bind(&book.description)
        .bind(&book.cover_image_url)
        .bind(&book.reader_url)
        .fetch_one(&self.pool)
        .await?;

        let id = row.id;
        self.replace_category_links(id, &book.categories).await?;
        self.get_by_id(id).await
    }

    /// Update an existing book; `categories = Some(_)` replaces the links
    pub async fn update(&self, id: i32, book: &UpdateBook) -> AppResult<Book> {
        let updated = sqlx::query_as::<_, BookRow>(
            r#"
            UPDATE books
            SET name = COALESCE($2, name),
                author = COALESCE($3, author),
                description = COALESCE($4, description),
                cover_image_url = COALESCE($5, cover_image_url),
                reader_url = COALESCE($6, reader_url)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&book.name)
        .bind(&book.author)
        .bind(&book.description)
        .bind(&book.cover_image_url)
        .bind(&book.reader_url)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))?;

        if let Some(ref categories) = book.categories {
            self.replace_category_links(id, categories).await?;
        }

        let categories = self
            .categories_of(&[updated.id])
            .await?
            .remove(&updated.id)
            .unwrap_or_default();
        Ok(Book::from_row(updated, categories))
    }

    /// Delete a book (category links cascade)
    pub async fn delete(&self, id: i32) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Book with id {} not found", id)));
        }
        Ok(())
    }

    async fn replace_category_links(&self, book_id: i32, categories: &[i32]) -> AppResult<()> {
        sqlx::query("DELETE FROM book_categories WHERE book_id = $1")
            .bind(book_id)
            .execute(&self.pool)
            .await?;

        for category_id in categories {
            sqlx::query("INSERT INTO book_categories (book_id, category_id) VALUES ($1, $2)")
                .bind(book_id)
                .bind(category_id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn attach_categories(&self, rows: Vec<BookRow>) -> AppResult<Vec<Book>> {
        let ids: Vec<i32> = rows.iter().map(|r| r.id).collect();
        let mut by_book = self.categories_of(&ids).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let categories = by_book.remove(&row.id).unwrap_or_default();
                Book::from_row(row, categories)
            })
            .collect())
    }

    async fn categories_of(&self, book_ids: &[i32]) -> AppResult<HashMap<i32, Vec<CategoryRef>>> {
        if book_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT bc.book_id, c.id, c.name
            FROM book_categories bc
            JOIN categories c ON c.id = bc.category_id
            WHERE bc.book_id = ANY($1)
            ORDER BY c.name
            "#,
        )
        .bind(book_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_book: HashMap<i32, Vec<CategoryRef>> = HashMap::new();
        for row in rows {
            by_book
                .entry(row.get("book_id"))
                .or_default()
                .push(CategoryRef {
                    id: row.get("id"),
                    name: row.get("name"),
                });
        }
        Ok(by_book)
    }
}
