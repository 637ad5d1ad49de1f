//!
//! mdwiki page store
//! -----------------
//! Async CRUD façade over the `pages` table. This is the single logical owner
//! of all page data: every read and write goes through one of the operation
//! methods below, which serialize through the shared connection pool.
//!
//! Conventions:
//! - An absent page on a fetch is data (`None`), never an error.
//! - A duplicate name on create surfaces as `AppError::Conflict`; the storage
//!   layer's uniqueness constraint is the arbiter when two creates race.
//! - A save referencing a missing id surfaces as `AppError::NotFound` (zero
//!   rows affected).
//! - Deleting a nonexistent id is idempotent success. This permissiveness is
//!   a compatibility policy, not an accident; keep it.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use tracing::error;

use crate::error::{AppError, AppResult};

/// Operation kinds mapped to their SQL statement templates. The statements
/// are configuration, loaded once; handlers never embed SQL directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlQuery {
    CreatePagesTable,
    SeedPageIdSequence,
    AllPages,
    GetPage,
    GetPageById,
    CreatePage,
    SavePage,
    DeletePage,
    AllPagesData,
}

impl SqlQuery {
    pub fn statement(self) -> &'static str {
        match self {
            SqlQuery::CreatePagesTable => {
                "CREATE TABLE IF NOT EXISTS pages (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL UNIQUE, content TEXT NOT NULL)"
            }
            // AUTOINCREMENT hands out max(seq, max rowid) + 1 and never
            // reuses an id after a delete. Seeding the sequence at -1 makes
            // the first page id 0; the insert is a no-op once the row exists.
            SqlQuery::SeedPageIdSequence => {
                "INSERT INTO sqlite_sequence (name, seq) SELECT 'pages', -1 \
                 WHERE NOT EXISTS (SELECT 1 FROM sqlite_sequence WHERE name = 'pages')"
            }
            SqlQuery::AllPages => "SELECT name FROM pages",
            SqlQuery::GetPage => "SELECT id, content FROM pages WHERE name = ?",
            SqlQuery::GetPageById => "SELECT id, name, content FROM pages WHERE id = ?",
            SqlQuery::CreatePage => "INSERT INTO pages (name, content) VALUES (?, ?)",
            SqlQuery::SavePage => "UPDATE pages SET content = ? WHERE id = ?",
            SqlQuery::DeletePage => "DELETE FROM pages WHERE id = ?",
            SqlQuery::AllPagesData => "SELECT id, name, content FROM pages",
        }
    }
}

/// A stored page: unique immutable id, unique name, raw markdown content.
/// Ids count up from 0 and are never reassigned, even after a delete.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct Page {
    pub id: i64,
    pub name: String,
    pub content: String,
}

/// Result of fetching a page by name: the id plus the raw markdown.
#[derive(Debug, Clone, FromRow, PartialEq, Eq)]
pub struct RawPage {
    pub id: i64,
    pub content: String,
}

/// Shared handle over the page table. Cloning shares the underlying pool.
#[derive(Clone)]
pub struct PageStore {
    pool: SqlitePool,
}

impl PageStore {
    /// Open (or create) the database at `url` and ensure the pages table
    /// exists. Runs before serving begins; a failure here fails startup.
    pub async fn connect(url: &str, max_pool_size: u32) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| AppError::storage("db_config".into(), e.to_string()))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(options)
            .await?;
        sqlx::query(SqlQuery::CreatePagesTable.statement())
            .execute(&pool)
            .await?;
        sqlx::query(SqlQuery::SeedPageIdSequence.statement())
            .execute(&pool)
            .await?;
        Ok(Self { pool })
    }

    /// Access to the underlying pool for the credential tables, which share
    /// the same database file.
    pub fn pool(&self) -> &SqlitePool { &self.pool }

    /// All page names, lexicographically sorted regardless of creation order.
    pub async fn fetch_all_pages(&self) -> AppResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(SqlQuery::AllPages.statement())
            .fetch_all(&self.pool)
            .await
            .map_err(log_db_error)?;
        let mut names: Vec<String> = rows.into_iter().map(|(n,)| n).collect();
        names.sort();
        Ok(names)
    }

    /// Fetch a page by name. `None` means no such page; that is not a failure.
    pub async fn fetch_page(&self, name: &str) -> AppResult<Option<RawPage>> {
        let row = sqlx::query_as::<_, RawPage>(SqlQuery::GetPage.statement())
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(log_db_error)?;
        Ok(row)
    }

    /// Fetch a page by id, same not-found convention as `fetch_page`.
    pub async fn fetch_page_by_id(&self, id: i64) -> AppResult<Option<Page>> {
        let row = sqlx::query_as::<_, Page>(SqlQuery::GetPageById.statement())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(log_db_error)?;
        Ok(row)
    }

    /// Create a page. A second create with the same title loses the race and
    /// reports a duplicate-name conflict; exactly one page stays persisted.
    pub async fn create_page(&self, title: &str, markdown: &str) -> AppResult<()> {
        sqlx::query(SqlQuery::CreatePage.statement())
            .bind(title)
            .bind(markdown)
            .execute(&self.pool)
            .await
            .map_err(log_db_error)?;
        Ok(())
    }

    /// Overwrite the content of an existing page. Zero rows affected means
    /// the id does not exist and is reported as NotFound.
    pub async fn save_page(&self, id: i64, markdown: &str) -> AppResult<()> {
        let result = sqlx::query(SqlQuery::SavePage.statement())
            .bind(markdown)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(log_db_error)?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found(
                "page_not_found".into(),
                format!("no page with id {}", id),
            ));
        }
        Ok(())
    }

    /// Delete a page by id. Zero rows affected is still success.
    pub async fn delete_page(&self, id: i64) -> AppResult<()> {
        sqlx::query(SqlQuery::DeletePage.statement())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(log_db_error)?;
        Ok(())
    }

    /// Bulk export of all pages, used by backup and the API root listing.
    pub async fn fetch_all_pages_data(&self) -> AppResult<Vec<Page>> {
        let rows = sqlx::query_as::<_, Page>(SqlQuery::AllPagesData.statement())
            .fetch_all(&self.pool)
            .await
            .map_err(log_db_error)?;
        Ok(rows)
    }
}

/// Storage failures are logged once with their cause here; callers decide the
/// HTTP representation.
fn log_db_error(err: sqlx::Error) -> AppError {
    let app: AppError = err.into();
    if matches!(app, AppError::Storage { .. }) {
        error!("Database query error: {}", app.message());
    }
    app
}
