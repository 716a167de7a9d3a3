//! SQLite-backed [`DocumentStore`].
//!
//! Documents live in one `documents` table keyed by id, tagged with their
//! collection. The full JSON document is kept in `body`; `timestamp` is
//! duplicated into its own column for ordering and stats.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::config::StoreConfig;
use crate::db;
use crate::migrate;
use crate::models::Document;

use super::DocumentStore;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens the database and makes sure the schema exists.
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        let pool = db::connect(config)
            .await
            .with_context(|| format!("Failed to open document store at {}", config.url))?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn insert(&self, collection: &str, doc: &Document) -> Result<()> {
        let body = doc.to_json().to_string();
        sqlx::query(
            "INSERT INTO documents (id, collection, timestamp, body, stored_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&doc.id)
        .bind(collection)
        .bind(doc.timestamp)
        .bind(body)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<serde_json::Value>> {
        let bodies: Vec<String> =
            sqlx::query_scalar("SELECT body FROM documents WHERE collection = ? ORDER BY rowid")
                .bind(collection)
                .fetch_all(&self.pool)
                .await?;
        bodies
            .iter()
            .map(|b| serde_json::from_str(b).context("corrupt document body"))
            .collect()
    }
}
