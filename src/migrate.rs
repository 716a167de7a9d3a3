use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Creates the document store schema. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per stored document; `body` holds the full JSON document.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            collection TEXT NOT NULL,
            timestamp INTEGER,
            body TEXT NOT NULL,
            stored_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_timestamp ON documents(timestamp DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// `capture init`: open the configured store and create its schema.
pub async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(&config.store).await?;
    run_migrations(&pool).await?;
    pool.close().await;
    Ok(())
}
