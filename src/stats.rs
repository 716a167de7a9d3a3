//! Document store statistics.
//!
//! Quick summary of what the transfer worker has persisted: total documents,
//! per-collection counts and the newest event timestamp in each. Used by
//! `capture stats` to check that events are flowing end to end.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::migrate;

struct CollectionStats {
    collection: String,
    doc_count: i64,
    latest_ts: Option<i64>,
    last_stored_ts: Option<i64>,
}

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(&config.store).await?;
    migrate::run_migrations(&pool).await?;

    let total_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await?;

    let db_size = db::database_path(&config.store.url)
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Capture Relay — Store Stats");
    println!("===========================");
    println!();
    println!("  Store:       {}", config.store.url);
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Collection:  {}", config.store.collection);
    println!();
    println!("  Documents:   {}", total_docs);

    let rows = sqlx::query(
        r#"
        SELECT
            collection,
            COUNT(*) AS doc_count,
            MAX(timestamp) AS latest_ts,
            MAX(stored_at) AS last_stored_ts
        FROM documents
        GROUP BY collection
        ORDER BY doc_count DESC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let stats: Vec<CollectionStats> = rows
        .iter()
        .map(|row| CollectionStats {
            collection: row.get("collection"),
            doc_count: row.get("doc_count"),
            latest_ts: row.get("latest_ts"),
            last_stored_ts: row.get("last_stored_ts"),
        })
        .collect();

    if !stats.is_empty() {
        println!();
        println!("  By collection:");
        println!(
            "  {:<28} {:>8}   {:<18} {}",
            "COLLECTION", "DOCS", "LATEST EVENT", "LAST STORED"
        );
        println!("  {}", "-".repeat(76));

        for s in &stats {
            println!(
                "  {:<28} {:>8}   {:<18} {}",
                s.collection,
                s.doc_count,
                s.latest_ts.map(format_ts_iso).unwrap_or_else(|| "-".into()),
                s.last_stored_ts
                    .map(format_ts_relative)
                    .unwrap_or_else(|| "never".into()),
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    format_delta(chrono::Utc::now().timestamp(), ts)
}

fn format_delta(now: i64, ts: i64) -> String {
    let delta = now - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
