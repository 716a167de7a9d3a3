//! Document store abstraction.
//!
//! The [`DocumentStore`] trait is everything the transfer worker needs from
//! persistence: insert a document into a named collection. Counting and
//! listing support `capture stats` and tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Document;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts `doc` into `collection`. No retries; the caller decides.
    async fn insert(&self, collection: &str, doc: &Document) -> Result<()>;

    /// Number of documents in `collection`.
    async fn count(&self, collection: &str) -> Result<i64>;

    /// All documents in `collection`, in insertion order, as persisted JSON.
    async fn find_all(&self, collection: &str) -> Result<Vec<serde_json::Value>>;
}
