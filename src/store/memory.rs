//! In-memory [`DocumentStore`] for tests.
//!
//! Uses a `HashMap` of collections behind `std::sync::RwLock`. Inserts can be
//! made to fail with [`InMemoryStore::set_failing`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Document;

use super::DocumentStore;

pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Vec<serde_json::Value>>>,
    failing: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// Makes every following insert fail (`true`) or succeed again (`false`).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn insert(&self, collection: &str, doc: &Document) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("store rejected insert into {}", collection);
        }
        let mut collections = self.collections.write().unwrap();
        collections
            .entry(collection.to_string())
            .or_default()
            .push(doc.to_json());
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<i64> {
        let collections = self.collections.read().unwrap();
        Ok(collections.get(collection).map_or(0, |docs| docs.len() as i64))
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<serde_json::Value>> {
        let collections = self.collections.read().unwrap();
        Ok(collections.get(collection).cloned().unwrap_or_default())
    }
}
