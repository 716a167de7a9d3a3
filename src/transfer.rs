//! Transfer worker: drains the ordering list into the document store.
//!
//! One iteration:
//!
//! 1. `LPOP` a key. Nothing there → idle sleep.
//! 2. `HGETALL` its entry. Missing, odd-length or rejected → orphaned, no document.
//! 3. Build and insert the document. Insert failures are logged, not retried.
//! 4. `DEL` the entry, whatever happened in 2 and 3.
//!
//! A short fixed delay follows every iteration.
//!
//! Delivery is at-most-once. A key popped in step 1 is gone from the list, so
//! if the worker stops (or the broker fails) before step 4 the entry is never
//! reached again. Broker failures inside the loop are not fatal: the worker
//! reconnects at the fixed interval and carries on.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::broker::{Broker, BrokerConnection, Command, Reply};
use crate::config::Config;
use crate::error::CaptureError;
use crate::link::{advance, connect_with_retry, LinkEvent, LinkState};
use crate::metrics::{MetricsSnapshot, RelayMetrics};
use crate::models::Document;
use crate::server::shutdown_signal;
use crate::store::{DocumentStore, SqliteStore};

#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub list_key: String,
    pub collection: String,
    pub idle_sleep: Duration,
    pub poll_delay: Duration,
    pub reconnect_wait: Duration,
}

impl From<&Config> for TransferSettings {
    fn from(config: &Config) -> Self {
        Self {
            list_key: config.broker.list_key.clone(),
            collection: config.store.collection.clone(),
            idle_sleep: Duration::from_secs(config.transfer.idle_sleep_secs),
            poll_delay: Duration::from_millis(config.transfer.poll_delay_ms),
            reconnect_wait: config.broker.reconnect_wait(),
        }
    }
}

/// What one iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The ordering list was empty.
    Idle,
    Stored { key: String, id: String },
    Orphaned { key: String },
    InsertFailed { key: String },
}

pub struct TransferWorker {
    broker: Arc<dyn Broker>,
    conn: Box<dyn BrokerConnection>,
    store: Arc<dyn DocumentStore>,
    settings: TransferSettings,
    state: watch::Sender<LinkState>,
    metrics: Arc<RelayMetrics>,
}

impl TransferWorker {
    /// Connects to the broker, retrying at the fixed interval until it is
    /// reachable. The store must already be open.
    pub async fn connect(
        broker: Arc<dyn Broker>,
        store: Arc<dyn DocumentStore>,
        settings: TransferSettings,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        tracing::info!(broker = %broker.describe(), "connecting to broker");
        let conn = connect_with_retry(broker.as_ref(), &state, settings.reconnect_wait).await;
        advance(&state, LinkEvent::Established);

        Self {
            broker,
            conn,
            store,
            settings,
            state,
            metrics,
        }
    }

    pub fn link_state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    /// Step 1: pop the most recently pushed key.
    pub async fn pop_key(&mut self) -> Result<Option<String>, CaptureError> {
        let reply = self
            .conn
            .execute(&Command::Pop {
                list: self.settings.list_key.clone(),
            })
            .await?;
        match reply {
            Reply::Text(key) => Ok(Some(key)),
            Reply::Nil => Ok(None),
            other => {
                tracing::warn!(reply = ?other, "unexpected reply to LPOP, treating list as empty");
                Ok(None)
            }
        }
    }

    /// Step 2: read the entry for `key` and build its document.
    ///
    /// An error reply (e.g. `WRONGTYPE`) counts as orphaned like any other
    /// malformed entry; only a lost connection is returned as a broker error.
    pub async fn read_entry(&mut self, key: &str) -> Result<Document, CaptureError> {
        let reply = match self
            .conn
            .execute(&Command::ReadEntry {
                key: key.to_string(),
            })
            .await
        {
            Ok(reply) => reply,
            Err(e) if e.is_connection_lost() => return Err(e.into()),
            Err(e) => {
                tracing::debug!(%key, error = %e, "entry read rejected");
                Reply::Unexpected(e.to_string())
            }
        };
        let document = match reply {
            Reply::List(items) => Document::from_flat_fields(&items),
            _ => None,
        };
        document.ok_or_else(|| CaptureError::OrphanedEntry {
            key: key.to_string(),
        })
    }

    /// Step 3: insert the document. Not retried.
    pub async fn persist(&self, key: &str, doc: &Document) -> Result<(), CaptureError> {
        self.store
            .insert(&self.settings.collection, doc)
            .await
            .map_err(|e| CaptureError::StoreInsertFailure {
                key: key.to_string(),
                reason: format!("{:#}", e),
            })
    }

    /// Step 4: delete the entry.
    pub async fn delete_entry(&mut self, key: &str) -> Result<(), CaptureError> {
        self.conn
            .execute(&Command::DeleteEntry {
                key: key.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Runs one iteration without any of the loop's sleeps.
    ///
    /// `Err` means the broker failed or rejected a command; a key popped
    /// before the failure is lost.
    pub async fn step(&mut self) -> Result<TransferOutcome, CaptureError> {
        let Some(key) = self.pop_key().await? else {
            return Ok(TransferOutcome::Idle);
        };
        tracing::debug!(%key, "popped key");

        let outcome = match self.read_entry(&key).await {
            Ok(doc) => match self.persist(&key, &doc).await {
                Ok(()) => {
                    self.metrics.record_stored();
                    TransferOutcome::Stored {
                        key: key.clone(),
                        id: doc.id,
                    }
                }
                Err(e) => {
                    self.metrics.record_insert_failure();
                    tracing::warn!(error = %e, "document insert failed");
                    TransferOutcome::InsertFailed { key: key.clone() }
                }
            },
            Err(CaptureError::OrphanedEntry { .. }) => {
                self.metrics.record_orphaned();
                tracing::debug!(%key, "orphaned entry, no document built");
                TransferOutcome::Orphaned { key: key.clone() }
            }
            Err(e) => return Err(e),
        };

        self.delete_entry(&key).await?;
        Ok(outcome)
    }

    /// Replaces the broker connection, retrying at the fixed interval.
    pub async fn reconnect(&mut self) {
        self.metrics.record_reconnect();
        advance(&self.state, LinkEvent::Lost);
        self.conn =
            connect_with_retry(self.broker.as_ref(), &self.state, self.settings.reconnect_wait)
                .await;
        advance(&self.state, LinkEvent::Established);
    }

    /// Loops until `shutdown` resolves. Shutdown is only observed between
    /// iterations, never between a pop and its delete.
    pub async fn run_until<F>(mut self, shutdown: F) -> MetricsSnapshot
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            list = %self.settings.list_key,
            collection = %self.settings.collection,
            "transfer worker started"
        );
        tokio::pin!(shutdown);

        loop {
            let pause = match self.step().await {
                Ok(TransferOutcome::Idle) => {
                    tracing::debug!(
                        secs = self.settings.idle_sleep.as_secs_f64(),
                        "no entries, sleeping"
                    );
                    self.settings.idle_sleep + self.settings.poll_delay
                }
                Ok(_) => self.settings.poll_delay,
                Err(CaptureError::BrokerCommand(reason)) => {
                    tracing::warn!(%reason, "broker rejected command");
                    self.settings.poll_delay
                }
                Err(e) => {
                    tracing::warn!(error = %e, "broker failure, reconnecting");
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = self.reconnect() => {}
                    }
                    self.settings.poll_delay
                }
            };

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        let snapshot = self.metrics.snapshot();
        snapshot.log("transfer");
        snapshot
    }
}

/// `capture transfer`: open the store, connect to the broker and move entries
/// until Ctrl-C. Failing to open the store is fatal.
pub async fn run_transfer(config: &Config, broker: Arc<dyn Broker>) -> anyhow::Result<()> {
    let store = Arc::new(SqliteStore::open(&config.store).await?);
    tracing::info!(store = %config.store.url, "document store open");

    let worker = TransferWorker::connect(
        broker,
        store.clone(),
        TransferSettings::from(config),
        Arc::new(RelayMetrics::new()),
    )
    .await;
    worker.run_until(shutdown_signal()).await;

    store.close().await;
    tracing::info!("transfer worker stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker_memory::MemoryBroker;
    use crate::error::BrokerError;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Broker holding one key whose entry has the wrong type. Logs every
    /// connect and command.
    #[derive(Clone, Default)]
    struct WrongTypeBroker {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl WrongTypeBroker {
        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Broker for WrongTypeBroker {
        fn describe(&self) -> String {
            "wrong-type".to_string()
        }

        async fn connect(&self) -> Result<Box<dyn BrokerConnection>, BrokerError> {
            self.log.lock().unwrap().push("CONNECT".to_string());
            Ok(Box::new(WrongTypeConnection {
                log: Arc::clone(&self.log),
                popped: false,
            }))
        }
    }

    struct WrongTypeConnection {
        log: Arc<Mutex<Vec<String>>>,
        popped: bool,
    }

    #[async_trait]
    impl BrokerConnection for WrongTypeConnection {
        async fn execute(&mut self, command: &Command) -> Result<Reply, BrokerError> {
            self.log.lock().unwrap().push(command.name().to_string());
            match command {
                Command::Pop { .. } if !self.popped => {
                    self.popped = true;
                    Ok(Reply::Text("k".to_string()))
                }
                Command::Pop { .. } => Ok(Reply::Nil),
                Command::ReadEntry { .. } => Err(BrokerError::Command(
                    "WRONGTYPE Operation against a key holding the wrong kind of value"
                        .to_string(),
                )),
                Command::DeleteEntry { .. } => Ok(Reply::Integer(1)),
                _ => Ok(Reply::Status("OK".to_string())),
            }
        }
    }

    fn settings() -> TransferSettings {
        TransferSettings {
            list_key: "keys".into(),
            collection: "events".into(),
            idle_sleep: Duration::from_millis(5),
            poll_delay: Duration::from_millis(1),
            reconnect_wait: Duration::from_millis(5),
        }
    }

    fn flat(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    async fn worker(broker: &MemoryBroker, store: Arc<InMemoryStore>) -> TransferWorker {
        TransferWorker::connect(
            Arc::new(broker.clone()),
            store,
            settings(),
            Arc::new(RelayMetrics::new()),
        )
        .await
    }

    #[tokio::test]
    async fn test_idle_when_list_empty() {
        let broker = MemoryBroker::new();
        let mut w = worker(&broker, Arc::new(InMemoryStore::new())).await;
        assert_eq!(w.step().await.unwrap(), TransferOutcome::Idle);
    }

    #[tokio::test]
    async fn test_stores_document_and_deletes_entry() {
        let broker = MemoryBroker::new();
        let store = Arc::new(InMemoryStore::new());
        broker.push_key("keys", "k1");
        broker.put_raw_entry("k1", flat(&["foo", "bar", "timestamp", "99"]));

        let mut w = worker(&broker, store.clone()).await;
        let outcome = w.step().await.unwrap();
        assert!(matches!(outcome, TransferOutcome::Stored { ref key, .. } if key == "k1"));

        let docs = store.find_all("events").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["foo"], "bar");
        assert_eq!(docs[0]["timestamp"], 99);
        assert!(broker.entry("k1").is_none());
        assert!(broker.list("keys").is_empty());
    }

    #[tokio::test]
    async fn test_orphaned_entries_produce_no_document() {
        let broker = MemoryBroker::new();
        let store = Arc::new(InMemoryStore::new());
        broker.push_key("keys", "missing");
        broker.push_key("keys", "odd");
        broker.put_raw_entry("odd", flat(&["a", "b", "c"]));

        let mut w = worker(&broker, store.clone()).await;
        assert_eq!(
            w.step().await.unwrap(),
            TransferOutcome::Orphaned { key: "odd".into() }
        );
        assert_eq!(
            w.step().await.unwrap(),
            TransferOutcome::Orphaned {
                key: "missing".into()
            }
        );

        assert_eq!(store.count("events").await.unwrap(), 0);
        assert!(broker.list("keys").is_empty());
        assert!(broker.entry_keys().is_empty());
        assert_eq!(w.metrics().snapshot().entries_orphaned, 2);
    }

    #[tokio::test]
    async fn test_insert_failure_still_deletes_entry() {
        let broker = MemoryBroker::new();
        let store = Arc::new(InMemoryStore::new());
        store.set_failing(true);
        broker.push_key("keys", "k");
        broker.put_raw_entry("k", flat(&["a", "b"]));

        let mut w = worker(&broker, store.clone()).await;
        assert_eq!(
            w.step().await.unwrap(),
            TransferOutcome::InsertFailed { key: "k".into() }
        );
        assert!(broker.entry("k").is_none());
        assert_eq!(w.metrics().snapshot().insert_failures, 1);
    }

    #[tokio::test]
    async fn test_pop_without_delete_leaks_entry() {
        let broker = MemoryBroker::new();
        broker.push_key("keys", "k");
        broker.put_raw_entry("k", flat(&["a", "b"]));

        let mut w = worker(&broker, Arc::new(InMemoryStore::new())).await;
        assert_eq!(w.pop_key().await.unwrap(), Some("k".to_string()));
        drop(w);

        assert!(broker.list("keys").is_empty());
        assert!(broker.entry("k").is_some());

        let mut next = worker(&broker, Arc::new(InMemoryStore::new())).await;
        assert_eq!(next.step().await.unwrap(), TransferOutcome::Idle);
    }

    #[tokio::test]
    async fn test_broker_failure_is_recoverable() {
        let broker = MemoryBroker::new();
        let store = Arc::new(InMemoryStore::new());
        let mut w = worker(&broker, store.clone()).await;

        broker.set_online(false);
        assert!(matches!(
            w.step().await,
            Err(CaptureError::BrokerUnavailable(_))
        ));
        broker.set_online(true);
        w.reconnect().await;
        assert!(w.link_state().is_connected());

        broker.push_key("keys", "k");
        broker.put_raw_entry("k", flat(&["a", "b"]));
        assert!(matches!(
            w.step().await.unwrap(),
            TransferOutcome::Stored { .. }
        ));
    }

    #[tokio::test]
    async fn test_run_until_drains_and_stops() {
        let broker = MemoryBroker::new();
        let store = Arc::new(InMemoryStore::new());
        for key in ["a", "b", "c"] {
            broker.push_key("keys", key);
            broker.put_raw_entry(key, flat(&["k", key]));
        }

        let w = worker(&broker, store.clone()).await;
        let snapshot = w
            .run_until(tokio::time::sleep(Duration::from_millis(100)))
            .await;
        assert_eq!(snapshot.documents_stored, 3);
        assert_eq!(store.count("events").await.unwrap(), 3);
        assert!(broker.entry_keys().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_read_is_orphaned_and_deleted() {
        let broker = WrongTypeBroker::default();
        let mut w = TransferWorker::connect(
            Arc::new(broker.clone()),
            Arc::new(InMemoryStore::new()),
            settings(),
            Arc::new(RelayMetrics::new()),
        )
        .await;

        assert_eq!(
            w.step().await.unwrap(),
            TransferOutcome::Orphaned { key: "k".into() }
        );
        assert_eq!(broker.log(), vec!["CONNECT", "LPOP", "HGETALL", "DEL"]);
        assert!(w.link_state().is_connected());
    }

    #[tokio::test]
    async fn test_run_until_keeps_connection_on_rejected_read() {
        let broker = WrongTypeBroker::default();
        let w = TransferWorker::connect(
            Arc::new(broker.clone()),
            Arc::new(InMemoryStore::new()),
            settings(),
            Arc::new(RelayMetrics::new()),
        )
        .await;

        let snapshot = w
            .run_until(tokio::time::sleep(Duration::from_millis(50)))
            .await;
        let log = broker.log();
        assert_eq!(&log[..4], ["CONNECT", "LPOP", "HGETALL", "DEL"]);
        assert_eq!(log.iter().filter(|c| *c == "CONNECT").count(), 1);
        assert_eq!(snapshot.reconnects, 0);
        assert_eq!(snapshot.entries_orphaned, 1);
    }
}
