//! Queue client used by the ingestion side.
//!
//! Writes are fire-and-forget: [`QueueClient::enqueue`] stamps each command
//! with the current connection epoch and hands it to a background writer task
//! over an unbounded channel. The caller never waits on the broker.
//!
//! # Loss model
//!
//! Nothing is buffered across a disconnect:
//!
//! - commands issued while the link is not `Connected` are dropped at once;
//! - commands already queued when the connection dies carry the old epoch and
//!   are dropped by the writer after it reconnects.
//!
//! Every drop is counted in [`RelayMetrics::writes_dropped`] and logged.
//!
//! The two commands of one event (`LPUSH` then `HSET`) are not atomic. Either
//! may be lost independently, leaving an orphaned key or an orphaned hash.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::broker::{Broker, BrokerConnection, Command};
use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::link::{advance, connect_with_retry, LinkEvent, LinkState};
use crate::metrics::RelayMetrics;
use crate::models::QueueEntry;

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub list_key: String,
    pub reconnect_wait: Duration,
    /// Idle interval between liveness pings.
    pub heartbeat: Duration,
}

impl From<&BrokerConfig> for QueueSettings {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            list_key: config.list_key.clone(),
            reconnect_wait: config.reconnect_wait(),
            heartbeat: config.reconnect_wait(),
        }
    }
}

struct Shared {
    list_key: String,
    state: watch::Sender<LinkState>,
    /// Identifies the live connection. Bumped before every reconnect completes.
    epoch: AtomicU64,
    metrics: Arc<RelayMetrics>,
}

struct Pending {
    epoch: u64,
    command: Command,
}

/// Handle for issuing queue writes. Cheap to clone.
#[derive(Clone)]
pub struct QueueClient {
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<Pending>,
}

impl QueueClient {
    /// Connects to the broker, retrying every `reconnect_wait` until it
    /// succeeds, then starts the writer task.
    ///
    /// Does not return before the link is `Connected`.
    pub async fn connect(
        broker: Arc<dyn Broker>,
        settings: QueueSettings,
        metrics: Arc<RelayMetrics>,
    ) -> QueueClient {
        let (state, _) = watch::channel(LinkState::Disconnected);
        tracing::info!(broker = %broker.describe(), "connecting to broker");

        let conn = connect_with_retry(broker.as_ref(), &state, settings.reconnect_wait).await;
        advance(&state, LinkEvent::Established);

        let shared = Arc::new(Shared {
            list_key: settings.list_key.clone(),
            state,
            epoch: AtomicU64::new(1),
            metrics,
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = Writer {
            broker,
            shared: Arc::clone(&shared),
            rx,
            conn,
            settings,
        };
        tokio::spawn(writer.run());

        QueueClient { shared, tx }
    }

    pub fn state(&self) -> LinkState {
        *self.shared.state.borrow()
    }

    /// Receives every link state transition.
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.shared.state.subscribe()
    }

    /// Issues the two writes for one event: push its key onto the ordering
    /// list, then write its hash.
    ///
    /// Returns `true` if both commands were handed to the writer. That is not
    /// a delivery guarantee.
    pub fn enqueue(&self, entry: QueueEntry) -> bool {
        let QueueEntry { key, fields } = entry;
        let key = key.into_string();
        let pushed = self.send(Command::Push {
            list: self.shared.list_key.clone(),
            key: key.clone(),
        });
        let written = self.send(Command::WriteEntry { key, fields });
        pushed && written
    }

    fn send(&self, command: Command) -> bool {
        // Epoch first: a write that saw the old epoch is dropped by the writer
        // even if it races the reconnect.
        let epoch = self.shared.epoch.load(Ordering::SeqCst);
        let state = self.state();
        if !state.is_connected() {
            let dropped = self.shared.metrics.record_dropped_write();
            tracing::warn!(
                command = command.name(),
                link = %state,
                dropped_total = dropped,
                "dropping queue write while broker is unavailable"
            );
            return false;
        }

        if self.tx.send(Pending { epoch, command }).is_err() {
            self.shared.metrics.record_dropped_write();
            tracing::warn!("queue writer has stopped; dropping write");
            return false;
        }
        true
    }
}

/// Owns the broker connection and executes queued commands in order.
struct Writer {
    broker: Arc<dyn Broker>,
    shared: Arc<Shared>,
    rx: mpsc::UnboundedReceiver<Pending>,
    conn: Box<dyn BrokerConnection>,
    settings: QueueSettings,
}

impl Writer {
    async fn run(mut self) {
        let mut heartbeat = tokio::time::interval(self.settings.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                pending = self.rx.recv() => match pending {
                    Some(pending) => self.write(pending).await,
                    None => break,
                },
                _ = heartbeat.tick() => self.ping().await,
            }
        }
        tracing::debug!("queue writer stopped");
    }

    async fn write(&mut self, pending: Pending) {
        if pending.epoch != self.shared.epoch.load(Ordering::SeqCst) {
            self.drop_write(&pending.command, "issued before the connection was lost");
            return;
        }
        match self.conn.execute(&pending.command).await {
            Ok(_) => self.shared.metrics.record_write(),
            Err(e) if e.is_connection_lost() => {
                self.drop_write(&pending.command, "connection lost mid-command");
                self.recover(e).await;
            }
            Err(e) => self.drop_write(&pending.command, &e.to_string()),
        }
    }

    async fn ping(&mut self) {
        match self.conn.execute(&Command::Ping).await {
            Ok(_) => {}
            Err(e) if e.is_connection_lost() => self.recover(e).await,
            Err(e) => tracing::warn!(error = %e, "broker ping rejected"),
        }
    }

    /// Marks the link lost and reconnects at the fixed interval. Returns only
    /// once a new connection is live.
    async fn recover(&mut self, err: BrokerError) {
        tracing::warn!(error = %err, "broker connection lost");
        self.shared.metrics.record_reconnect();
        advance(&self.shared.state, LinkEvent::Lost);

        self.conn = connect_with_retry(
            self.broker.as_ref(),
            &self.shared.state,
            self.settings.reconnect_wait,
        )
        .await;
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        advance(&self.shared.state, LinkEvent::Established);
    }

    fn drop_write(&self, command: &Command, reason: &str) {
        let dropped = self.shared.metrics.record_dropped_write();
        tracing::warn!(
            command = command.name(),
            reason,
            dropped_total = dropped,
            "dropped queue write"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker_memory::MemoryBroker;
    use crate::models::CompositeKey;

    fn settings() -> QueueSettings {
        QueueSettings {
            list_key: "keys".into(),
            reconnect_wait: Duration::from_millis(10),
            heartbeat: Duration::from_millis(10),
        }
    }

    fn entry(name: &str) -> QueueEntry {
        QueueEntry {
            key: CompositeKey::new("/p", name, 1, 0),
            fields: vec![("user".into(), name.into()), ("timestamp".into(), "1".into())],
        }
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    async fn wait_for_state(client: &QueueClient, want: LinkState) {
        let mut rx = client.subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == want))
            .await
            .expect("state not reached in time")
            .expect("state channel closed");
    }

    #[tokio::test]
    async fn test_enqueue_writes_key_and_hash() {
        let broker = MemoryBroker::new();
        let metrics = Arc::new(RelayMetrics::new());
        let client =
            QueueClient::connect(Arc::new(broker.clone()), settings(), metrics.clone()).await;
        assert!(client.state().is_connected());

        assert!(client.enqueue(entry("alice")));
        wait_for(|| broker.entry("/p:alice:1:0").is_some()).await;
        assert_eq!(broker.list("keys"), vec!["/p:alice:1:0".to_string()]);
        wait_for(|| metrics.snapshot().writes_sent == 2).await;
    }

    #[tokio::test]
    async fn test_connect_blocks_until_broker_up() {
        let broker = MemoryBroker::new();
        broker.set_online(false);
        let flip = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            flip.set_online(true);
        });

        let client = QueueClient::connect(
            Arc::new(broker.clone()),
            settings(),
            Arc::new(RelayMetrics::new()),
        )
        .await;
        assert!(client.state().is_connected());
    }

    #[tokio::test]
    async fn test_writes_during_outage_are_dropped() {
        let broker = MemoryBroker::new();
        let metrics = Arc::new(RelayMetrics::new());
        let client =
            QueueClient::connect(Arc::new(broker.clone()), settings(), metrics.clone()).await;

        broker.set_online(false);
        wait_for_state(&client, LinkState::Reconnecting).await;

        assert!(!client.enqueue(entry("lost")));
        assert!(metrics.snapshot().writes_dropped >= 2);

        broker.set_online(true);
        wait_for_state(&client, LinkState::Connected).await;

        assert!(client.enqueue(entry("kept")));
        wait_for(|| broker.entry("/p:kept:1:0").is_some()).await;

        assert!(broker.entry("/p:lost:1:0").is_none());
        assert_eq!(broker.list("keys"), vec!["/p:kept:1:0".to_string()]);
        assert!(metrics.snapshot().reconnects >= 1);
    }
}
