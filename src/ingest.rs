//! Ingestion: raw request body → parsed event → two queue writes.
//!
//! ```text
//! body (≤ max_data_size - 1 bytes)
//!   → percent-decode
//!   → parse_event()
//!   → QueueEntry { "<path>:<user>:<ts>:<seq>", pairs + timestamp }
//!   → LPUSH key, HSET key ...
//! ```
//!
//! Nothing here reports back to the HTTP caller. Parse aborts and dropped
//! writes are visible only in [`RelayMetrics`] and the logs.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::metrics::RelayMetrics;
use crate::models::{CompositeKey, QueueEntry};
use crate::parser::{parse_event, ParseLimits};
use crate::queue::QueueClient;

pub struct IngestService {
    queue: QueueClient,
    limits: ParseLimits,
    max_data_size: usize,
    /// Disambiguates same-second keys. Wraps at 65536.
    sequence: AtomicU16,
    metrics: Arc<RelayMetrics>,
}

impl IngestService {
    pub fn new(queue: QueueClient, config: &CaptureConfig, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            queue,
            limits: ParseLimits::from(config),
            max_data_size: config.max_data_size,
            sequence: AtomicU16::new(0),
            metrics,
        }
    }

    /// Bytes of request body that are kept; the rest is discarded.
    pub fn max_body_bytes(&self) -> usize {
        self.max_data_size.saturating_sub(1)
    }

    pub fn queue(&self) -> &QueueClient {
        &self.queue
    }

    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    /// Decodes, parses and enqueues one request body received at `timestamp`
    /// (seconds since the epoch).
    ///
    /// Returns the key the event was queued under. `Ok` means the writes were
    /// issued, not that they reached the broker.
    pub fn ingest(&self, body: &[u8], timestamp: i64) -> Result<CompositeKey, CaptureError> {
        let body = &body[..body.len().min(self.max_body_bytes())];
        let decoded = urlencoding::decode_binary(body);
        let text = String::from_utf8_lossy(&decoded);

        let event = match parse_event(&text, &self.limits) {
            Ok(event) => event,
            Err(e) => {
                self.metrics.record_malformed();
                tracing::debug!(error = %e, body = %text, "dropping unparseable event");
                return Err(e);
            }
        };

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let entry = QueueEntry::from_event(&event, timestamp, sequence);
        let key = entry.key.clone();
        tracing::debug!(%key, pairs = event.pairs.len(), "queueing event");

        self.metrics.record_accepted();
        self.queue.enqueue(entry);
        Ok(key)
    }
}

/// Current time in whole seconds since the epoch.
pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker_memory::MemoryBroker;
    use crate::queue::QueueSettings;
    use std::time::Duration;

    async fn service(config: CaptureConfig) -> (IngestService, MemoryBroker) {
        let broker = MemoryBroker::new();
        let metrics = Arc::new(RelayMetrics::new());
        let queue = QueueClient::connect(
            Arc::new(broker.clone()),
            QueueSettings {
                list_key: "keys".into(),
                reconnect_wait: Duration::from_millis(10),
                heartbeat: Duration::from_secs(60),
            },
            metrics.clone(),
        )
        .await;
        (IngestService::new(queue, &config, metrics), broker)
    }

    async fn settle(broker: &MemoryBroker, key: &str) {
        for _ in 0..200 {
            if broker.entry(key).is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("entry {} never written", key);
    }

    #[tokio::test]
    async fn test_ingest_writes_entry_with_timestamp() {
        let (svc, broker) = service(CaptureConfig::default()).await;
        let key = svc.ingest(b"user=alice&path=/x&foo=bar", 1700000000).unwrap();
        assert_eq!(key.as_str(), "/x:alice:1700000000:0");

        settle(&broker, key.as_str()).await;
        let entry = broker.entry(key.as_str()).unwrap();
        assert!(entry.contains(&("foo".to_string(), "bar".to_string())));
        assert!(entry.contains(&("timestamp".to_string(), "1700000000".to_string())));
        assert_eq!(broker.list("keys"), vec![key.into_string()]);
    }

    #[tokio::test]
    async fn test_percent_decoding_before_parse() {
        let (svc, broker) = service(CaptureConfig::default()).await;
        let key = svc
            .ingest(b"user=a%40b.com&name=John%20Doe&plus=a+b", 1)
            .unwrap();
        assert_eq!(key.as_str(), "?:a@b.com:1:0");

        settle(&broker, key.as_str()).await;
        let entry = broker.entry(key.as_str()).unwrap();
        assert!(entry.contains(&("name".to_string(), "John+Doe".to_string())));
        assert!(entry.contains(&("plus".to_string(), "a+b".to_string())));
    }

    #[tokio::test]
    async fn test_malformed_body_writes_nothing() {
        let (svc, broker) = service(CaptureConfig::default()).await;
        // The encoded '&' splits "y" off as a field with no '='.
        let err = svc.ingest(b"q=x%26y", 1).unwrap_err();
        assert!(matches!(err, CaptureError::MalformedPair { .. }));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(broker.list("keys").is_empty());
        assert!(broker.entry_keys().is_empty());
        let m = svc.metrics().snapshot();
        assert_eq!(m.events_malformed, 1);
        assert_eq!(m.writes_sent, 0);
    }

    #[tokio::test]
    async fn test_sequence_increments_per_event() {
        let (svc, _broker) = service(CaptureConfig::default()).await;
        let k1 = svc.ingest(b"a=1", 5).unwrap();
        let k2 = svc.ingest(b"a=2", 5).unwrap();
        assert_eq!(k1.as_str(), "?:?:5:0");
        assert_eq!(k2.as_str(), "?:?:5:1");
    }

    #[tokio::test]
    async fn test_body_truncated_to_max_data_size() {
        let config = CaptureConfig {
            max_data_size: 8,
            ..CaptureConfig::default()
        };
        let (svc, broker) = service(config).await;
        // Only "a=123&b" survives the 7-byte cut, which is malformed.
        assert!(svc.ingest(b"a=123&b=4", 1).is_err());

        let key = svc.ingest(b"a=1234567890", 1).unwrap();
        settle(&broker, key.as_str()).await;
        let entry = broker.entry(key.as_str()).unwrap();
        assert_eq!(entry[0], ("a".to_string(), "12345".to_string()));
    }
}
