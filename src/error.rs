//! Error taxonomy for the relay.
//!
//! None of these errors ever reach an HTTP caller. They are produced, counted
//! in [`RelayMetrics`](crate::metrics::RelayMetrics) and logged where they
//! occur. Application plumbing (config, CLI, store setup) uses
//! `anyhow::Result` instead.

/// Failure reported by a broker adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// The connection could not be established or was lost mid-command.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// The broker answered with an error reply (e.g. wrong key type).
    #[error("broker rejected command: {0}")]
    Command(String),
}

impl BrokerError {
    /// Whether the error means the connection is gone and must be re-established.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, BrokerError::Unavailable(_))
    }
}

/// Errors raised while moving an event from the HTTP body to a stored document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// The body did not have `=` where a field name should have ended.
    #[error("malformed pair: expected '=' at byte {position}")]
    MalformedPair { position: usize },

    /// No usable broker connection.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// Broker rejected a command outright.
    #[error("broker command failed: {0}")]
    BrokerCommand(String),

    /// A popped key whose entry was missing or not an even field/value list.
    #[error("orphaned entry for key {key}")]
    OrphanedEntry { key: String },

    /// The document store refused the document.
    #[error("failed to store document for key {key}: {reason}")]
    StoreInsertFailure { key: String, reason: String },
}

impl From<BrokerError> for CaptureError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Unavailable(reason) => CaptureError::BrokerUnavailable(reason),
            BrokerError::Command(reason) => CaptureError::BrokerCommand(reason),
        }
    }
}
