//! Broker connection lifecycle.
//!
//! ```text
//!  Disconnected ──Attempt──▶ Connecting ──Established──▶ Connected
//!       ▲                     │     ▲                        │
//!       └──Failed (first)─────┘     │                       Lost
//!                                   │                        ▼
//!                Failed (recovering)└──Attempt──────── Reconnecting
//! ```
//!
//! [`LinkState::on`] is a pure transition function. Pairs not in the
//! diagram leave the state unchanged. The current state lives in a
//! `tokio::sync::watch` channel so any task can subscribe to transitions.

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;

use crate::broker::{Broker, BrokerConnection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No connection has ever been established.
    Disconnected,
    /// An attempt is in flight. `recovering` is set when a previously live
    /// connection was lost.
    Connecting { recovering: bool },
    Connected,
    /// A live connection was lost and has not been replaced yet.
    Reconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Attempt,
    Established,
    Failed,
    Lost,
}

impl LinkState {
    pub fn on(self, event: LinkEvent) -> LinkState {
        use LinkEvent::*;
        use LinkState::*;
        match (self, event) {
            (Disconnected, Attempt) => Connecting { recovering: false },
            (Reconnecting, Attempt) => Connecting { recovering: true },
            (Connecting { .. }, Established) => Connected,
            (Connecting { recovering: false }, Failed) => Disconnected,
            (Connecting { recovering: true }, Failed) => Reconnecting,
            (Connected, Lost) => Reconnecting,
            (state, _) => state,
        }
    }

    pub fn is_connected(self) -> bool {
        self == LinkState::Connected
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting { recovering: false } => "connecting",
            LinkState::Connecting { recovering: true } => "reconnecting (attempt)",
            LinkState::Connected => "connected",
            LinkState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Applies `event` to the published state, logging real transitions.
pub fn advance(state: &watch::Sender<LinkState>, event: LinkEvent) {
    state.send_if_modified(|current| {
        let next = current.on(event);
        if next == *current {
            return false;
        }
        tracing::info!(from = %current, to = %next, "broker link");
        *current = next;
        true
    });
}

/// Attempts to connect every `wait` until the broker accepts. Never gives up.
///
/// Leaves the state at `Connecting`; the caller publishes `Established` once
/// it has installed the connection.
pub async fn connect_with_retry(
    broker: &dyn Broker,
    state: &watch::Sender<LinkState>,
    wait: Duration,
) -> Box<dyn BrokerConnection> {
    loop {
        advance(state, LinkEvent::Attempt);
        match broker.connect().await {
            Ok(conn) => return conn,
            Err(e) => {
                tracing::warn!(
                    broker = %broker.describe(),
                    error = %e,
                    retry_in_secs = wait.as_secs_f64(),
                    "broker connection failed"
                );
                advance(state, LinkEvent::Failed);
                tokio::time::sleep(wait).await;
            }
        }
    }
}
