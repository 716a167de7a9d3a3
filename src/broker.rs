//! Queue broker abstraction.
//!
//! The relay only needs a list and a hash store from its broker. Commands
//! are modeled as values so adapters stay thin and the queue writer can
//! stamp and forward them.
//!
//! | Command | Redis |
//! |---------|-------|
//! | [`Command::Push`] | `LPUSH list key` |
//! | [`Command::WriteEntry`] | `HSET key f1 v1 f2 v2 ...` |
//! | [`Command::Pop`] | `LPOP list` |
//! | [`Command::ReadEntry`] | `HGETALL key` |
//! | [`Command::DeleteEntry`] | `DEL key` |
//! | [`Command::Ping`] | `PING` |
//!
//! `Push` and `Pop` work on the same end of the list, so the ordering list
//! is a stack: the most recently captured key is consumed first.

use async_trait::async_trait;

use crate::error::BrokerError;

/// One broker command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Push {
        list: String,
        key: String,
    },
    WriteEntry {
        key: String,
        fields: Vec<(String, String)>,
    },
    Pop {
        list: String,
    },
    ReadEntry {
        key: String,
    },
    DeleteEntry {
        key: String,
    },
    Ping,
}

impl Command {
    /// Redis verb, used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Push { .. } => "LPUSH",
            Command::WriteEntry { .. } => "HSET",
            Command::Pop { .. } => "LPOP",
            Command::ReadEntry { .. } => "HGETALL",
            Command::DeleteEntry { .. } => "DEL",
            Command::Ping => "PING",
        }
    }
}

/// A broker reply, reduced to the shapes the relay cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Integer(i64),
    Text(String),
    /// Flat list of strings, e.g. `field, value, field, value` for `HGETALL`.
    List(Vec<String>),
    Status(String),
    /// Anything else (nested arrays, nil elements, maps).
    Unexpected(String),
}

/// Opens connections to a broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    /// Opens a new connection. Connection-level failures are
    /// [`BrokerError::Unavailable`].
    async fn connect(&self) -> Result<Box<dyn BrokerConnection>, BrokerError>;
}

/// A live broker connection executing one command at a time, in order.
#[async_trait]
pub trait BrokerConnection: Send {
    async fn execute(&mut self, command: &Command) -> Result<Reply, BrokerError>;
}
