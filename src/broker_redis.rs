//! Redis broker adapter.
//!
//! Each [`Broker::connect`] call opens a fresh multiplexed connection.
//! Connect and command calls are bounded by the configured broker timeout;
//! I/O failures, dropped connections and timeouts surface as
//! [`BrokerError::Unavailable`] so the caller can reconnect.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::time::Duration;

use crate::broker::{Broker, BrokerConnection, Command, Reply};
use crate::config::BrokerConfig;
use crate::error::BrokerError;

pub struct RedisBroker {
    url: String,
    timeout: Duration,
}

impl RedisBroker {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            url: config.url(),
            timeout: config.timeout(),
        }
    }
}

#[async_trait]
impl Broker for RedisBroker {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn connect(&self) -> Result<Box<dyn BrokerConnection>, BrokerError> {
        let client = redis::Client::open(self.url.as_str())
            .map_err(|e| BrokerError::Unavailable(format!("invalid broker url: {}", e)))?;

        let conn = tokio::time::timeout(self.timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| BrokerError::Unavailable(format!("connect to {} timed out", self.url)))?
            .map_err(classify)?;

        Ok(Box::new(RedisConnection {
            conn,
            timeout: self.timeout,
        }))
    }
}

struct RedisConnection {
    conn: MultiplexedConnection,
    timeout: Duration,
}

#[async_trait]
impl BrokerConnection for RedisConnection {
    async fn execute(&mut self, command: &Command) -> Result<Reply, BrokerError> {
        let cmd = to_redis(command);
        let value: redis::Value = tokio::time::timeout(self.timeout, cmd.query_async(&mut self.conn))
            .await
            .map_err(|_| BrokerError::Unavailable(format!("{} timed out", command.name())))?
            .map_err(classify)?;
        Ok(from_redis(value))
    }
}

fn to_redis(command: &Command) -> redis::Cmd {
    let mut cmd = redis::cmd(command.name());
    match command {
        Command::Push { list, key } => {
            cmd.arg(list).arg(key);
        }
        Command::WriteEntry { key, fields } => {
            cmd.arg(key);
            for (field, value) in fields {
                cmd.arg(field).arg(value);
            }
        }
        Command::Pop { list } => {
            cmd.arg(list);
        }
        Command::ReadEntry { key } | Command::DeleteEntry { key } => {
            cmd.arg(key);
        }
        Command::Ping => {}
    }
    cmd
}

fn from_redis(value: redis::Value) -> Reply {
    match value {
        redis::Value::Nil => Reply::Nil,
        redis::Value::Int(n) => Reply::Integer(n),
        redis::Value::BulkString(bytes) => Reply::Text(String::from_utf8_lossy(&bytes).into_owned()),
        redis::Value::SimpleString(s) => Reply::Status(s),
        redis::Value::Okay => Reply::Status("OK".to_string()),
        redis::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    redis::Value::BulkString(bytes) => {
                        out.push(String::from_utf8_lossy(&bytes).into_owned())
                    }
                    other => return Reply::Unexpected(format!("array element {:?}", other)),
                }
            }
            Reply::List(out)
        }
        other => Reply::Unexpected(format!("{:?}", other)),
    }
}

fn classify(err: redis::RedisError) -> BrokerError {
    if err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
    {
        BrokerError::Unavailable(err.to_string())
    } else {
        BrokerError::Command(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hset_arguments() {
        let cmd = to_redis(&Command::WriteEntry {
            key: "/x:alice:1:0".into(),
            fields: vec![("foo".into(), "bar".into()), ("timestamp".into(), "1".into())],
        });
        let packed = String::from_utf8(cmd.get_packed_command()).unwrap();
        assert!(packed.contains("HSET"));
        assert!(packed.contains("/x:alice:1:0"));
        assert!(packed.contains("foo"));
        assert!(packed.contains("timestamp"));
    }

    #[test]
    fn test_reply_mapping() {
        assert_eq!(from_redis(redis::Value::Nil), Reply::Nil);
        assert_eq!(from_redis(redis::Value::Int(3)), Reply::Integer(3));
        assert_eq!(
            from_redis(redis::Value::BulkString(b"k".to_vec())),
            Reply::Text("k".into())
        );
        assert_eq!(
            from_redis(redis::Value::Array(vec![
                redis::Value::BulkString(b"a".to_vec()),
                redis::Value::BulkString(b"b".to_vec()),
            ])),
            Reply::List(vec!["a".into(), "b".into()])
        );
        assert!(matches!(
            from_redis(redis::Value::Array(vec![redis::Value::Nil])),
            Reply::Unexpected(_)
        ));
    }
}
