//! In-process [`Broker`] for tests and local runs without Redis.
//!
//! Implements the same list + hash semantics as the Redis adapter. Outages
//! can be injected with [`MemoryBroker::set_online`]: going offline kills
//! every open connection and refuses new ones until the broker is back.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::broker::{Broker, BrokerConnection, Command, Reply};
use crate::error::BrokerError;

#[derive(Default)]
struct State {
    online: bool,
    /// Bumped on every outage so connections opened before it stay dead.
    generation: u64,
    connects: u64,
    lists: HashMap<String, VecDeque<String>>,
    /// Flat `field, value, ...` lists.
    hashes: HashMap<String, Vec<String>>,
}

/// Shared in-memory broker. Clones share the same state.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                online: true,
                ..State::default()
            })),
        }
    }

    /// Simulates the broker going away (`false`) or coming back (`true`).
    pub fn set_online(&self, online: bool) {
        let mut state = self.state.lock().unwrap();
        if state.online && !online {
            state.generation += 1;
        }
        state.online = online;
    }

    /// Number of successful connects so far.
    pub fn connect_count(&self) -> u64 {
        self.state.lock().unwrap().connects
    }

    /// Contents of a list, head first.
    pub fn list(&self, name: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .lists
            .get(name)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Fields of a stored entry as pairs. An odd trailing item is dropped.
    pub fn entry(&self, key: &str) -> Option<Vec<(String, String)>> {
        self.state.lock().unwrap().hashes.get(key).map(|flat| {
            flat.chunks_exact(2)
                .map(|p| (p[0].clone(), p[1].clone()))
                .collect()
        })
    }

    pub fn entry_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.lock().unwrap().hashes.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Stores a raw flat list under `key`, bypassing hash semantics.
    /// Lets tests plant malformed (odd-length) entries.
    pub fn put_raw_entry(&self, key: &str, flat: Vec<String>) {
        self.state
            .lock()
            .unwrap()
            .hashes
            .insert(key.to_string(), flat);
    }

    /// Pushes a key directly onto a list.
    pub fn push_key(&self, list: &str, key: &str) {
        self.state
            .lock()
            .unwrap()
            .lists
            .entry(list.to_string())
            .or_default()
            .push_front(key.to_string());
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn connect(&self) -> Result<Box<dyn BrokerConnection>, BrokerError> {
        let mut state = self.state.lock().unwrap();
        if !state.online {
            return Err(BrokerError::Unavailable("connection refused".to_string()));
        }
        state.connects += 1;
        Ok(Box::new(MemoryConnection {
            state: Arc::clone(&self.state),
            generation: state.generation,
        }))
    }
}

struct MemoryConnection {
    state: Arc<Mutex<State>>,
    generation: u64,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn execute(&mut self, command: &Command) -> Result<Reply, BrokerError> {
        let mut state = self.state.lock().unwrap();
        if !state.online || state.generation != self.generation {
            return Err(BrokerError::Unavailable("connection reset".to_string()));
        }

        let reply = match command {
            Command::Push { list, key } => {
                let list = state.lists.entry(list.clone()).or_default();
                list.push_front(key.clone());
                Reply::Integer(list.len() as i64)
            }
            Command::WriteEntry { key, fields } => {
                let hash = state.hashes.entry(key.clone()).or_default();
                if hash.len() % 2 != 0 {
                    return Err(BrokerError::Command(
                        "WRONGTYPE Operation against a key holding the wrong kind of value"
                            .to_string(),
                    ));
                }
                let mut added = 0;
                for (field, value) in fields {
                    let existing = hash
                        .chunks_exact(2)
                        .position(|p| p[0] == *field)
                        .map(|i| i * 2 + 1);
                    match existing {
                        Some(idx) => hash[idx] = value.clone(),
                        None => {
                            hash.push(field.clone());
                            hash.push(value.clone());
                            added += 1;
                        }
                    }
                }
                Reply::Integer(added)
            }
            Command::Pop { list } => {
                let popped = state.lists.get_mut(list).and_then(|l| l.pop_front());
                if state.lists.get(list).is_some_and(|l| l.is_empty()) {
                    state.lists.remove(list);
                }
                popped.map_or(Reply::Nil, Reply::Text)
            }
            Command::ReadEntry { key } => {
                Reply::List(state.hashes.get(key).cloned().unwrap_or_default())
            }
            Command::DeleteEntry { key } => {
                let removed = state.hashes.remove(key).is_some() as i64
                    + state.lists.remove(key).is_some() as i64;
                Reply::Integer(removed)
            }
            Command::Ping => Reply::Status("PONG".to_string()),
        };
        Ok(reply)
    }
}
