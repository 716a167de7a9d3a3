//! # Capture Relay
//!
//! A two-stage pipeline for web analytics events.
//!
//! Browsers send URL-encoded `key=value` bodies to the capture server, which
//! always answers `200 OK` and queues each event in a Redis-compatible broker.
//! A separate transfer worker drains the broker into a document store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  POST   ┌──────────────┐ LPUSH+HSET ┌────────┐ LPOP+HGETALL+DEL ┌──────────┐
//! │ browser  │────────▶│ capture serve│───────────▶│ broker │◀─────────────────│ transfer │
//! └──────────┘  200    └──────────────┘            └────────┘                  └────┬─────┘
//!                                                                                   ▼
//!                                                                              ┌──────────┐
//!                                                                              │  SQLite  │
//!                                                                              └──────────┘
//! ```
//!
//! Delivery is best-effort: events are dropped while the broker is down and
//! the worker reads the ordering list as a stack (newest first).
//!
//! ## Quick Start
//!
//! ```bash
//! capture init                  # create the document store
//! capture serve                 # accept events on 127.0.0.1:8088
//! capture transfer              # move queued events into the store
//! capture stats                 # what has been stored so far
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML and flat `KEY VALUE` configuration |
//! | [`models`] | Events, queue entries, documents |
//! | [`parser`] | Request body parser |
//! | [`ingest`] | Body → queue entry |
//! | [`server`] | Catch-all HTTP server |
//! | [`broker`] | Broker command set and traits |
//! | [`broker_redis`] | Redis adapter |
//! | [`broker_memory`] | In-process broker |
//! | [`link`] | Connection state machine |
//! | [`queue`] | Fire-and-forget queue writer |
//! | [`transfer`] | Broker → store worker |
//! | [`store`] | Document store trait and backends |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`stats`] | Store statistics |
//! | [`metrics`] | Loss and throughput counters |
//! | [`error`] | Error types |

pub mod broker;
pub mod broker_memory;
pub mod broker_redis;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod link;
pub mod metrics;
pub mod migrate;
pub mod models;
pub mod parser;
pub mod queue;
pub mod server;
pub mod stats;
pub mod store;
pub mod transfer;
