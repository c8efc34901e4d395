//! TideKV - a locally materialized key-value view over an external commit log
//!
//! TideKV is a Rust library that keeps an in-memory key-value view of data
//! whose authoritative copy lives in an externally replicated, append-only
//! commit log. Writes go to the log synchronously; the local view catches up
//! asynchronously by replaying each topic's ordered event feed, and reads
//! block just long enough to never lie about what has been applied.
//!
//! # Key Features
//!
//! - **Read-your-writes**: a caller that saw its write commit reads the
//!   written value (or something newer) back, never an older state
//! - **Atomic documents**: one key read consistently across every attached
//!   topic in a single call
//! - **Transport-agnostic**: the log is reached through a small connection
//!   boundary - you provide the client, or use the built-in in-process log
//! - **Pluggable codecs**: typed keys and values per topic, bytes on the wire
//! - **Embeddable**: no runtime, no background machinery beyond one feed
//!   consumer per topic
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use tidekv::codec::StringCodec;
//! use tidekv::local::LocalLog;
//! use tidekv::store::Store;
//! use tidekv::types::TopicName;
//!
//! let store: Store<String, String> = Store::open(LocalLog::new()).unwrap();
//! let topic = store
//!     .define_topic(
//!         &TopicName::new("inventory"),
//!         &[],
//!         Arc::new(StringCodec),
//!         Arc::new(StringCodec),
//!     )
//!     .unwrap()
//!     .expect("topic already exists");
//!
//! assert!(topic.put(&"sku1".to_string(), &"10".to_string()).unwrap());
//! assert_eq!(topic.get(&"sku1".to_string()).unwrap().as_deref(), Some("10"));
//! store.close().unwrap();
//! ```
//!
//! # Architecture
//!
//! One store owns one lock over all topic state. Each topic tracks two
//! watermarks: the highest offset this process has seen commit (write path)
//! and the highest offset applied to the map (feed path). Reads wait until
//! applied catches up to committed as sampled at entry, woken by a broadcast
//! on every applied event.
//!
//! The types you'll work with:
//! - [`store::Store`] - topic table, lifecycle, document reads
//! - [`topic::TopicHandle`] - per-topic put/get/delete
//! - [`connection::LogConnector`] - the boundary a log client implements
//! - [`codec::Codec`] - the byte boundary for keys and values
//!
//! # Non-goals
//!
//! TideKV intentionally does NOT provide:
//! - Consensus, replication, or durability (the external log's job)
//! - Local persistence (the view is volatile and rebuilt by replay)
//! - Cross-topic transactional writes (only atomic document *reads*)
//! - A network transport layer

pub mod codec;
pub mod connection;
pub mod local;
mod state;
pub mod store;
pub mod topic;
pub mod types;

pub use store::{Store, StoreOptions};
pub use topic::TopicHandle;

#[cfg(test)]
mod tests;
