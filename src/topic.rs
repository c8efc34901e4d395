use crate::codec::Codec;
use crate::connection::WriteConnection;
use crate::state::SharedState;
use crate::types::TopicName;
use anyhow::{Context, Result};
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Write/read facade bound to one topic.
///
/// A handle is a capability: it proxies the store's shared write channel and
/// shared state, and holds no mutable state (or locks) of its own. Handles
/// are cheap to clone and safe to use from any thread; they remain usable as
/// long as the store exists, and fail once it is closed.
pub struct TopicHandle<K, V> {
    writer: Arc<Mutex<Box<dyn WriteConnection>>>,
    topic: TopicName,
    shared: Arc<SharedState<K, V>>,
    key_codec: Arc<dyn Codec<K>>,
    value_codec: Arc<dyn Codec<V>>,
}

impl<K, V> Clone for TopicHandle<K, V> {
    fn clone(&self) -> Self {
        Self {
            writer: self.writer.clone(),
            topic: self.topic.clone(),
            shared: self.shared.clone(),
            key_codec: self.key_codec.clone(),
            value_codec: self.value_codec.clone(),
        }
    }
}

impl<K, V> TopicHandle<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub(crate) fn new(
        writer: Arc<Mutex<Box<dyn WriteConnection>>>,
        topic: TopicName,
        shared: Arc<SharedState<K, V>>,
        key_codec: Arc<dyn Codec<K>>,
        value_codec: Arc<dyn Codec<V>>,
    ) -> Self {
        Self {
            writer,
            topic,
            shared,
            key_codec,
            value_codec,
        }
    }

    pub fn name(&self) -> &TopicName {
        &self.topic
    }

    /// Submits a put to the log and blocks until it commits.
    ///
    /// Returns `Ok(true)` on a valid commit (recording its offset as the
    /// topic's committed watermark) and `Ok(false)` if the log rejected the
    /// mutation; rejection is a normal outcome, not an error. `Err` is
    /// reserved for transport failure of this one call.
    pub fn put(&self, key: &K, value: &V) -> Result<bool> {
        let raw_key = self.key_codec.serialize(key)?;
        let raw_value = self.value_codec.serialize(value)?;
        let info = self
            .writer
            .lock()
            .expect("Failed to lock write connection")
            .put(&self.topic, &raw_key, &raw_value)
            .with_context(|| format!("put on topic {} failed", self.topic))?;
        if info.is_valid() {
            self.shared.record_commit(&self.topic, info.offset);
            Ok(true)
        } else {
            debug!(topic = %self.topic, offset = info.offset, "put rejected by log");
            Ok(false)
        }
    }

    /// Submits a delete to the log and blocks until it commits.
    ///
    /// Same outcome contract as [`put`](Self::put). Deleting an absent key is
    /// well-formed at this layer; whether the log treats it as valid is the
    /// log's decision.
    pub fn delete(&self, key: &K) -> Result<bool> {
        let raw_key = self.key_codec.serialize(key)?;
        let info = self
            .writer
            .lock()
            .expect("Failed to lock write connection")
            .delete(&self.topic, &raw_key)
            .with_context(|| format!("delete on topic {} failed", self.topic))?;
        if info.is_valid() {
            self.shared.record_commit(&self.topic, info.offset);
            Ok(true)
        } else {
            debug!(topic = %self.topic, offset = info.offset, "delete rejected by log");
            Ok(false)
        }
    }

    /// Reads a key from the local view, first blocking until every write this
    /// store has observed as committed on this topic has been applied.
    ///
    /// Purely local once caught up; no network call. Returns an error only if
    /// the store closes or the configured wait timeout elapses while waiting.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let guard = self.shared.lock();
        let guard = self.shared.wait_caught_up(guard, &self.topic)?;
        Ok(guard
            .topics
            .get(&self.topic)
            .and_then(|data| data.map.get(key))
            .cloned())
    }
}
