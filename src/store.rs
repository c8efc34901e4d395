use crate::codec::Codec;
use crate::connection::{FeedConnection, LogConnector, TopicFeed, WriteConnection};
use crate::state::SharedState;
use crate::topic::TopicHandle;
use crate::types::{Offset, TopicName};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Store construction options.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Upper bound on how long a read blocks waiting for a topic to catch up.
    ///
    /// `None` waits indefinitely: a reader blocked on a feed that never
    /// advances then hangs until the store is closed.
    pub wait_timeout: Option<Duration>,
}

/// Locally materialized key-value view over an external commit log.
///
/// The store owns the single shared write channel, the table of topic states,
/// and the one lock guarding all of them. Writes go to the log synchronously;
/// the local maps are updated only by replaying each topic's event feed, and
/// reads block until a topic has caught up with the writes this process has
/// observed as committed.
///
/// One store is one consistency domain: the in-memory key and value types are
/// fixed for all topics, while each topic still binds its own codec pair for
/// the byte form the log carries.
pub struct Store<K, V> {
    connector: Box<dyn LogConnector>,
    shared: Arc<SharedState<K, V>>,
    writer: Arc<Mutex<Box<dyn WriteConnection>>>,
    feeds: Mutex<Vec<Box<dyn FeedConnection>>>,
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Opens a store over the given log connection, with default options.
    pub fn open(connector: impl LogConnector + 'static) -> Result<Self> {
        Self::open_with_options(connector, StoreOptions::default())
    }

    pub fn open_with_options(
        connector: impl LogConnector + 'static,
        options: StoreOptions,
    ) -> Result<Self> {
        let writer = connector.open_writer().context("Failed to open writer")?;
        info!(wait_timeout = ?options.wait_timeout, "opened store");
        Ok(Self {
            connector: Box::new(connector),
            shared: Arc::new(SharedState::new(options.wait_timeout)),
            writer: Arc::new(Mutex::new(writer)),
            feeds: Mutex::new(Vec::new()),
        })
    }

    /// Creates a topic on the log and, if the log accepts it, attaches it.
    ///
    /// `Ok(None)` means the log rejected the creation (typically: the topic
    /// already exists); nothing is registered locally and the caller decides
    /// whether that is an error. The creation commit offset is not recorded
    /// as a committed watermark: creation concerns existence, not key-value
    /// validity.
    pub fn define_topic(
        &self,
        name: &TopicName,
        payload: &[u8],
        key_codec: Arc<dyn Codec<K>>,
        value_codec: Arc<dyn Codec<V>>,
    ) -> Result<Option<TopicHandle<K, V>>> {
        let info = self
            .writer
            .lock()
            .expect("Failed to lock write connection")
            .create_topic(name, payload)
            .with_context(|| format!("create of topic {name} failed"))?;
        if !info.is_valid() {
            debug!(topic = %name, offset = info.offset, "topic creation rejected by log");
            return Ok(None);
        }
        Ok(Some(self.register_topic(name.clone(), key_codec, value_codec)))
    }

    /// Attaches to a topic assumed to already exist on the log, without
    /// issuing a create.
    ///
    /// # Panics
    ///
    /// Panics if the name is already registered in this store, or if the
    /// topic's event feed cannot be opened. Both invalidate the store's
    /// exactly-once registration guarantee and are not recoverable.
    pub fn attach_topic(
        &self,
        name: &TopicName,
        key_codec: Arc<dyn Codec<K>>,
        value_codec: Arc<dyn Codec<V>>,
    ) -> TopicHandle<K, V> {
        self.register_topic(name.clone(), key_codec, value_codec)
    }

    /// Assembles the document for a key: its value in every attached topic.
    ///
    /// One lock acquisition spans all topics; each topic is waited on until
    /// it has caught up with the writes observed as committed at the time its
    /// wait starts, then its value (if any) is included. Topics without the
    /// key are simply omitted. Topics attached while this call is in progress
    /// are not part of the document.
    pub fn read_document(&self, key: &K) -> Result<HashMap<TopicName, V>> {
        let mut guard = self.shared.lock();
        let names: Vec<TopicName> = guard.topics.keys().cloned().collect();
        let mut document = HashMap::new();
        for name in names {
            guard = self.shared.wait_caught_up(guard, &name)?;
            if let Some(value) = guard
                .topics
                .get(&name)
                .and_then(|data| data.map.get(key))
                .cloned()
            {
                document.insert(name, value);
            }
        }
        debug!(topics = document.len(), "assembled document");
        Ok(document)
    }

    /// Tears the store down: wakes and fails blocked readers, closes the
    /// write channel, then closes every topic feed.
    ///
    /// Consuming `self` makes a second close unrepresentable. Handles that
    /// outlive the store fail their next operation.
    pub fn close(self) -> Result<()> {
        self.shared.mark_closed();
        self.writer
            .lock()
            .expect("Failed to lock write connection")
            .close()
            .context("Failed to close write connection")?;
        let mut feeds = self.feeds.lock().expect("Failed to lock feed table");
        for feed in feeds.iter_mut() {
            feed.close().context("Failed to close topic feed")?;
        }
        info!("closed store");
        Ok(())
    }

    fn register_topic(
        &self,
        name: TopicName,
        key_codec: Arc<dyn Codec<K>>,
        value_codec: Arc<dyn Codec<V>>,
    ) -> TopicHandle<K, V> {
        // State first, feed second: an event delivered immediately after the
        // feed opens must already find the topic's state.
        self.shared.register(name.clone());
        let applier = Arc::new(FeedApplier {
            shared: self.shared.clone(),
            topic: name.clone(),
            key_codec: key_codec.clone(),
            value_codec: value_codec.clone(),
        });
        let feed = self
            .connector
            .open_feed(&name, applier)
            .unwrap_or_else(|err| panic!("failed to open feed for topic {name}: {err:#}"));
        self.feeds
            .lock()
            .expect("Failed to lock feed table")
            .push(feed);
        info!(topic = %name, "attached topic");
        TopicHandle::new(
            self.writer.clone(),
            name,
            self.shared.clone(),
            key_codec,
            value_codec,
        )
    }
}

/// Feed sink for one topic: decodes each event and folds it into the topic's
/// map under the store lock, advancing the applied watermark and waking
/// blocked readers.
struct FeedApplier<K, V> {
    shared: Arc<SharedState<K, V>>,
    topic: TopicName,
    key_codec: Arc<dyn Codec<K>>,
    value_codec: Arc<dyn Codec<V>>,
}

impl<K, V> FeedApplier<K, V> {
    fn decode_key(&self, key: &[u8]) -> K {
        // The feed replays exactly what the log committed, so an undecodable
        // payload means the view can no longer be trusted.
        self.key_codec
            .deserialize(key)
            .unwrap_or_else(|err| panic!("undecodable key on feed for topic {}: {err:#}", self.topic))
    }

    fn decode_value(&self, value: &[u8]) -> V {
        self.value_codec
            .deserialize(value)
            .unwrap_or_else(|err| {
                panic!("undecodable value on feed for topic {}: {err:#}", self.topic)
            })
    }
}

impl<K, V> TopicFeed for FeedApplier<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    fn on_create(&self, offset: Offset) {
        self.shared.apply_create(&self.topic, offset);
    }

    fn on_put(&self, key: &[u8], value: &[u8], offset: Offset) {
        let key = self.decode_key(key);
        let value = self.decode_value(value);
        self.shared.apply_put(&self.topic, key, value, offset);
    }

    fn on_delete(&self, key: &[u8], offset: Offset) {
        let key = self.decode_key(key);
        self.shared.apply_delete(&self.topic, &key, offset);
    }

    fn on_destroy(&self, offset: Offset) {
        self.shared.apply_destroy(&self.topic, offset);
    }
}
