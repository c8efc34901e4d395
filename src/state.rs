use crate::types::{Offset, TopicName};
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::trace;

/// Materialized view of one topic plus its two watermarks.
///
/// `committed` is the highest offset a write issued through this store is
/// known to have committed as valid; only the write path updates it.
/// `applied` is the highest offset whose event has been folded into `map`;
/// only the feed path updates it, in feed order.
pub(crate) struct TopicState<K, V> {
    pub map: HashMap<K, V>,
    pub committed: Offset,
    pub applied: Offset,
}

impl<K, V> TopicState<K, V> {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            committed: 0,
            applied: 0,
        }
    }
}

pub(crate) struct StoreState<K, V> {
    pub topics: HashMap<TopicName, TopicState<K, V>>,
    pub closed: bool,
}

/// All mutable store state behind one lock, with one condvar for wake.
///
/// A single lock over every topic is deliberate: it lets a document read take
/// a consistent snapshot across topics without torn reads, at the cost of
/// serializing all mutation and read-wait activity store-wide.
pub(crate) struct SharedState<K, V> {
    state: Mutex<StoreState<K, V>>,
    caught_up: Condvar,
    wait_timeout: Option<Duration>,
}

impl<K, V> SharedState<K, V>
where
    K: Eq + Hash,
{
    pub fn new(wait_timeout: Option<Duration>) -> Self {
        Self {
            state: Mutex::new(StoreState {
                topics: HashMap::new(),
                closed: false,
            }),
            caught_up: Condvar::new(),
            wait_timeout,
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, StoreState<K, V>> {
        self.state.lock().expect("Failed to lock store state")
    }

    /// Registers a topic. Registering the same name twice is a usage error.
    ///
    /// # Panics
    ///
    /// Panics if the name is already registered.
    pub fn register(&self, topic: TopicName) {
        let mut state = self.lock();
        let previous = state.topics.insert(topic.clone(), TopicState::new());
        assert!(previous.is_none(), "topic {topic} is already registered");
    }

    /// Records a valid commit outcome for a write issued through this store.
    ///
    /// No wake: nothing waits for the committed watermark to advance.
    pub fn record_commit(&self, topic: &TopicName, offset: Offset) {
        let mut state = self.lock();
        Self::topic_mut(&mut state, topic).committed = offset;
    }

    pub fn apply_create(&self, topic: &TopicName, offset: Offset) {
        let mut state = self.lock();
        let data = Self::topic_mut(&mut state, topic);
        // A topic is only ever created while empty; anything else means the
        // feed and the local view have diverged.
        assert!(
            data.map.is_empty(),
            "create event for topic {topic} arrived over a non-empty map"
        );
        Self::advance_applied(data, topic, offset);
        self.caught_up.notify_all();
    }

    pub fn apply_put(&self, topic: &TopicName, key: K, value: V, offset: Offset) {
        let mut state = self.lock();
        let data = Self::topic_mut(&mut state, topic);
        data.map.insert(key, value);
        Self::advance_applied(data, topic, offset);
        self.caught_up.notify_all();
    }

    pub fn apply_delete(&self, topic: &TopicName, key: &K, offset: Offset) {
        let mut state = self.lock();
        let data = Self::topic_mut(&mut state, topic);
        data.map.remove(key);
        Self::advance_applied(data, topic, offset);
        self.caught_up.notify_all();
    }

    pub fn apply_destroy(&self, topic: &TopicName, offset: Offset) {
        let mut state = self.lock();
        let data = Self::topic_mut(&mut state, topic);
        data.map.clear();
        Self::advance_applied(data, topic, offset);
        self.caught_up.notify_all();
    }

    /// Blocks until the topic's applied watermark reaches the committed
    /// watermark as sampled at entry, releasing the lock while waiting.
    ///
    /// The target is fixed once: a write that commits after entry never
    /// extends this wait. Wakes are broadcast, so the predicate is re-checked
    /// after every wake. Returns an error if the store closes or the
    /// configured wait timeout elapses before the topic catches up.
    pub fn wait_caught_up<'a>(
        &self,
        mut guard: MutexGuard<'a, StoreState<K, V>>,
        topic: &TopicName,
    ) -> Result<MutexGuard<'a, StoreState<K, V>>> {
        let target = Self::topic_ref(&guard, topic).committed;
        let deadline = self.wait_timeout.map(|timeout| Instant::now() + timeout);

        loop {
            if Self::topic_ref(&guard, topic).applied >= target {
                return Ok(guard);
            }
            if guard.closed {
                bail!("store closed while waiting for topic {topic} to catch up");
            }
            guard = match deadline {
                None => self
                    .caught_up
                    .wait(guard)
                    .expect("Failed to lock store state"),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        bail!(
                            "timed out waiting for topic {topic} to catch up to offset {target}"
                        );
                    }
                    self.caught_up
                        .wait_timeout(guard, deadline - now)
                        .expect("Failed to lock store state")
                        .0
                }
            };
        }
    }

    /// Marks the store closed and wakes every blocked reader so it can fail
    /// instead of hanging on a feed that will never catch up.
    pub fn mark_closed(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.caught_up.notify_all();
    }

    fn advance_applied(data: &mut TopicState<K, V>, topic: &TopicName, offset: Offset) {
        debug_assert!(
            offset >= data.applied,
            "applied watermark went backwards on topic {topic}: {offset} < {}",
            data.applied
        );
        data.applied = offset;
        trace!(topic = %topic, offset, "applied feed event");
    }

    fn topic_ref<'a>(
        state: &'a MutexGuard<'_, StoreState<K, V>>,
        topic: &TopicName,
    ) -> &'a TopicState<K, V> {
        state
            .topics
            .get(topic)
            .unwrap_or_else(|| panic!("topic {topic} is not registered"))
    }

    fn topic_mut<'a>(
        state: &'a mut MutexGuard<'_, StoreState<K, V>>,
        topic: &TopicName,
    ) -> &'a mut TopicState<K, V> {
        state
            .topics
            .get_mut(topic)
            .unwrap_or_else(|| panic!("topic {topic} is not registered"))
    }
}
