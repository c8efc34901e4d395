use crate::connection::{FeedConnection, LogConnector, TopicFeed, WriteConnection};
use crate::types::{CommitInfo, FeedEvent, Offset, TopicName};
use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{info, trace};

/// Fully in-process log, for embedding, demos, and tests.
///
/// Behaves like the external service at the connection boundary: one global
/// offset counter shared by all topics (every attempt consumes an offset,
/// valid or not, so offsets have gaps), writes against a topic with no open
/// feed are rejected as invalid, and each feed delivers its events strictly
/// in offset order on a dedicated thread.
pub struct LocalLog {
    inner: Arc<Mutex<LocalState>>,
}

struct LocalState {
    next_offset: Offset,
    // Offset allocation and enqueue happen under this one lock so per-topic
    // feed order always follows offset order.
    feeds: HashMap<TopicName, mpsc::Sender<FeedEvent>>,
}

impl LocalLog {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(LocalState {
                next_offset: 1,
                feeds: HashMap::new(),
            })),
        }
    }
}

impl Default for LocalLog {
    fn default() -> Self {
        Self::new()
    }
}

impl LogConnector for LocalLog {
    fn open_writer(&self) -> Result<Box<dyn WriteConnection>> {
        Ok(Box::new(LocalWriter {
            inner: self.inner.clone(),
            closed: false,
        }))
    }

    fn open_feed(
        &self,
        topic: &TopicName,
        sink: Arc<dyn TopicFeed>,
    ) -> Result<Box<dyn FeedConnection>> {
        let (sender, receiver) = mpsc::channel::<FeedEvent>();
        {
            let mut state = self.inner.lock().expect("Failed to lock local log state");
            if state.feeds.contains_key(topic) {
                bail!("a feed is already open for topic {topic}");
            }
            state.feeds.insert(topic.clone(), sender);
        }

        let name = topic.clone();
        let thread = std::thread::Builder::new()
            .name(format!("feed-{topic}"))
            .spawn(move || {
                for event in receiver {
                    trace!(topic = %name, offset = event.offset(), "delivering feed event");
                    match event {
                        FeedEvent::Create { offset } => sink.on_create(offset),
                        FeedEvent::Put { key, value, offset } => {
                            sink.on_put(&key, &value, offset)
                        }
                        FeedEvent::Delete { key, offset } => sink.on_delete(&key, offset),
                        FeedEvent::Destroy { offset } => sink.on_destroy(offset),
                    }
                }
            })
            .context("Failed to spawn feed thread")?;

        info!(topic = %topic, "opened local feed");
        Ok(Box::new(LocalFeed {
            inner: self.inner.clone(),
            topic: topic.clone(),
            thread: Some(thread),
        }))
    }
}

struct LocalWriter {
    inner: Arc<Mutex<LocalState>>,
    closed: bool,
}

impl LocalWriter {
    fn submit(
        &mut self,
        topic: &TopicName,
        event: impl FnOnce(Offset) -> FeedEvent,
    ) -> Result<CommitInfo> {
        if self.closed {
            bail!("write connection is closed");
        }
        let mut state = self.inner.lock().expect("Failed to lock local log state");
        let offset = state.next_offset;
        state.next_offset += 1;
        match state.feeds.get(topic) {
            Some(sender) => {
                // A send failure means the feed was closed mid-write; the
                // mutation is still committed on the log's side.
                let _ = sender.send(event(offset));
                Ok(CommitInfo::valid(offset))
            }
            None => Ok(CommitInfo::invalid(offset)),
        }
    }
}

impl WriteConnection for LocalWriter {
    fn create_topic(&mut self, topic: &TopicName, _payload: &[u8]) -> Result<CommitInfo> {
        if self.closed {
            bail!("write connection is closed");
        }
        let mut state = self.inner.lock().expect("Failed to lock local log state");
        let offset = state.next_offset;
        state.next_offset += 1;
        if state.feeds.contains_key(topic) {
            Ok(CommitInfo::invalid(offset))
        } else {
            Ok(CommitInfo::valid(offset))
        }
    }

    fn put(&mut self, topic: &TopicName, key: &[u8], value: &[u8]) -> Result<CommitInfo> {
        let (key, value) = (key.to_vec(), value.to_vec());
        self.submit(topic, move |offset| FeedEvent::Put { key, value, offset })
    }

    fn delete(&mut self, topic: &TopicName, key: &[u8]) -> Result<CommitInfo> {
        let key = key.to_vec();
        self.submit(topic, move |offset| FeedEvent::Delete { key, offset })
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

struct LocalFeed {
    inner: Arc<Mutex<LocalState>>,
    topic: TopicName,
    thread: Option<JoinHandle<()>>,
}

impl FeedConnection for LocalFeed {
    fn close(&mut self) -> Result<()> {
        // Dropping the sender lets the feed thread drain what is already
        // queued and exit.
        self.inner
            .lock()
            .expect("Failed to lock local log state")
            .feeds
            .remove(&self.topic);
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| anyhow!("feed thread for topic {} panicked", self.topic))?;
        }
        info!(topic = %self.topic, "closed local feed");
        Ok(())
    }
}
