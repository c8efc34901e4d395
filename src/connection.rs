use crate::types::{CommitInfo, Offset, TopicName};
use anyhow::Result;
use std::sync::Arc;

/// The single synchronous write channel into the log.
///
/// One connection is shared by every topic in a store; calls block until the
/// log returns a commit outcome and only one write is in flight at a time.
/// `Invalid` outcomes are reported through [`CommitInfo`], never as errors;
/// `Err` means the transport itself failed for that one call.
pub trait WriteConnection: Send {
    fn create_topic(&mut self, topic: &TopicName, payload: &[u8]) -> Result<CommitInfo>;

    fn put(&mut self, topic: &TopicName, key: &[u8], value: &[u8]) -> Result<CommitInfo>;

    fn delete(&mut self, topic: &TopicName, key: &[u8]) -> Result<CommitInfo>;

    fn close(&mut self) -> Result<()>;
}

/// Sink for one topic's event feed.
///
/// The log invokes these callbacks strictly ordered by offset within the
/// topic, from a delivery thread of its own. Offsets are drawn from the same
/// counter as commit outcomes, so they are directly comparable to the offsets
/// in [`CommitInfo`].
pub trait TopicFeed: Send + Sync {
    fn on_create(&self, offset: Offset);

    fn on_put(&self, key: &[u8], value: &[u8], offset: Offset);

    fn on_delete(&self, key: &[u8], offset: Offset);

    fn on_destroy(&self, offset: Offset);
}

/// Handle to an open topic feed; closing it stops delivery.
pub trait FeedConnection: Send {
    fn close(&mut self) -> Result<()>;
}

/// Opens the two halves of a log connection: the shared writer and one event
/// feed per topic. Transport and wire encoding live entirely behind this
/// boundary.
pub trait LogConnector: Send + Sync {
    fn open_writer(&self) -> Result<Box<dyn WriteConnection>>;

    fn open_feed(&self, topic: &TopicName, sink: Arc<dyn TopicFeed>)
        -> Result<Box<dyn FeedConnection>>;
}
