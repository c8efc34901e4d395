use serde::{Deserialize, Serialize};

/// Global sequence number assigned by the log to every commit attempt.
///
/// Offsets are monotonically increasing across all topics served by one log
/// connection and are never reused. Rejected attempts may still consume an
/// offset, so observable offsets have gaps and must not be assumed contiguous.
pub type Offset = u64;

/// Name of a topic: an independently-fed key-value partition of the log.
///
/// Identity is the name itself. Names are unique within a [`Store`] and a
/// topic is never renamed.
///
/// [`Store`]: crate::store::Store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicName(String);

impl TopicName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TopicName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TopicName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Whether the log accepted a mutation as meaningful.
///
/// `Invalid` is a normal, expected outcome (e.g. a put against a topic the
/// log does not know), not an error. Its exact meaning is defined by the log,
/// never reinterpreted locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Valid,
    Invalid,
}

/// Outcome of a synchronous write call against the log.
///
/// The offset is assigned whether or not the mutation was valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub effect: Effect,
    pub offset: Offset,
}

impl CommitInfo {
    pub fn valid(offset: Offset) -> Self {
        Self {
            effect: Effect::Valid,
            offset,
        }
    }

    pub fn invalid(offset: Offset) -> Self {
        Self {
            effect: Effect::Invalid,
            offset,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.effect == Effect::Valid
    }
}

/// One event on a topic's feed, in the raw byte form the log carries.
///
/// Feeds deliver events strictly ordered by offset within their topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FeedEvent {
    Create {
        offset: Offset,
    },
    Put {
        key: Vec<u8>,
        value: Vec<u8>,
        offset: Offset,
    },
    Delete {
        key: Vec<u8>,
        offset: Offset,
    },
    Destroy {
        offset: Offset,
    },
}

impl FeedEvent {
    pub fn offset(&self) -> Offset {
        match self {
            FeedEvent::Create { offset }
            | FeedEvent::Put { offset, .. }
            | FeedEvent::Delete { offset, .. }
            | FeedEvent::Destroy { offset } => *offset,
        }
    }
}
