use crate::codec::{BincodeCodec, Codec, I32Codec, StringCodec};
use crate::connection::{FeedConnection, LogConnector, TopicFeed, WriteConnection};
use crate::local::LocalLog;
use crate::store::{Store, StoreOptions};
use crate::types::{CommitInfo, TopicName};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Scripted log connection: records opened feeds and writer closes, returns
/// pre-scripted commit outcomes, and lets tests drive feed events directly.
#[derive(Clone, Default)]
struct ScriptedLog {
    inner: Arc<Mutex<ScriptedState>>,
}

#[derive(Default)]
struct ScriptedState {
    feeds: Vec<ScriptedFeed>,
    create_results: Vec<CommitInfo>,
    write_results: Vec<CommitInfo>,
    writer_closes: usize,
}

struct ScriptedFeed {
    topic: TopicName,
    sink: Arc<dyn TopicFeed>,
    closes: usize,
}

impl ScriptedLog {
    fn script_create(&self, info: CommitInfo) {
        self.inner.lock().unwrap().create_results.push(info);
    }

    fn script_write(&self, info: CommitInfo) {
        self.inner.lock().unwrap().write_results.push(info);
    }

    fn sink(&self, index: usize) -> Arc<dyn TopicFeed> {
        self.inner.lock().unwrap().feeds[index].sink.clone()
    }

    fn feed_count(&self) -> usize {
        self.inner.lock().unwrap().feeds.len()
    }

    fn verify_closed(&self, expected_feeds: usize) {
        let state = self.inner.lock().unwrap();
        assert_eq!(expected_feeds, state.feeds.len());
        for feed in &state.feeds {
            assert_eq!(1, feed.closes, "feed for {} not closed exactly once", feed.topic);
        }
        assert_eq!(1, state.writer_closes);
    }
}

impl LogConnector for ScriptedLog {
    fn open_writer(&self) -> Result<Box<dyn WriteConnection>> {
        Ok(Box::new(ScriptedWriter {
            inner: self.inner.clone(),
        }))
    }

    fn open_feed(
        &self,
        topic: &TopicName,
        sink: Arc<dyn TopicFeed>,
    ) -> Result<Box<dyn FeedConnection>> {
        let mut state = self.inner.lock().unwrap();
        state.feeds.push(ScriptedFeed {
            topic: topic.clone(),
            sink,
            closes: 0,
        });
        Ok(Box::new(ScriptedFeedHandle {
            inner: self.inner.clone(),
            index: state.feeds.len() - 1,
        }))
    }
}

struct ScriptedWriter {
    inner: Arc<Mutex<ScriptedState>>,
}

impl WriteConnection for ScriptedWriter {
    fn create_topic(&mut self, _topic: &TopicName, _payload: &[u8]) -> Result<CommitInfo> {
        let mut state = self.inner.lock().unwrap();
        assert!(!state.create_results.is_empty(), "no scripted create outcome");
        Ok(state.create_results.remove(0))
    }

    fn put(&mut self, _topic: &TopicName, _key: &[u8], _value: &[u8]) -> Result<CommitInfo> {
        let mut state = self.inner.lock().unwrap();
        assert!(!state.write_results.is_empty(), "no scripted write outcome");
        Ok(state.write_results.remove(0))
    }

    fn delete(&mut self, _topic: &TopicName, _key: &[u8]) -> Result<CommitInfo> {
        let mut state = self.inner.lock().unwrap();
        assert!(!state.write_results.is_empty(), "no scripted write outcome");
        Ok(state.write_results.remove(0))
    }

    fn close(&mut self) -> Result<()> {
        self.inner.lock().unwrap().writer_closes += 1;
        Ok(())
    }
}

struct ScriptedFeedHandle {
    inner: Arc<Mutex<ScriptedState>>,
    index: usize,
}

impl FeedConnection for ScriptedFeedHandle {
    fn close(&mut self) -> Result<()> {
        self.inner.lock().unwrap().feeds[self.index].closes += 1;
        Ok(())
    }
}

fn string_store(log: &ScriptedLog) -> Store<String, String> {
    Store::open_with_options(
        log.clone(),
        StoreOptions {
            // Bounded waits keep a regression from hanging the suite.
            wait_timeout: Some(Duration::from_secs(2)),
        },
    )
    .unwrap()
}

fn attach(store: &Store<String, String>, name: &str) -> crate::TopicHandle<String, String> {
    store.attach_topic(
        &TopicName::new(name),
        Arc::new(StringCodec),
        Arc::new(StringCodec),
    )
}

#[test]
fn test_attach_and_close() {
    let log = ScriptedLog::default();
    let store = string_store(&log);
    let _bound = attach(&store, "test");
    assert_eq!(1, log.feed_count());
    store.close().unwrap();
    log.verify_closed(1);
}

#[test]
fn test_empty_store_close() {
    let log = ScriptedLog::default();
    let store = string_store(&log);
    store.close().unwrap();
    log.verify_closed(0);
}

#[test]
fn test_define_topic_registers_on_valid() {
    let log = ScriptedLog::default();
    let store = string_store(&log);
    log.script_create(CommitInfo::valid(1));
    let bound = store
        .define_topic(
            &TopicName::new("test"),
            &[1, 2],
            Arc::new(StringCodec),
            Arc::new(StringCodec),
        )
        .unwrap();
    assert!(bound.is_some());
    assert_eq!(1, log.feed_count());
    store.close().unwrap();
    log.verify_closed(1);
}

#[test]
fn test_define_topic_rejected_registers_nothing() {
    let log = ScriptedLog::default();
    let store = string_store(&log);
    log.script_create(CommitInfo::invalid(1));
    let bound = store
        .define_topic(
            &TopicName::new("test"),
            &[],
            Arc::new(StringCodec),
            Arc::new(StringCodec),
        )
        .unwrap();
    assert!(bound.is_none());
    assert_eq!(0, log.feed_count());
    store.close().unwrap();
    log.verify_closed(0);
}

#[test]
fn test_feed_data_visible_to_reads() {
    let log = ScriptedLog::default();
    let store = string_store(&log);
    let topic = TopicName::new("test");
    let bound = attach(&store, "test");

    // Feeds deliver from their own thread, so drive the sink that way.
    let sink = log.sink(0);
    let feeder = thread::spawn(move || {
        sink.on_create(1);
        sink.on_put(b"key", b"value1", 2);
        sink.on_put(b"key", b"value2", 3);
        sink.on_put(b"key2", b"final", 4);
    });
    feeder.join().unwrap();

    assert_eq!(Some("value2"), bound.get(&"key".to_string()).unwrap().as_deref());
    assert_eq!(Some("final"), bound.get(&"key2".to_string()).unwrap().as_deref());
    let document = store.read_document(&"key".to_string()).unwrap();
    assert_eq!(1, document.len());
    assert_eq!(Some("value2"), document.get(&topic).map(String::as_str));
    assert!(store.read_document(&"notFound".to_string()).unwrap().is_empty());

    store.close().unwrap();
    log.verify_closed(1);
}

#[test]
fn test_documents_across_topics() {
    let log = ScriptedLog::default();
    let store = string_store(&log);
    let topic1 = TopicName::new("topic1");
    let topic2 = TopicName::new("topic2");
    let bound1 = attach(&store, "topic1");
    let bound2 = attach(&store, "topic2");
    assert_eq!(2, log.feed_count());

    let sink1 = log.sink(0);
    let feeder1 = thread::spawn(move || {
        sink1.on_create(1);
        sink1.on_put(b"key", b"value1", 2);
        sink1.on_put(b"key", b"value2", 3);
        sink1.on_put(b"key2", b"final", 4);
    });
    feeder1.join().unwrap();

    let sink2 = log.sink(1);
    let feeder2 = thread::spawn(move || {
        sink2.on_create(5);
        sink2.on_put(b"key", b"value1", 6);
        sink2.on_put(b"key", b"value2", 7);
        sink2.on_delete(b"key", 8);
        sink2.on_put(b"key2", b"other", 9);
    });
    feeder2.join().unwrap();

    assert_eq!(Some("value2"), bound1.get(&"key".to_string()).unwrap().as_deref());
    assert_eq!(None, bound2.get(&"key".to_string()).unwrap());
    let document1 = store.read_document(&"key".to_string()).unwrap();
    assert_eq!(1, document1.len());
    assert_eq!(Some("value2"), document1.get(&topic1).map(String::as_str));
    let document2 = store.read_document(&"key2".to_string()).unwrap();
    assert_eq!(2, document2.len());
    assert_eq!(Some("final"), document2.get(&topic1).map(String::as_str));
    assert_eq!(Some("other"), document2.get(&topic2).map(String::as_str));

    store.close().unwrap();
    log.verify_closed(2);
}

#[test]
fn test_get_blocks_until_committed_write_applies() {
    let log = ScriptedLog::default();
    let store = string_store(&log);
    let bound = attach(&store, "inventory");

    log.script_write(CommitInfo::valid(2));
    assert!(bound.put(&"sku1".to_string(), &"10".to_string()).unwrap());

    // The committed offset is recorded but its event has not arrived; a read
    // must block until it does, never observe the key as absent.
    let sink = log.sink(0);
    let feeder = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        sink.on_put(b"sku1", b"10", 2);
    });
    assert_eq!(Some("10"), bound.get(&"sku1".to_string()).unwrap().as_deref());
    feeder.join().unwrap();

    store.close().unwrap();
    log.verify_closed(1);
}

#[test]
fn test_reader_does_not_wait_for_later_writes() {
    let log = ScriptedLog::default();
    let store = string_store(&log);
    let bound = attach(&store, "test");

    log.script_write(CommitInfo::valid(5));
    assert!(bound.put(&"k1".to_string(), &"x".to_string()).unwrap());

    let reader = thread::spawn({
        let bound = bound.clone();
        move || bound.get(&"k1".to_string()).unwrap()
    });
    thread::sleep(Duration::from_millis(30));

    // A second write commits while the reader is waiting; its target was
    // fixed at entry, so applying offset 5 alone must release it.
    log.script_write(CommitInfo::valid(6));
    assert!(bound.put(&"k2".to_string(), &"y".to_string()).unwrap());
    log.sink(0).on_put(b"k1", b"x", 5);

    assert_eq!(Some("x"), reader.join().unwrap().as_deref());

    store.close().unwrap();
    log.verify_closed(1);
}

#[test]
fn test_rejected_write_leaves_watermarks() {
    let log = ScriptedLog::default();
    let store = string_store(&log);
    let bound = attach(&store, "test");

    log.script_write(CommitInfo::invalid(7));
    assert!(!bound.put(&"k".to_string(), &"v".to_string()).unwrap());
    // Nothing committed, so a read returns immediately with nothing.
    assert_eq!(None, bound.get(&"k".to_string()).unwrap());

    store.close().unwrap();
    log.verify_closed(1);
}

#[test]
fn test_document_waits_for_lagging_topic() {
    let log = ScriptedLog::default();
    let store = Arc::new(string_store(&log));
    let bound_a = attach(&store, "a");
    let bound_b = attach(&store, "b");

    // Topic "a" is fully caught up.
    log.script_write(CommitInfo::valid(5));
    assert!(bound_a.put(&"k1".to_string(), &"x".to_string()).unwrap());
    log.sink(0).on_put(b"k1", b"x", 5);

    // Topic "b" has a committed write whose event is still in flight.
    log.script_write(CommitInfo::valid(6));
    assert!(bound_b.put(&"k1".to_string(), &"y".to_string()).unwrap());

    let reader = thread::spawn({
        let store = store.clone();
        move || store.read_document(&"k1".to_string()).unwrap()
    });
    thread::sleep(Duration::from_millis(50));
    log.sink(1).on_put(b"k1", b"y", 6);

    let document = reader.join().unwrap();
    assert_eq!(2, document.len());
    assert_eq!(Some("x"), document.get(&TopicName::new("a")).map(String::as_str));
    assert_eq!(Some("y"), document.get(&TopicName::new("b")).map(String::as_str));

    Arc::into_inner(store)
        .expect("store still referenced")
        .close()
        .unwrap();
    log.verify_closed(2);
}

#[test]
fn test_close_wakes_blocked_reader() {
    let log = ScriptedLog::default();
    let store = Store::open(log.clone()).unwrap();
    let bound = attach(&store, "test");

    log.script_write(CommitInfo::valid(3));
    assert!(bound.put(&"k".to_string(), &"v".to_string()).unwrap());

    // The event never arrives; closing the store must fail the reader
    // instead of leaving it blocked forever.
    let reader = thread::spawn({
        let bound = bound.clone();
        move || bound.get(&"k".to_string())
    });
    thread::sleep(Duration::from_millis(50));
    store.close().unwrap();

    assert!(reader.join().unwrap().is_err());
    log.verify_closed(1);
}

#[test]
fn test_wait_timeout_bounds_blocked_reader() {
    let log = ScriptedLog::default();
    let store = Store::open_with_options(
        log.clone(),
        StoreOptions {
            wait_timeout: Some(Duration::from_millis(50)),
        },
    )
    .unwrap();
    let bound = attach(&store, "test");

    log.script_write(CommitInfo::valid(3));
    assert!(bound.put(&"k".to_string(), &"v".to_string()).unwrap());
    assert!(bound.get(&"k".to_string()).is_err());

    store.close().unwrap();
    log.verify_closed(1);
}

#[test]
#[should_panic(expected = "already registered")]
fn test_duplicate_attach_panics() {
    let log = ScriptedLog::default();
    let store = string_store(&log);
    let _first = attach(&store, "test");
    let _second = attach(&store, "test");
}

#[test]
#[should_panic(expected = "non-empty map")]
fn test_create_event_requires_empty_map() {
    let log = ScriptedLog::default();
    let store = string_store(&log);
    let _bound = attach(&store, "test");
    let sink = log.sink(0);
    sink.on_put(b"key", b"value", 1);
    sink.on_create(2);
}

#[test]
fn test_local_log_read_your_writes() {
    let store: Store<String, String> = Store::open(LocalLog::new()).unwrap();
    let topic = store
        .define_topic(
            &TopicName::new("inventory"),
            &[],
            Arc::new(StringCodec),
            Arc::new(StringCodec),
        )
        .unwrap()
        .expect("fresh topic");

    assert!(topic.put(&"sku1".to_string(), &"10".to_string()).unwrap());
    assert_eq!(Some("10"), topic.get(&"sku1".to_string()).unwrap().as_deref());

    assert!(topic.put(&"sku1".to_string(), &"11".to_string()).unwrap());
    assert_eq!(Some("11"), topic.get(&"sku1".to_string()).unwrap().as_deref());

    assert!(topic.delete(&"sku1".to_string()).unwrap());
    assert_eq!(None, topic.get(&"sku1".to_string()).unwrap());

    // A second definition of the same name is rejected by the log.
    let again = store
        .define_topic(
            &TopicName::new("inventory"),
            &[],
            Arc::new(StringCodec),
            Arc::new(StringCodec),
        )
        .unwrap();
    assert!(again.is_none());

    store.close().unwrap();
}

#[test]
fn test_local_log_document() {
    let store: Store<String, String> = Store::open(LocalLog::new()).unwrap();
    let accounts = store
        .define_topic(
            &TopicName::new("accounts"),
            &[],
            Arc::new(StringCodec),
            Arc::new(StringCodec),
        )
        .unwrap()
        .expect("fresh topic");
    let orders = store
        .define_topic(
            &TopicName::new("orders"),
            &[],
            Arc::new(StringCodec),
            Arc::new(StringCodec),
        )
        .unwrap()
        .expect("fresh topic");

    assert!(accounts.put(&"alice".to_string(), &"active".to_string()).unwrap());
    assert!(orders.put(&"alice".to_string(), &"3".to_string()).unwrap());
    assert!(orders.put(&"bob".to_string(), &"1".to_string()).unwrap());

    let document = store.read_document(&"alice".to_string()).unwrap();
    assert_eq!(2, document.len());
    assert_eq!(
        Some("active"),
        document.get(&TopicName::new("accounts")).map(String::as_str)
    );
    assert_eq!(
        Some("3"),
        document.get(&TopicName::new("orders")).map(String::as_str)
    );

    let partial = store.read_document(&"bob".to_string()).unwrap();
    assert_eq!(1, partial.len());

    store.close().unwrap();
}

#[test]
fn test_local_log_rejects_unknown_topic() {
    let log = LocalLog::new();
    let mut writer = log.open_writer().unwrap();

    let first = writer.put(&TopicName::new("ghost"), b"k", b"v").unwrap();
    assert!(!first.is_valid());

    // Rejected attempts still consume offsets, so gaps are observable.
    let second = writer.delete(&TopicName::new("ghost"), b"k").unwrap();
    assert!(!second.is_valid());
    assert!(second.offset > first.offset);
}

#[test]
fn test_closed_local_writer_fails() {
    let log = LocalLog::new();
    let mut writer = log.open_writer().unwrap();
    writer.close().unwrap();
    assert!(writer.put(&TopicName::new("t"), b"k", b"v").is_err());
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct SkuRecord {
    count: u32,
    location: String,
}

#[test]
fn test_codec_round_trips() {
    let strings = StringCodec;
    let text = "warehouse-7".to_string();
    assert_eq!(text, strings.deserialize(&strings.serialize(&text).unwrap()).unwrap());

    let ints = I32Codec;
    for value in [0, 1, -1, i32::MIN, i32::MAX] {
        assert_eq!(value, ints.deserialize(&ints.serialize(&value).unwrap()).unwrap());
    }
    assert!(ints.deserialize(&[1, 2, 3]).is_err());

    let records = BincodeCodec::<SkuRecord>::new();
    let record = SkuRecord {
        count: 12,
        location: "aisle 4".to_string(),
    };
    assert_eq!(
        record,
        records.deserialize(&records.serialize(&record).unwrap()).unwrap()
    );
}
