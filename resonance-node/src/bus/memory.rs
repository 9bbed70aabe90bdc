//! Process-local in-memory broker.
//!
//! Topics are append-only logs. Consumer groups track one offset per
//! topic and share it across all their subscriptions, so each record is
//! handed to one member of a group. Clones share the same broker.
//!
//! Offsets are absolute and never reused. Once every group subscribed to
//! a topic has read past a record it is dropped, and each topic keeps at
//! most a fixed number of records regardless, so a group that joins late
//! with `earliest` only sees what is still retained.

use super::{BusError, BusRecord, BusSubscription, Delivery, MessageBus, OffsetReset};
use async_trait::async_trait;
use resonance_types::Envelope;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Records kept per topic when nobody drains it.
pub const DEFAULT_RETENTION: usize = 10_000;

/// In-memory message bus.
#[derive(Debug, Clone)]
pub struct InMemoryBus {
    broker: Arc<Broker>,
}

#[derive(Debug)]
struct Broker {
    state: Mutex<BrokerState>,
    appended: Notify,
    connected: AtomicBool,
}

#[derive(Debug)]
struct BrokerState {
    topics: HashMap<String, TopicLog>,
    /// Next offset to hand out, per (group, topic).
    offsets: HashMap<(String, String), u64>,
    retention: usize,
    fail_next_publish: Option<String>,
}

impl BrokerState {
    /// Drop the prefix of `topic` that every subscribed group has read.
    fn compact(&mut self, topic: &str) {
        let slowest = self
            .offsets
            .iter()
            .filter(|((_, t), _)| t == topic)
            .map(|(_, offset)| *offset)
            .min();
        if let (Some(slowest), Some(log)) = (slowest, self.topics.get_mut(topic)) {
            log.trim_to(slowest);
        }
    }
}

/// Retained tail of one topic. `base` is the offset of the oldest record.
#[derive(Debug, Default)]
struct TopicLog {
    base: u64,
    records: VecDeque<Vec<u8>>,
}

impl TopicLog {
    /// Offset the next record will get.
    fn end(&self) -> u64 {
        self.base + self.records.len() as u64
    }

    fn push(&mut self, payload: Vec<u8>, retention: usize) -> u64 {
        let offset = self.end();
        self.records.push_back(payload);
        while self.records.len() > retention {
            self.records.pop_front();
            self.base += 1;
        }
        offset
    }

    /// Up to `max` records starting at `from` (or the oldest retained one).
    fn read(&self, from: u64, max: usize) -> Vec<(u64, Vec<u8>)> {
        let start = from.max(self.base);
        self.records
            .iter()
            .skip((start - self.base) as usize)
            .take(max)
            .enumerate()
            .map(|(i, payload)| (start + i as u64, payload.clone()))
            .collect()
    }

    fn trim_to(&mut self, offset: u64) {
        while self.base < offset && self.records.pop_front().is_some() {
            self.base += 1;
        }
    }
}

impl Broker {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    /// Create an empty, reachable broker.
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    /// Create a broker that keeps at most `retention` records per topic.
    pub fn with_retention(retention: usize) -> Self {
        Self {
            broker: Arc::new(Broker {
                state: Mutex::new(BrokerState {
                    topics: HashMap::new(),
                    offsets: HashMap::new(),
                    retention: retention.max(1),
                    fail_next_publish: None,
                }),
                appended: Notify::new(),
                connected: AtomicBool::new(true),
            }),
        }
    }

    /// A broker that reports itself unreachable.
    pub fn disconnected() -> Self {
        let bus = Self::new();
        bus.set_connected(false);
        bus
    }

    /// Flip reachability.
    pub fn set_connected(&self, connected: bool) {
        self.broker.connected.store(connected, Ordering::SeqCst);
    }

    /// Cause the next publish to fail with the given reason.
    pub fn fail_next_publish(&self, reason: &str) {
        self.broker.lock().fail_next_publish = Some(reason.to_string());
    }

    /// Raw payloads still retained on `topic`, oldest first.
    pub fn records(&self, topic: &str) -> Vec<Vec<u8>> {
        self.broker
            .lock()
            .topics
            .get(topic)
            .map(|log| log.records.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Offset the next record on `topic` will get; the number of records
    /// ever published there.
    pub fn end_offset(&self, topic: &str) -> u64 {
        self.broker.lock().topics.get(topic).map_or(0, TopicLog::end)
    }

    /// Payloads on `topic` that decode as envelopes.
    pub fn envelopes(&self, topic: &str) -> Vec<Envelope> {
        self.records(topic)
            .iter()
            .filter_map(|bytes| Envelope::from_bytes(bytes).ok())
            .collect()
    }

    /// Records retained across all topics.
    pub fn total_records(&self) -> usize {
        self.broker
            .lock()
            .topics
            .values()
            .map(|log| log.records.len())
            .sum()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    fn is_connected(&self) -> bool {
        self.broker.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<Delivery, BusError> {
        if !self.is_connected() {
            return Err(BusError::Unavailable("in-memory broker is down".into()));
        }

        let offset = {
            let mut state = self.broker.lock();
            if let Some(reason) = state.fail_next_publish.take() {
                return Err(BusError::PublishFailed {
                    topic: topic.to_string(),
                    reason,
                });
            }
            let retention = state.retention;
            state
                .topics
                .entry(topic.to_string())
                .or_default()
                .push(payload, retention)
        };
        self.broker.appended.notify_waiters();

        Ok(Delivery::Acknowledged {
            topic: topic.to_string(),
            partition: 0,
            offset,
        })
    }

    async fn subscribe(
        &self,
        group: &str,
        topics: &[String],
        offset_reset: OffsetReset,
    ) -> Result<Box<dyn BusSubscription>, BusError> {
        if !self.is_connected() {
            return Err(BusError::Unavailable("in-memory broker is down".into()));
        }

        {
            let mut state = self.broker.lock();
            for topic in topics {
                let end = state.topics.get(topic).map_or(0, TopicLog::end);
                state
                    .offsets
                    .entry((group.to_string(), topic.clone()))
                    .or_insert(match offset_reset {
                        OffsetReset::Earliest => 0,
                        OffsetReset::Latest => end,
                    });
            }
        }

        Ok(Box::new(MemorySubscription {
            broker: Arc::clone(&self.broker),
            group: group.to_string(),
            topics: topics.to_vec(),
            closed: false,
        }))
    }

    async fn flush(&self) -> Result<(), BusError> {
        // Publishes are acknowledged synchronously.
        Ok(())
    }
}

struct MemorySubscription {
    broker: Arc<Broker>,
    group: String,
    topics: Vec<String>,
    closed: bool,
}

impl MemorySubscription {
    fn take_batch(&self, max: usize) -> Vec<BusRecord> {
        let mut state = self.broker.lock();
        let mut batch = Vec::new();

        for topic in &self.topics {
            let key = (self.group.clone(), topic.clone());
            let next = state.offsets.get(&key).copied().unwrap_or(0);
            let available = state
                .topics
                .get(topic)
                .map(|log| log.read(next, max - batch.len()))
                .unwrap_or_default();

            if let Some((last, _)) = available.last() {
                state.offsets.insert(key, last + 1);
                state.compact(topic);
            }
            batch.extend(available.into_iter().map(|(offset, payload)| BusRecord {
                topic: topic.clone(),
                offset,
                payload,
            }));

            if batch.len() >= max {
                break;
            }
        }
        batch
    }
}

#[async_trait]
impl BusSubscription for MemorySubscription {
    async fn poll(&mut self, timeout: Duration, max: usize) -> Result<Vec<BusRecord>, BusError> {
        if self.closed {
            return Err(BusError::Closed);
        }

        let max = max.max(1);
        let deadline = Instant::now() + timeout;
        loop {
            // Registered before the check so no append is missed.
            let appended = self.broker.appended.notified();

            let batch = self.take_batch(max);
            if !batch.is_empty() {
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn publish_acknowledges_with_offsets() {
        let bus = InMemoryBus::new();

        let first = bus.publish("t", b"a".to_vec()).await.unwrap();
        let second = bus.publish("t", b"b".to_vec()).await.unwrap();

        assert_eq!(
            first,
            Delivery::Acknowledged {
                topic: "t".into(),
                partition: 0,
                offset: 0
            }
        );
        assert!(matches!(second, Delivery::Acknowledged { offset: 1, .. }));
        assert_eq!(bus.records("t"), vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(bus.end_offset("t"), 2);
    }

    #[tokio::test]
    async fn earliest_group_sees_backlog() {
        let bus = InMemoryBus::new();
        bus.publish("t", b"old".to_vec()).await.unwrap();

        let mut sub = bus
            .subscribe("g", &topics(&["t"]), OffsetReset::Earliest)
            .await
            .unwrap();
        let batch = sub.poll(Duration::from_millis(10), 10).await.unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, b"old");
    }

    #[tokio::test]
    async fn latest_group_skips_backlog() {
        let bus = InMemoryBus::new();
        bus.publish("t", b"old".to_vec()).await.unwrap();

        let mut sub = bus
            .subscribe("g", &topics(&["t"]), OffsetReset::Latest)
            .await
            .unwrap();
        assert!(sub.poll(Duration::from_millis(10), 10).await.unwrap().is_empty());

        bus.publish("t", b"new".to_vec()).await.unwrap();
        let batch = sub.poll(Duration::from_millis(10), 10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, b"new");
    }

    #[tokio::test]
    async fn groups_track_offsets_independently() {
        let bus = InMemoryBus::new();
        let mut a = bus.subscribe("a", &topics(&["t"]), OffsetReset::Earliest).await.unwrap();
        let mut b = bus.subscribe("b", &topics(&["t"]), OffsetReset::Earliest).await.unwrap();

        bus.publish("t", b"x".to_vec()).await.unwrap();

        assert_eq!(a.poll(Duration::from_millis(10), 10).await.unwrap().len(), 1);
        assert_eq!(b.poll(Duration::from_millis(10), 10).await.unwrap().len(), 1);
        // Consumed for group a.
        assert!(a.poll(Duration::from_millis(10), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn poll_respects_batch_limit() {
        let bus = InMemoryBus::new();
        for i in 0..5u8 {
            bus.publish("t", vec![i]).await.unwrap();
        }
        let mut sub = bus.subscribe("g", &topics(&["t"]), OffsetReset::Earliest).await.unwrap();

        let first = sub.poll(Duration::from_millis(10), 3).await.unwrap();
        let rest = sub.poll(Duration::from_millis(10), 3).await.unwrap();

        assert_eq!(first.iter().map(|r| r.offset).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(rest.iter().map(|r| r.offset).collect::<Vec<_>>(), vec![3, 4]);
    }

    #[tokio::test]
    async fn poll_wakes_on_publish() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe("g", &topics(&["t"]), OffsetReset::Earliest).await.unwrap();

        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish("t", b"late".to_vec()).await.unwrap();
        });

        let batch = sub.poll(Duration::from_secs(5), 10).await.unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn closed_subscription_fails() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe("g", &topics(&["t"]), OffsetReset::Earliest).await.unwrap();
        sub.close().await;
        assert!(matches!(
            sub.poll(Duration::from_millis(1), 1).await,
            Err(BusError::Closed)
        ));
    }

    #[tokio::test]
    async fn forced_publish_failure() {
        let bus = InMemoryBus::new();
        bus.fail_next_publish("leader not available");

        assert!(matches!(
            bus.publish("t", b"x".to_vec()).await,
            Err(BusError::PublishFailed { .. })
        ));
        assert_eq!(bus.total_records(), 0);
        bus.publish("t", b"x".to_vec()).await.unwrap();
    }

    #[tokio::test]
    async fn disconnected_bus_refuses_work() {
        let bus = InMemoryBus::disconnected();
        assert!(!bus.is_connected());
        assert!(matches!(
            bus.publish("t", vec![]).await,
            Err(BusError::Unavailable(_))
        ));
    }

    // ===========================================
    // Retention Tests
    // ===========================================

    #[tokio::test]
    async fn consumed_records_are_dropped() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe("g", &topics(&["t"]), OffsetReset::Earliest).await.unwrap();
        for i in 0..3u8 {
            bus.publish("t", vec![i]).await.unwrap();
        }
        assert_eq!(bus.total_records(), 3);

        assert_eq!(sub.poll(Duration::from_millis(10), 10).await.unwrap().len(), 3);
        assert!(bus.records("t").is_empty());
        assert_eq!(bus.end_offset("t"), 3);

        // Offsets keep counting after the log shrinks.
        bus.publish("t", b"next".to_vec()).await.unwrap();
        let batch = sub.poll(Duration::from_millis(10), 10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].offset, 3);
        assert_eq!(batch[0].payload, b"next");
        assert_eq!(bus.total_records(), 0);
    }

    #[tokio::test]
    async fn slowest_group_holds_the_log() {
        let bus = InMemoryBus::new();
        let mut fast = bus.subscribe("fast", &topics(&["t"]), OffsetReset::Earliest).await.unwrap();
        let mut slow = bus.subscribe("slow", &topics(&["t"]), OffsetReset::Earliest).await.unwrap();
        for i in 0..4u8 {
            bus.publish("t", vec![i]).await.unwrap();
        }

        fast.poll(Duration::from_millis(10), 10).await.unwrap();
        assert_eq!(bus.records("t").len(), 4);

        slow.poll(Duration::from_millis(10), 2).await.unwrap();
        assert_eq!(bus.records("t"), vec![vec![2u8], vec![3u8]]);

        slow.poll(Duration::from_millis(10), 10).await.unwrap();
        assert!(bus.records("t").is_empty());
    }

    #[tokio::test]
    async fn undrained_topic_is_capped() {
        let bus = InMemoryBus::with_retention(3);
        for i in 0..10u8 {
            bus.publish("t", vec![i]).await.unwrap();
        }
        assert_eq!(bus.records("t"), vec![vec![7u8], vec![8u8], vec![9u8]]);

        // A late group starts at the oldest retained record.
        let mut sub = bus.subscribe("late", &topics(&["t"]), OffsetReset::Earliest).await.unwrap();
        let batch = sub.poll(Duration::from_millis(10), 10).await.unwrap();
        assert_eq!(batch.iter().map(|r| r.offset).collect::<Vec<_>>(), vec![7, 8, 9]);
    }
}
