// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Post-commit change notification bus.
//!
//! Two registers: per-key `(type, id)` and per-type (all ids). Every
//! successful write or delete publishes to both registers for that key.
//! Each subscriber owns a bounded buffer; a subscriber that cannot keep up
//! is terminated with a lagged signal rather than ever blocking a writer.
//!
//! Publication copies the subscriber list under the register lock and sends
//! outside it. Per-key ordering is inherited from the caller: the mutation
//! pipeline publishes while holding the per-type write lock, so subscribers
//! observe mutations in commit order with no gaps.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::document::Document;

/// A single post-commit change.
#[derive(Debug, Clone)]
pub enum Change {
    /// Created or updated; carries the post-commit document.
    Put(Document),
    /// Deleted.
    Delete { id: String },
}

struct Entry {
    token: u64,
    tx: mpsc::Sender<Change>,
    lagged: Arc<AtomicBool>,
}

/// Receiving half of a bus subscription.
///
/// Dropping the subscription deregisters it; the bus tolerates the channel
/// closing at any point.
pub struct Subscription {
    rx: mpsc::Receiver<Change>,
    lagged: Arc<AtomicBool>,
}

impl Subscription {
    /// Next change, or `None` when the subscription has ended. Check
    /// [`lagged`](Self::lagged) to distinguish slow-consumer termination
    /// from a normal close.
    pub async fn recv(&mut self) -> Option<Change> {
        self.rx.recv().await
    }

    #[must_use]
    pub fn lagged(&self) -> bool {
        self.lagged.load(Ordering::Acquire)
    }
}

/// The fan-out bus. One per engine.
pub struct Bus {
    buffer: usize,
    next_token: AtomicU64,
    by_key: Mutex<HashMap<(String, String), Vec<Entry>>>,
    by_kind: Mutex<HashMap<String, Vec<Entry>>>,
}

impl Bus {
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            next_token: AtomicU64::new(0),
            by_key: Mutex::new(HashMap::new()),
            by_kind: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self) -> (Entry, Subscription) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let lagged = Arc::new(AtomicBool::new(false));
        let entry = Entry {
            token: self.next_token.fetch_add(1, Ordering::Relaxed),
            tx,
            lagged: lagged.clone(),
        };
        (entry, Subscription { rx, lagged })
    }

    /// Subscribe to changes of one `(kind, id)`.
    pub fn subscribe_key(&self, kind: &str, id: &str) -> Subscription {
        let (entry, sub) = self.entry();
        self.by_key
            .lock()
            .entry((kind.to_string(), id.to_string()))
            .or_default()
            .push(entry);
        crate::metrics::set_key_subscribers(self.key_subscriber_count());
        sub
    }

    /// Subscribe to changes of every id of one kind.
    pub fn subscribe_kind(&self, kind: &str) -> Subscription {
        let (entry, sub) = self.entry();
        self.by_kind
            .lock()
            .entry(kind.to_string())
            .or_default()
            .push(entry);
        crate::metrics::set_kind_subscribers(self.kind_subscriber_count());
        sub
    }

    /// Publish a post-commit change to both registers.
    pub fn publish(&self, kind: &str, id: &str, change: &Change) {
        let key_targets = {
            let mut reg = self.by_key.lock();
            collect_targets(reg.get_mut(&(kind.to_string(), id.to_string())))
        };
        self.deliver(kind, key_targets, change, Register::Key, id);

        let kind_targets = {
            let mut reg = self.by_kind.lock();
            collect_targets(reg.get_mut(kind))
        };
        self.deliver(kind, kind_targets, change, Register::Kind, id);
    }

    fn deliver(
        &self,
        kind: &str,
        targets: Vec<(u64, mpsc::Sender<Change>, Arc<AtomicBool>)>,
        change: &Change,
        register: Register,
        id: &str,
    ) {
        let mut dead = Vec::new();

        for (token, tx, lagged) in targets {
            match tx.try_send(change.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Slow consumer: kill the subscription, never the writer.
                    lagged.store(true, Ordering::Release);
                    warn!(kind, id, token, "dropping slow subscriber");
                    crate::metrics::record_slow_consumer(kind);
                    dead.push(token);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(token);
                }
            }
        }

        if !dead.is_empty() {
            self.remove(kind, id, register, &dead);
        }
    }

    fn remove(&self, kind: &str, id: &str, register: Register, tokens: &[u64]) {
        match register {
            Register::Key => {
                let mut reg = self.by_key.lock();
                let key = (kind.to_string(), id.to_string());
                if let Some(entries) = reg.get_mut(&key) {
                    entries.retain(|e| !tokens.contains(&e.token));
                    if entries.is_empty() {
                        reg.remove(&key);
                    }
                }
            }
            Register::Kind => {
                let mut reg = self.by_kind.lock();
                if let Some(entries) = reg.get_mut(kind) {
                    entries.retain(|e| !tokens.contains(&e.token));
                    if entries.is_empty() {
                        reg.remove(kind);
                    }
                }
            }
        }
        debug!(kind, removed = tokens.len(), "pruned subscribers");
    }

    #[must_use]
    pub fn key_subscriber_count(&self) -> usize {
        self.by_key.lock().values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn kind_subscriber_count(&self) -> usize {
        self.by_kind.lock().values().map(Vec::len).sum()
    }
}

#[derive(Clone, Copy)]
enum Register {
    Key,
    Kind,
}

/// Copy live senders out of a register slot, pruning already-closed ones
/// while the lock is held.
fn collect_targets(
    entries: Option<&mut Vec<Entry>>,
) -> Vec<(u64, mpsc::Sender<Change>, Arc<AtomicBool>)> {
    let Some(entries) = entries else {
        return Vec::new();
    };
    entries.retain(|e| !e.tx.is_closed());
    entries
        .iter()
        .map(|e| (e.token, e.tx.clone(), e.lagged.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn doc(id: &str) -> Document {
        Document::new(id, Map::new())
    }

    fn put(id: &str) -> Change {
        Change::Put(doc(id))
    }

    #[tokio::test]
    async fn test_key_subscriber_receives_change() {
        let bus = Bus::new(8);
        let mut sub = bus.subscribe_key("widget", "a");

        bus.publish("widget", "a", &put("a"));

        match sub.recv().await {
            Some(Change::Put(d)) => assert_eq!(d.meta.id, "a"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_key_subscriber_filters_other_ids() {
        let bus = Bus::new(8);
        let mut sub = bus.subscribe_key("widget", "a");

        bus.publish("widget", "b", &put("b"));
        bus.publish("widget", "a", &put("a"));

        match sub.recv().await {
            Some(Change::Put(d)) => assert_eq!(d.meta.id, "a"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_kind_subscriber_sees_all_ids() {
        let bus = Bus::new(8);
        let mut sub = bus.subscribe_kind("widget");

        bus.publish("widget", "a", &put("a"));
        bus.publish("widget", "b", &put("b"));

        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        match (first, second) {
            (Change::Put(a), Change::Put(b)) => {
                assert_eq!(a.meta.id, "a");
                assert_eq!(b.meta.id, "b");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delivery_order_per_key() {
        let bus = Bus::new(64);
        let mut sub = bus.subscribe_key("widget", "a");

        for gen in 0..10u64 {
            let mut d = doc("a");
            d.meta.generation = gen;
            bus.publish("widget", "a", &Change::Put(d));
        }

        for want in 0..10u64 {
            match sub.recv().await {
                Some(Change::Put(d)) => assert_eq!(d.meta.generation, want),
                other => panic!("unexpected: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_slow_consumer_is_dropped() {
        let bus = Bus::new(2);
        let mut sub = bus.subscribe_kind("widget");

        // Fill the buffer past capacity without draining
        for i in 0..5 {
            bus.publish("widget", &format!("id-{i}"), &put(&format!("id-{i}")));
        }

        // Buffered events are still delivered, then the channel closes
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
        assert!(sub.lagged());
        assert_eq!(bus.kind_subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let bus = Bus::new(8);
        let sub = bus.subscribe_kind("widget");
        assert_eq!(bus.kind_subscriber_count(), 1);

        drop(sub);
        bus.publish("widget", "a", &put("a"));
        assert_eq!(bus.kind_subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = Bus::new(8);
        bus.publish("widget", "a", &put("a"));
        bus.publish("widget", "a", &Change::Delete { id: "a".into() });
    }

    #[tokio::test]
    async fn test_delete_change() {
        let bus = Bus::new(8);
        let mut sub = bus.subscribe_key("widget", "a");

        bus.publish("widget", "a", &Change::Delete { id: "a".into() });

        match sub.recv().await {
            Some(Change::Delete { id }) => assert_eq!(id, "a"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
