//! In-memory fleet store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;

use super::{FleetStore, Record, Result, StoreError};
use crate::clock::{deadline, Clock, SystemClock};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct Entry {
    record: Record,
    expires_at: i64,
}

/// DashMap-backed store with TTLs measured against an injected clock.
///
/// Expired entries are invisible to reads and are purged lazily. Clones share
/// the same data, so one instance can stand in for the store of a whole fleet.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
    channels: Arc<DashMap<String, broadcast::Sender<String>>>,
    clock: Arc<dyn Clock>,
    available: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            channels: Arc::new(DashMap::new()),
            clock,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Listen on a channel. Messages published before subscribing are lost.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Simulate an outage: while unavailable every call fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.purge_expired();
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".into()))
        }
    }

    fn purge_expired(&self) {
        let now = self.clock.now_millis();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FleetStore for MemoryStore {
    fn put(&self, key: &str, record: Record, ttl: Duration) -> Result<()> {
        self.check()?;
        let expires_at = deadline(self.clock.now_millis(), ttl);
        self.entries
            .insert(key.to_string(), Entry { record, expires_at });
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Record>> {
        self.check()?;
        let now = self.clock.now_millis();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.record.clone()))
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.check()?;
        let now = self.clock.now_millis();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| entry.expires_at > now))
    }

    fn take(&self, key: &str) -> Result<Option<Record>> {
        self.check()?;
        let now = self.clock.now_millis();
        Ok(self
            .entries
            .remove(key)
            .filter(|(_, entry)| entry.expires_at > now)
            .map(|(_, entry)| entry.record))
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, Record)>> {
        self.check()?;
        self.purge_expired();
        let mut found: Vec<(String, Record)> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| (e.key().clone(), e.value().record.clone()))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }

    fn publish(&self, channel: &str, message: &str) -> Result<()> {
        self.check()?;
        if let Some(sender) = self.channels.get(channel) {
            // No receivers is fine.
            let _ = sender.send(message.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn store() -> (MemoryStore, ManualClock) {
        let clock = ManualClock::new(0);
        (MemoryStore::with_clock(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_put_get_expire() {
        let (store, clock) = store();
        store
            .put("servers:a", record(&[("name", "a")]), Duration::from_secs(30))
            .unwrap();

        clock.advance(Duration::from_secs(29));
        assert_eq!(store.get("servers:a").unwrap().unwrap()["name"], "a");

        clock.advance(Duration::from_secs(1));
        assert!(store.get("servers:a").unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_put_refreshes_ttl() {
        let (store, clock) = store();
        let ttl = Duration::from_secs(10);
        store.put("k", record(&[]), ttl).unwrap();
        clock.advance(Duration::from_secs(8));
        store.put("k", record(&[]), ttl).unwrap();
        clock.advance(Duration::from_secs(8));
        assert!(store.get("k").unwrap().is_some());
    }

    #[test]
    fn test_take_once() {
        let (store, _) = store();
        store
            .put("player:pending:p", record(&[("action", "create")]), Duration::from_secs(60))
            .unwrap();

        assert!(store.take("player:pending:p").unwrap().is_some());
        assert!(store.take("player:pending:p").unwrap().is_none());
    }

    #[test]
    fn test_take_expired() {
        let (store, clock) = store();
        store.put("k", record(&[]), Duration::from_secs(1)).unwrap();
        clock.advance(Duration::from_secs(1));
        assert!(store.take("k").unwrap().is_none());
    }

    #[test]
    fn test_scan_prefix_sorted() {
        let (store, _) = store();
        let ttl = Duration::from_secs(30);
        store.put("servers:b", record(&[]), ttl).unwrap();
        store.put("servers:a", record(&[]), ttl).unwrap();
        store.put("sessions:x", record(&[]), ttl).unwrap();

        let keys: Vec<_> = store
            .scan("servers:")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["servers:a", "servers:b"]);
    }

    #[test]
    fn test_unavailable() {
        let (store, _) = store();
        store.set_available(false);
        assert!(matches!(store.get("k"), Err(StoreError::Unavailable(_))));
        assert!(store.scan("").is_err());

        store.set_available(true);
        assert!(store.scan("").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let (store, _) = store();
        store.publish("servers:status", "nobody listening").unwrap();

        let mut rx = store.subscribe("servers:status");
        store.publish("servers:status", "a:ONLINE:1").unwrap();
        assert_eq!(rx.recv().await.unwrap(), "a:ONLINE:1");
    }
}
