//! The change feed an index consumes.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use kiln_crypto::ContentHasher;
use kiln_types::{Change, ChangeSet, Cid, Clock};
use serde_json::Value;

use crate::error::FeedError;

/// Source of document changes.
///
/// `changes_since(None)` returns the full history. Each row is the latest
/// state of one document changed after `since`; the returned clock is the
/// position to pass next time.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn changes_since(&self, since: Option<&Clock>) -> Result<ChangeSet, FeedError>;
}

/// A change feed held in memory, for embedding and tests.
///
/// Every put or delete appends one event named by the hash of the previous
/// event and the change, so clocks are stable across identical histories.
#[derive(Debug, Default)]
pub struct InMemoryFeed {
    events: RwLock<Vec<(Cid, Change)>>,
}

impl InMemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, id: impl Into<String>, body: Value) -> Result<Clock, FeedError> {
        self.append(Change::put(id, body))
    }

    pub fn delete(&self, id: impl Into<String>) -> Result<Clock, FeedError> {
        self.append(Change::delete(id))
    }

    /// Current position of the feed.
    pub fn clock(&self) -> Result<Clock, FeedError> {
        let events = self.events.read().map_err(unavailable)?;
        Ok(events
            .last()
            .map(|(cid, _)| Clock::from(*cid))
            .unwrap_or_default())
    }

    fn append(&self, change: Change) -> Result<Clock, FeedError> {
        let mut events = self.events.write().map_err(unavailable)?;
        let prev = events.last().map(|(cid, _)| *cid);
        let cid = ContentHasher::EVENT
            .hash_json(&(prev, &change))
            .map_err(|e| FeedError::Unavailable(e.to_string()))?;
        events.push((cid, change));
        Ok(Clock::from(cid))
    }
}

fn unavailable<E: std::fmt::Display>(e: E) -> FeedError {
    FeedError::Unavailable(format!("lock poisoned: {e}"))
}

#[async_trait]
impl ChangeFeed for InMemoryFeed {
    async fn changes_since(&self, since: Option<&Clock>) -> Result<ChangeSet, FeedError> {
        let events = self.events.read().map_err(unavailable)?;

        let start = match since {
            None => 0,
            Some(clock) if clock.is_empty() => 0,
            Some(clock) => {
                let head = clock.heads().last().copied();
                let pos = head.and_then(|h| events.iter().position(|(cid, _)| *cid == h));
                match pos {
                    Some(pos) => pos + 1,
                    None => return Err(FeedError::UnknownClock(clock.clone())),
                }
            }
        };

        let mut latest: HashMap<&str, usize> = HashMap::new();
        for (i, (_, change)) in events.iter().enumerate().skip(start) {
            latest.insert(change.key.as_str(), i);
        }
        let mut positions: Vec<usize> = latest.into_values().collect();
        positions.sort_unstable();

        let clock = events
            .last()
            .map(|(cid, _)| Clock::from(*cid))
            .unwrap_or_default();
        Ok(ChangeSet {
            rows: positions.into_iter().map(|i| events[i].1.clone()).collect(),
            clock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn full_history_has_latest_per_key() {
        let feed = InMemoryFeed::new();
        feed.put("1", json!({"v": 1})).unwrap();
        feed.put("2", json!({"v": 2})).unwrap();
        feed.put("1", json!({"v": 3})).unwrap();

        let set = feed.changes_since(None).await.unwrap();
        assert_eq!(set.rows.len(), 2);
        assert_eq!(set.rows[0], Change::put("2", json!({"v": 2})));
        assert_eq!(set.rows[1], Change::put("1", json!({"v": 3})));
        assert_eq!(set.clock, feed.clock().unwrap());
    }

    #[tokio::test]
    async fn since_clock_returns_only_newer() {
        let feed = InMemoryFeed::new();
        feed.put("1", json!({})).unwrap();
        let clock = feed.put("2", json!({})).unwrap();
        feed.delete("1").unwrap();

        let set = feed.changes_since(Some(&clock)).await.unwrap();
        assert_eq!(set.rows, vec![Change::delete("1")]);
    }

    #[tokio::test]
    async fn current_clock_yields_nothing() {
        let feed = InMemoryFeed::new();
        let clock = feed.put("1", json!({})).unwrap();
        let set = feed.changes_since(Some(&clock)).await.unwrap();
        assert!(set.rows.is_empty());
        assert_eq!(set.clock, clock);
    }

    #[tokio::test]
    async fn empty_feed() {
        let feed = InMemoryFeed::new();
        let set = feed.changes_since(Some(&Clock::empty())).await.unwrap();
        assert!(set.rows.is_empty());
        assert!(set.clock.is_empty());
    }

    #[tokio::test]
    async fn unknown_clock_is_error() {
        let feed = InMemoryFeed::new();
        feed.put("1", json!({})).unwrap();
        let bogus = Clock::from(Cid::from_bytes(b"elsewhere"));
        assert!(matches!(
            feed.changes_since(Some(&bogus)).await,
            Err(FeedError::UnknownClock(_))
        ));
    }

    #[test]
    fn identical_histories_share_clocks() {
        let a = InMemoryFeed::new();
        let b = InMemoryFeed::new();
        a.put("1", json!({"x": 1})).unwrap();
        b.put("1", json!({"x": 1})).unwrap();
        assert_eq!(a.clock().unwrap(), b.clock().unwrap());
    }
}
