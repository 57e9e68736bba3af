//! Conversation cache: serialized recent windows keyed by `chat:{user}:{topic}`.
//!
//! Two clocks are involved. The TTL decides whether an entry exists at all
//! and runs on the tokio clock. Freshness (`is_valid`) compares the entry's
//! wall-clock `refreshed_at` against a caller-supplied max age.
//!
//! Background writers go through [`ConversationCache::save_window`]: a
//! window read before a `delete`/`clear` is discarded, and a window never
//! replaces one holding a newer message.

use std::{collections::HashMap, time::Duration};

use chrono::Utc;
use tokio::{sync::RwLock, time::Instant};
use tracing::{debug, warn};

use crate::errors::Result;
use crate::message::{CacheEntry, ChatMessage};

struct Slot {
    bytes: Vec<u8>,
    expires_at: Instant,
    /// Id of the last message in the window.
    newest: Option<i64>,
}

/// Invalidation count of one key, taken before reading durable history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Generation {
    epoch: u64,
    key: u64,
}

#[derive(Default)]
struct State {
    slots: HashMap<String, Slot>,
    /// Bumped by `delete`; absent means 0.
    generations: HashMap<String, u64>,
    /// Bumped by `clear`.
    epoch: u64,
}

impl State {
    fn generation(&self, key: &str) -> Generation {
        Generation {
            epoch: self.epoch,
            key: self.generations.get(key).copied().unwrap_or(0),
        }
    }
}

pub struct ConversationCache {
    ttl: Duration,
    state: RwLock<State>,
}

pub fn cache_key(user_id: u64, topic: &str) -> String {
    format!("chat:{user_id}:{topic}")
}

impl ConversationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: RwLock::new(State::default()),
        }
    }

    /// Returns the entry if present, unexpired and decodable.
    ///
    /// Expired and undecodable entries are evicted on the way out.
    pub async fn load(&self, user_id: u64, topic: &str) -> Option<CacheEntry> {
        let key = cache_key(user_id, topic);
        let decoded = {
            let state = self.state.read().await;
            let slot = state.slots.get(&key)?;
            if slot.expires_at <= Instant::now() {
                None
            } else {
                Some(serde_json::from_slice::<CacheEntry>(&slot.bytes))
            }
        };

        match decoded {
            Some(Ok(entry)) => return Some(entry),
            Some(Err(e)) => warn!(%key, error = %e, "dropping undecodable cache entry"),
            None => debug!(%key, "cache entry expired"),
        }
        self.state.write().await.slots.remove(&key);
        None
    }

    /// Current generation of a key. Take it before the durable read whose
    /// result will be passed to [`save_window`](Self::save_window).
    pub async fn generation(&self, user_id: u64, topic: &str) -> Generation {
        self.state
            .read()
            .await
            .generation(&cache_key(user_id, topic))
    }

    /// Overwrites the window with a fresh `refreshed_at` and the full TTL.
    pub async fn save(
        &self,
        user_id: u64,
        topic: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<CacheEntry> {
        let (entry, slot) = self.encode(user_id, topic, messages)?;
        self.state
            .write()
            .await
            .slots
            .insert(cache_key(user_id, topic), slot);
        debug!(user_id, topic, count = entry.count, "cache entry saved");
        Ok(entry)
    }

    /// Saves a window read from durable history at generation `seen`.
    ///
    /// Returns `None` without writing when the key was deleted or the cache
    /// cleared since `seen`, or when the cached window already ends with a
    /// newer message.
    pub async fn save_window(
        &self,
        user_id: u64,
        topic: &str,
        messages: Vec<ChatMessage>,
        seen: Generation,
    ) -> Result<Option<CacheEntry>> {
        let key = cache_key(user_id, topic);
        let (entry, slot) = self.encode(user_id, topic, messages)?;

        let mut state = self.state.write().await;
        if state.generation(&key) != seen {
            debug!(%key, "window read before invalidation; not cached");
            return Ok(None);
        }
        if let Some(current) = state.slots.get(&key) {
            if current.expires_at > Instant::now() && current.newest > slot.newest {
                debug!(%key, cached = ?current.newest, incoming = ?slot.newest, "older window; not cached");
                return Ok(None);
            }
        }
        state.slots.insert(key, slot);
        debug!(user_id, topic, count = entry.count, "cache entry saved");
        Ok(Some(entry))
    }

    fn encode(
        &self,
        user_id: u64,
        topic: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<(CacheEntry, Slot)> {
        let newest = messages.last().map(|m| m.id);
        let entry = CacheEntry {
            user_id,
            topic: topic.to_string(),
            refreshed_at: Utc::now(),
            count: messages.len(),
            messages,
        };
        let slot = Slot {
            bytes: serde_json::to_vec(&entry)?,
            expires_at: Instant::now() + self.ttl,
            newest,
        };
        Ok((entry, slot))
    }

    /// True when the entry exists and is no older than `max_age`.
    pub fn is_valid(entry: Option<&CacheEntry>, max_age: Duration) -> bool {
        let Some(entry) = entry else {
            return false;
        };
        match (Utc::now() - entry.refreshed_at).to_std() {
            Ok(age) => age <= max_age,
            // refreshed_at slightly in the future (clock skew): fresh
            Err(_) => true,
        }
    }

    /// Removes the entry and invalidates windows read before this call.
    pub async fn delete(&self, user_id: u64, topic: &str) -> bool {
        let key = cache_key(user_id, topic);
        let mut state = self.state.write().await;
        *state.generations.entry(key.clone()).or_insert(0) += 1;
        state.slots.remove(&key).is_some()
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.slots.clear();
        state.epoch += 1;
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.slots.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    #[cfg(test)]
    pub(crate) async fn put_raw(&self, user_id: u64, topic: &str, bytes: Vec<u8>) {
        let slot = Slot {
            bytes,
            expires_at: Instant::now() + self.ttl,
            newest: None,
        };
        self.state
            .write()
            .await
            .slots
            .insert(cache_key(user_id, topic), slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    fn message(id: i64, content: &str) -> ChatMessage {
        ChatMessage {
            id,
            user_id: 7,
            topic: "lease".into(),
            role: Role::User,
            model: String::new(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn save_then_load_returns_same_window() {
        let cache = ConversationCache::new(Duration::from_secs(60));
        let msgs = vec![message(1, "a"), message(2, "b")];
        let before = Utc::now();
        cache.save(7, "lease", msgs.clone()).await.unwrap();

        let entry = cache.load(7, "lease").await.unwrap();
        assert_eq!(entry.messages, msgs);
        assert_eq!(entry.count, 2);
        assert!(entry.refreshed_at >= before);
        assert!(cache.load(7, "other").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_evicted() {
        let cache = ConversationCache::new(Duration::from_secs(10));
        cache.save(1, "t", vec![message(1, "a")]).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.load(1, "t").await.is_none());
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn garbage_bytes_are_a_miss() {
        let cache = ConversationCache::new(Duration::from_secs(60));
        cache.put_raw(1, "t", b"{not json".to_vec()).await;
        assert!(cache.load(1, "t").await.is_none());
        assert!(cache.is_empty().await);
    }

    #[test]
    fn validity_rules() {
        let max_age = Duration::from_secs(300);
        assert!(!ConversationCache::is_valid(None, max_age));

        let mut entry = CacheEntry {
            user_id: 1,
            topic: "t".into(),
            refreshed_at: Utc::now(),
            messages: vec![],
            count: 0,
        };
        assert!(ConversationCache::is_valid(Some(&entry), max_age));

        entry.refreshed_at = Utc::now() - chrono::Duration::seconds(301);
        assert!(!ConversationCache::is_valid(Some(&entry), max_age));
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let cache = ConversationCache::new(Duration::from_secs(60));
        cache.save(1, "a", vec![]).await.unwrap();
        cache.save(1, "b", vec![]).await.unwrap();
        assert!(cache.delete(1, "a").await);
        assert!(!cache.delete(1, "a").await);
        assert_eq!(cache.len().await, 1);
        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn older_window_never_replaces_newer() {
        let cache = ConversationCache::new(Duration::from_secs(60));
        let seen = cache.generation(7, "lease").await;
        let older = vec![message(1, "q1"), message(2, "a1")];
        let newer = vec![message(1, "q1"), message(2, "a1"), message(3, "q2"), message(4, "a2")];

        assert!(cache.save_window(7, "lease", newer.clone(), seen).await.unwrap().is_some());
        assert!(cache.save_window(7, "lease", older, seen).await.unwrap().is_none());

        let entry = cache.load(7, "lease").await.unwrap();
        assert_eq!(entry.messages, newer);
        // same window again is a plain refresh
        assert!(cache.save_window(7, "lease", newer, seen).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn window_read_before_delete_is_discarded() {
        let cache = ConversationCache::new(Duration::from_secs(60));
        let seen = cache.generation(7, "lease").await;
        cache.delete(7, "lease").await;

        let saved = cache
            .save_window(7, "lease", vec![message(1, "gone")], seen)
            .await
            .unwrap();
        assert!(saved.is_none());
        assert!(cache.load(7, "lease").await.is_none());

        let fresh = cache.generation(7, "lease").await;
        assert_ne!(fresh, seen);
        assert!(cache
            .save_window(7, "lease", vec![message(5, "new")], fresh)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn clear_invalidates_every_key() {
        let cache = ConversationCache::new(Duration::from_secs(60));
        let seen = cache.generation(1, "a").await;
        cache.clear().await;
        assert!(cache
            .save_window(1, "a", vec![message(1, "x")], seen)
            .await
            .unwrap()
            .is_none());
        assert!(cache.is_empty().await);
    }

    #[test]
    fn key_layout() {
        assert_eq!(cache_key(7, "lease"), "chat:7:lease");
    }
}
