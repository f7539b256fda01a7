//! Per-session response loop prevention.
//!
//! Each session remembers the fingerprint of the last message it was sent,
//! separately for canned deflections and for composed answers. Sending the
//! same message twice in a row trips the guard, which then forgets the
//! fingerprint so the next distinct turn starts clean.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Key-value capability holding the last fingerprint per key.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, fingerprint: String);
    fn clear(&self, key: &str);
}

/// Independent fingerprint namespaces within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardLane {
    /// Canned classifier responses (greeting, noise, ...).
    Canned,
    /// Answers composed from the knowledge base or the fallback text.
    Answer,
}

impl GuardLane {
    pub fn as_str(self) -> &'static str {
        match self {
            GuardLane::Canned => "canned",
            GuardLane::Answer => "answer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopCheck {
    pub is_repeat: bool,
}

/// SHA-256 hex digest of an outgoing message.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Clone)]
pub struct SessionLoopGuard {
    store: Arc<dyn SessionStore>,
}

impl SessionLoopGuard {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Compare `candidate` with the stored fingerprint for `(session_key, lane)`.
    ///
    /// A repeat clears the stored value; anything else replaces it.
    pub fn check_and_update(
        &self,
        session_key: &str,
        lane: GuardLane,
        candidate: &str,
    ) -> LoopCheck {
        let check = self.check(session_key, lane, candidate);
        if !check.is_repeat {
            self.remember(session_key, lane, candidate);
        }
        check
    }

    /// Like [`check_and_update`](Self::check_and_update) but a miss leaves the
    /// stored value untouched; call [`remember`](Self::remember) once the
    /// outgoing message is committed.
    pub fn check(&self, session_key: &str, lane: GuardLane, candidate: &str) -> LoopCheck {
        let key = Self::key(session_key, lane);
        if self.store.get(&key).as_deref() == Some(candidate) {
            self.store.clear(&key);
            return LoopCheck { is_repeat: true };
        }
        LoopCheck { is_repeat: false }
    }

    pub fn remember(&self, session_key: &str, lane: GuardLane, candidate: &str) {
        self.store
            .set(&Self::key(session_key, lane), candidate.to_string());
    }

    fn key(session_key: &str, lane: GuardLane) -> String {
        format!("{}:{}", lane.as_str(), session_key)
    }
}

/// Process-local session store with idle expiry and a size cap.
///
/// Concurrent requests for the same key are last-write-wins.
pub struct InMemorySessionStore {
    entries: Mutex<HashMap<String, SessionSlot>>,
    idle_ttl: Option<Duration>,
    max_entries: usize,
}

struct SessionSlot {
    fingerprint: String,
    touched: Instant,
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(Some(Duration::from_secs(3600)), 10_000)
    }
}

impl InMemorySessionStore {
    pub fn new(idle_ttl: Option<Duration>, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            idle_ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Slots hold plain strings, so a panic mid-update cannot leave them torn.
    fn entries(&self) -> MutexGuard<'_, HashMap<String, SessionSlot>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expired(&self, slot: &SessionSlot, now: Instant) -> bool {
        self.idle_ttl
            .is_some_and(|ttl| now.saturating_duration_since(slot.touched) > ttl)
    }

    fn make_room(&self, map: &mut HashMap<String, SessionSlot>, now: Instant) {
        if map.len() < self.max_entries {
            return;
        }
        map.retain(|_, slot| !self.expired(slot, now));
        while map.len() >= self.max_entries {
            let Some(oldest) = map
                .iter()
                .min_by_key(|(_, slot)| slot.touched)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            map.remove(&oldest);
        }
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        let mut map = self.entries();
        let expired = match map.get(key) {
            Some(slot) => self.expired(slot, Instant::now()),
            None => return None,
        };
        if expired {
            map.remove(key);
            return None;
        }
        map.get(key).map(|slot| slot.fingerprint.clone())
    }

    fn set(&self, key: &str, fingerprint: String) {
        let mut map = self.entries();
        let now = Instant::now();
        if !map.contains_key(key) {
            self.make_room(&mut map, now);
        }
        map.insert(
            key.to_string(),
            SessionSlot {
                fingerprint,
                touched: now,
            },
        );
    }

    fn clear(&self, key: &str) {
        self.entries().remove(key);
    }
}
