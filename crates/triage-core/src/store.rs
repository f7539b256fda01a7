use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::knowledge::KnowledgeEntry;

/// Conversation status written for every persisted turn.
pub const STATUS_RESOLVED: &str = "resolved";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    User,
    Ai,
    System,
}

impl SenderType {
    pub fn as_str(self) -> &'static str {
        match self {
            SenderType::User => "user",
            SenderType::Ai => "ai",
            SenderType::System => "system",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(SenderType::User),
            "ai" => Some(SenderType::Ai),
            "system" => Some(SenderType::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub sender: SenderType,
    pub body: String,
    pub data: Value,
}

/// One processed turn: a conversation row plus its user and ai messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTurn {
    pub user_id: Option<i64>,
    pub service: String,
    pub status: String,
    pub page_url: Option<String>,
    pub meta: Value,
    pub messages: Vec<NewMessage>,
}

/// Persistence seam used by the triage pipeline.
///
/// `record_turn` must be atomic: either the conversation and all of its
/// messages become visible, or none of them do.
pub trait TriageStore: Send + Sync {
    /// Knowledge entries for a service, in ascending id order.
    fn knowledge_for_service(&self, service: &str) -> anyhow::Result<Vec<KnowledgeEntry>>;
    /// Persist a turn and return the new conversation id.
    fn record_turn(&self, turn: &NewTurn) -> anyhow::Result<i64>;
}

/// In-process store for single-binary setups and tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    knowledge_reads: AtomicUsize,
}

#[derive(Default)]
struct MemoryInner {
    knowledge: Vec<KnowledgeEntry>,
    turns: Vec<(i64, NewTurn)>,
    next_entry_id: i64,
    next_conversation_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every mutation below completes before it can panic, so a poisoned
    /// lock still guards consistent data.
    fn inner(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or update the entry keyed by `(service, key_phrase)`; returns its id.
    pub fn upsert_knowledge(
        &self,
        service: &str,
        key_phrase: &str,
        answer_primary: &str,
        answer_secondary: Option<&str>,
    ) -> i64 {
        let mut inner = self.inner();
        if let Some(existing) = inner
            .knowledge
            .iter_mut()
            .find(|e| e.service == service && e.key_phrase == key_phrase)
        {
            existing.answer_primary = answer_primary.to_string();
            existing.answer_secondary = answer_secondary.map(str::to_string);
            return existing.id;
        }
        inner.next_entry_id += 1;
        let id = inner.next_entry_id;
        inner.knowledge.push(KnowledgeEntry {
            id,
            service: service.to_string(),
            key_phrase: key_phrase.to_string(),
            answer_primary: answer_primary.to_string(),
            answer_secondary: answer_secondary.map(str::to_string),
            metadata: Map::new(),
            created_by_automation: false,
        });
        id
    }

    /// Persisted turns with their conversation ids, oldest first.
    pub fn turns(&self) -> Vec<(i64, NewTurn)> {
        self.inner().turns.clone()
    }

    /// Number of knowledge-set reads served so far.
    pub fn knowledge_reads(&self) -> usize {
        self.knowledge_reads.load(Ordering::Relaxed)
    }
}

impl TriageStore for MemoryStore {
    fn knowledge_for_service(&self, service: &str) -> anyhow::Result<Vec<KnowledgeEntry>> {
        self.knowledge_reads.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner();
        Ok(inner
            .knowledge
            .iter()
            .filter(|e| e.service == service)
            .cloned()
            .collect())
    }

    fn record_turn(&self, turn: &NewTurn) -> anyhow::Result<i64> {
        let mut inner = self.inner();
        inner.next_conversation_id += 1;
        let id = inner.next_conversation_id;
        inner.turns.push((id, turn.clone()));
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_updates_existing_pair() {
        let store = MemoryStore::new();
        let a = store.upsert_knowledge("AEPS", "timeout", "retry", None);
        let b = store.upsert_knowledge("AEPS", "timeout", "retry later", Some("baad mein"));
        let c = store.upsert_knowledge("PAN", "timeout", "pan retry", None);
        assert_eq!(a, b);
        assert_ne!(a, c);
        let aeps = store.knowledge_for_service("AEPS").unwrap();
        assert_eq!(aeps.len(), 1);
        assert_eq!(aeps[0].answer_primary, "retry later");
        assert_eq!(aeps[0].answer_secondary.as_deref(), Some("baad mein"));
        assert_eq!(store.knowledge_reads(), 1);
    }

    #[test]
    fn sender_type_round_trips_through_str() {
        for s in [SenderType::User, SenderType::Ai, SenderType::System] {
            assert_eq!(SenderType::parse(s.as_str()), Some(s));
        }
        assert_eq!(SenderType::parse("bot"), None);
    }

    #[test]
    fn poisoned_lock_keeps_serving() {
        let store = std::sync::Arc::new(MemoryStore::new());
        store.upsert_knowledge("AEPS", "timeout", "retry", None);
        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            let _held = poisoner.inner.lock().unwrap();
            panic!("poison the memory store");
        })
        .join();
        assert!(store.inner.is_poisoned());
        assert_eq!(store.knowledge_for_service("AEPS").unwrap().len(), 1);
        assert_eq!(store.upsert_knowledge("AEPS", "timeout", "again", None), 1);
        assert!(store.turns().is_empty());
    }
}
