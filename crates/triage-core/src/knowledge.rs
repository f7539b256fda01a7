use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::store::TriageStore;

/// Canned answer for a known error phrase within a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: i64,
    pub service: String,
    pub key_phrase: String,
    pub answer_primary: String,
    #[serde(default)]
    pub answer_secondary: Option<String>,
    /// Free-form provenance (import file, row, reviewer, ...).
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub created_by_automation: bool,
}

impl KnowledgeEntry {
    /// True when the stored phrase occurs in `lowered_text` (already lowercased).
    fn contained_in(&self, lowered_text: &str) -> bool {
        let phrase = self.key_phrase.trim().to_lowercase();
        !phrase.is_empty() && lowered_text.contains(&phrase)
    }
}

/// Which entry wins when several key phrases occur in the same text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Lowest id (earliest ingested) wins.
    #[default]
    FirstInserted,
    /// Longest key phrase wins; equal lengths fall back to lowest id.
    LongestPhrase,
}

/// Substring matcher over a service's knowledge set.
#[derive(Debug, Clone, Copy, Default)]
pub struct KnowledgeMatcher {
    policy: MatchPolicy,
}

impl KnowledgeMatcher {
    pub fn new(policy: MatchPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    /// Load the knowledge set for `service` and pick the winning entry for `text`.
    ///
    /// Blank text never touches the store.
    pub fn find_match(
        &self,
        store: &dyn TriageStore,
        service: &str,
        text: &str,
    ) -> anyhow::Result<Option<KnowledgeEntry>> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        let entries = store.knowledge_for_service(service)?;
        Ok(self.select(&entries, text).cloned())
    }

    /// Pick the winning entry among `entries` without touching storage.
    pub fn select<'a>(
        &self,
        entries: &'a [KnowledgeEntry],
        text: &str,
    ) -> Option<&'a KnowledgeEntry> {
        let lowered = text.trim().to_lowercase();
        if lowered.is_empty() {
            return None;
        }
        let candidates = entries.iter().filter(|e| e.contained_in(&lowered));
        match self.policy {
            MatchPolicy::FirstInserted => candidates.min_by_key(|e| e.id),
            MatchPolicy::LongestPhrase => candidates.min_by(|a, b| {
                let la = a.key_phrase.trim().chars().count();
                let lb = b.key_phrase.trim().chars().count();
                lb.cmp(&la).then(a.id.cmp(&b.id))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i64, phrase: &str, answer: &str) -> KnowledgeEntry {
        KnowledgeEntry {
            id,
            service: "AEPS".into(),
            key_phrase: phrase.into(),
            answer_primary: answer.into(),
            answer_secondary: None,
            metadata: Map::new(),
            created_by_automation: false,
        }
    }

    #[test]
    fn stored_phrase_must_be_inside_input() {
        let entries = vec![entry(1, "Fingerprint Mismatch", "Clean the scanner and retry.")];
        let m = KnowledgeMatcher::default();
        let hit = m
            .select(&entries, "Error: fingerprint MISMATCH detected at step 3")
            .expect("match");
        assert_eq!(hit.id, 1);
        // the reverse containment is not a match
        assert!(m.select(&entries, "fingerprint").is_none());
    }

    #[test]
    fn blank_text_and_blank_phrases_never_match() {
        let entries = vec![entry(1, "   ", "anything"), entry(2, "timeout", "retry")];
        let m = KnowledgeMatcher::default();
        assert!(m.select(&entries, "").is_none());
        assert!(m.select(&entries, "   ").is_none());
        assert!(m.select(&entries, "no phrase here").is_none());
        assert!(m.select(&[], "timeout").is_none());
    }

    #[test]
    fn first_inserted_ignores_slice_order() {
        let entries = vec![
            entry(7, "device not ready", "later"),
            entry(3, "device", "earlier"),
        ];
        let hit = KnowledgeMatcher::new(MatchPolicy::FirstInserted)
            .select(&entries, "device not ready for capture")
            .expect("match");
        assert_eq!(hit.id, 3);
    }

    #[test]
    fn longest_phrase_prefers_specific_entries() {
        let entries = vec![
            entry(1, "device", "generic"),
            entry(2, "device not ready", "specific"),
            entry(3, "ready for capture", "longest"),
        ];
        let m = KnowledgeMatcher::new(MatchPolicy::LongestPhrase);
        let hit = m.select(&entries, "Device not ready for capture").expect("match");
        assert_eq!(hit.id, 3);
        let hit = m.select(&entries, "device not ready").expect("match");
        assert_eq!(hit.id, 2);

        let tied = vec![entry(9, "abc def", "later"), entry(4, "xyz uvw", "earlier")];
        let hit = m.select(&tied, "abc def xyz uvw").expect("match");
        assert_eq!(hit.id, 4);
    }

    #[test]
    fn every_selected_phrase_is_a_substring() {
        let entries = vec![
            entry(1, "insufficient balance", "a"),
            entry(2, "invalid uid", "b"),
            entry(3, "session expired", "c"),
        ];
        let m = KnowledgeMatcher::new(MatchPolicy::LongestPhrase);
        for text in [
            "Transaction failed: Insufficient Balance",
            "INVALID UID supplied",
            "nothing relevant",
            "session",
        ] {
            if let Some(hit) = m.select(&entries, text) {
                assert!(text.to_lowercase().contains(&hit.key_phrase.to_lowercase()));
            }
        }
    }
}
