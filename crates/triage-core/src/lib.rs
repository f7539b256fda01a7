//! Error-help triage core: input classification, knowledge matching, loop
//! prevention and the controller that ties them together.

pub mod classifier;
pub mod config;
pub mod controller;
pub mod knowledge;
pub mod loop_guard;
pub mod store;

pub use classifier::{default_categories, CategoryRule, Classifier, InputKind, Verdict};
pub use config::{load_config, load_effective_config, Config, ConfigError, TriageSettings};
pub use controller::{
    validate_error_text, TriageController, TriageRequest, TriageResponse, TriageSource,
};
pub use knowledge::{KnowledgeEntry, KnowledgeMatcher, MatchPolicy};
pub use loop_guard::{GuardLane, InMemorySessionStore, SessionLoopGuard, SessionStore};
pub use store::{MemoryStore, NewMessage, NewTurn, SenderType, TriageStore};

#[derive(thiserror::Error, Debug)]
pub enum TriageError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),
}
