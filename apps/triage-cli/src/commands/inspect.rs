use anyhow::Result;
use serde_json::{json, Value};

use triage_core::{Classifier, Config, KnowledgeMatcher};
use triage_kernel::Kernel;

pub fn classify(config: &Config, text: &str) -> Result<Value> {
    let classifier = Classifier::new(config.triage.categories.clone());
    Ok(serde_json::to_value(classifier.classify(text))?)
}

/// Best knowledge entry for `text` within `service`, or `null`.
pub fn find_match(config: &Config, kernel: &Kernel, service: &str, text: &str) -> Result<Value> {
    let matcher = KnowledgeMatcher::new(config.triage.match_policy);
    let entries = kernel.knowledge_for_service(service)?;
    Ok(match matcher.select(&entries, text) {
        Some(entry) => serde_json::to_value(entry)?,
        None => Value::Null,
    })
}

pub fn conversations(kernel: &Kernel, limit: i64) -> Result<Value> {
    let mut items = Vec::new();
    for conv in kernel.list_conversations(limit.max(1))? {
        let messages = kernel.list_messages(conv.id)?;
        items.push(json!({ "conversation": conv, "messages": messages }));
    }
    Ok(Value::Array(items))
}
