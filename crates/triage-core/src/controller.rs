//! Request orchestration: classify, deflect or escalate, match, guard, persist.

use serde::{Serialize, Serializer};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::classifier::{Classifier, InputKind, Verdict};
use crate::config::TriageSettings;
use crate::knowledge::{KnowledgeEntry, KnowledgeMatcher};
use crate::loop_guard::{fingerprint, GuardLane, SessionLoopGuard, SessionStore};
use crate::store::{NewMessage, NewTurn, SenderType, TriageStore, STATUS_RESOLVED};
use crate::TriageError;

pub const EXIT_MESSAGE: &str = "I've shared all available guidance for this issue.\nPlease contact support if further assistance is required.";
pub const LOOP_EXIT_INPUT_TYPE: &str = "loop_exit";

pub const ESCALATION_MESSAGE_EN: &str = "Your request has been noted. Please use the 'Raise Ticket' option to connect with our support team, or call our helpline for immediate assistance.";
pub const ESCALATION_MESSAGE_HI: &str = "आपका अनुरोध दर्ज किया गया है। कृपया 'टिकट बनाएं' विकल्प का उपयोग करें या तुरंत सहायता के लिए हमारी हेल्पलाइन पर कॉल करें।";

pub const FALLBACK_MESSAGE_EN: &str = "this specific error is not yet documented.\n\nIf this issue is urgent, please use the 'Raise Ticket' option to contact support.";
pub const FALLBACK_MESSAGE_HI: &str =
    "यह त्रुटि अभी दस्तावेज़ में नहीं है। कृपया 'टिकट बनाएं' विकल्प का उपयोग करें।";

/// Where an answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriageSource {
    Kb,
    Unknown,
    Exit,
    Escalation,
    /// Canned classifier response; carries the deflecting kind.
    Deflected(InputKind),
}

impl TriageSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TriageSource::Kb => "kb",
            TriageSource::Unknown => "unknown",
            TriageSource::Exit => "exit",
            TriageSource::Escalation => "escalation",
            TriageSource::Deflected(kind) => kind.as_str(),
        }
    }
}

impl Serialize for TriageSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriageRequest {
    pub raw_text: String,
    pub page_url: Option<String>,
    pub session_key: String,
    pub user_id: Option<i64>,
}

impl TriageRequest {
    pub fn new(raw_text: impl Into<String>, session_key: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            page_url: None,
            session_key: session_key.into(),
            user_id: None,
        }
    }

    pub fn with_page_url(mut self, page_url: impl Into<String>) -> Self {
        self.page_url = Some(page_url.into());
        self
    }

    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriageResponse {
    pub conversation_id: Option<i64>,
    pub source: TriageSource,
    pub answer_en: String,
    pub answer_hi: Option<String>,
    pub input_type: &'static str,
    pub category: Option<String>,
}

impl TriageResponse {
    fn exit() -> Self {
        Self {
            conversation_id: None,
            source: TriageSource::Exit,
            answer_en: EXIT_MESSAGE.to_string(),
            answer_hi: None,
            input_type: LOOP_EXIT_INPUT_TYPE,
            category: None,
        }
    }
}

/// Reject input the pipeline should never see: blank or longer than `max_chars`.
pub fn validate_error_text(text: &str, max_chars: usize) -> Result<(), TriageError> {
    if text.trim().is_empty() {
        return Err(TriageError::Validation("error_text must not be blank".into()));
    }
    let len = text.chars().count();
    if len > max_chars {
        return Err(TriageError::Validation(format!(
            "error_text is {len} characters; at most {max_chars} allowed"
        )));
    }
    Ok(())
}

pub struct TriageController {
    classifier: Classifier,
    matcher: KnowledgeMatcher,
    guard: SessionLoopGuard,
    store: Arc<dyn TriageStore>,
    service: String,
}

impl TriageController {
    pub fn new(
        settings: &TriageSettings,
        store: Arc<dyn TriageStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            classifier: Classifier::new(settings.categories.clone()),
            matcher: KnowledgeMatcher::new(settings.match_policy),
            guard: SessionLoopGuard::new(sessions),
            store,
            service: settings.default_service.clone(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Run one turn through the pipeline.
    ///
    /// Only composed answers (`kb` and `unknown`) are persisted; storage
    /// failures surface as [`TriageError::Storage`] and leave the session's
    /// answer fingerprint as it was.
    pub fn handle(&self, req: &TriageRequest) -> Result<TriageResponse, TriageError> {
        let text = req.raw_text.trim();
        let verdict = self.classifier.classify(text);
        debug!(
            kind = %verdict.kind,
            category = verdict.category.as_deref().unwrap_or("-"),
            text,
            "classified input"
        );

        if !verdict.should_process {
            return Ok(self.deflect(req, &verdict));
        }

        if verdict.should_escalate {
            info!(session = %req.session_key, "escalation requested");
            return Ok(TriageResponse {
                conversation_id: None,
                source: TriageSource::Escalation,
                answer_en: ESCALATION_MESSAGE_EN.to_string(),
                answer_hi: Some(ESCALATION_MESSAGE_HI.to_string()),
                input_type: InputKind::EscalationRequest.as_str(),
                category: None,
            });
        }

        let matched = self
            .matcher
            .find_match(self.store.as_ref(), &self.service, text)
            .map_err(|err| {
                error!(service = %self.service, "knowledge lookup failed: {err:#}");
                TriageError::Storage(err)
            })?;
        let (source, answer_en, answer_hi) =
            compose_answer(verdict.category.as_deref(), matched.as_ref());

        let answer_fp = fingerprint(&answer_en);
        let check = self
            .guard
            .check(&req.session_key, GuardLane::Answer, &answer_fp);
        if check.is_repeat {
            info!(
                session = %req.session_key,
                source = source.as_str(),
                "answer repeated; exiting loop"
            );
            return Ok(TriageResponse::exit());
        }

        let turn = build_turn(
            req,
            &self.service,
            &verdict,
            source,
            &answer_en,
            &answer_hi,
            matched.as_ref().map(|e| e.id),
        );
        let conversation_id = self.store.record_turn(&turn).map_err(|err| {
            error!(service = %self.service, "failed to persist turn: {err:#}");
            TriageError::Storage(err)
        })?;
        // only committed answers count as sent; a failed write may be retried
        self.guard
            .remember(&req.session_key, GuardLane::Answer, &answer_fp);
        info!(
            conversation_id,
            source = source.as_str(),
            input_type = verdict.kind.as_str(),
            "turn recorded"
        );

        Ok(TriageResponse {
            conversation_id: Some(conversation_id),
            source,
            answer_en,
            answer_hi: Some(answer_hi),
            input_type: verdict.kind.as_str(),
            category: verdict.category,
        })
    }

    fn deflect(&self, req: &TriageRequest, verdict: &Verdict) -> TriageResponse {
        let canned = verdict.canned_response.unwrap_or_default();
        let check = self
            .guard
            .check_and_update(&req.session_key, GuardLane::Canned, &fingerprint(canned));
        if check.is_repeat {
            info!(
                session = %req.session_key,
                kind = %verdict.kind,
                "canned response repeated; exiting loop"
            );
            return TriageResponse::exit();
        }
        TriageResponse {
            conversation_id: None,
            source: TriageSource::Deflected(verdict.kind),
            answer_en: canned.to_string(),
            answer_hi: None,
            input_type: verdict.kind.as_str(),
            category: None,
        }
    }
}

fn compose_answer(
    category: Option<&str>,
    matched: Option<&KnowledgeEntry>,
) -> (TriageSource, String, String) {
    match matched {
        Some(entry) => {
            let prefix = category
                .map(|c| format!("I understand you are facing a **{c}** issue.\n\n"))
                .unwrap_or_default();
            (
                TriageSource::Kb,
                format!("{prefix}{}", entry.answer_primary),
                entry.answer_secondary.clone().unwrap_or_default(),
            )
        }
        None => {
            let prefix = category
                .map(|c| format!("I understand you are facing a **{c}** issue, but "))
                .unwrap_or_default();
            (
                TriageSource::Unknown,
                format!("{prefix}{FALLBACK_MESSAGE_EN}"),
                FALLBACK_MESSAGE_HI.to_string(),
            )
        }
    }
}

fn build_turn(
    req: &TriageRequest,
    service: &str,
    verdict: &Verdict,
    source: TriageSource,
    answer_en: &str,
    answer_hi: &str,
    matched_id: Option<i64>,
) -> NewTurn {
    let input_type = verdict.kind.as_str();
    let category = verdict.category.as_deref();
    NewTurn {
        user_id: req.user_id,
        service: service.to_string(),
        status: STATUS_RESOLVED.to_string(),
        page_url: req.page_url.clone(),
        meta: json!({
            "raw_error_text": req.raw_text.trim(),
            "input_type": input_type,
            "category": category,
        }),
        messages: vec![
            NewMessage {
                sender: SenderType::User,
                body: req.raw_text.trim().to_string(),
                data: json!({ "input_type": input_type, "category": category }),
            },
            NewMessage {
                sender: SenderType::Ai,
                body: format!("{answer_en}\n{answer_hi}"),
                data: json!({
                    "source": source.as_str(),
                    "input_type": input_type,
                    "category": category,
                    "matched_error_id": matched_id,
                }),
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejects_blank_and_oversized_text() {
        assert!(matches!(
            validate_error_text("   \n", 10),
            Err(TriageError::Validation(_))
        ));
        assert!(matches!(
            validate_error_text("abcdefghijk", 10),
            Err(TriageError::Validation(_))
        ));
        // characters, not bytes
        assert!(validate_error_text("आधार", 4).is_ok());
    }

    #[test]
    fn source_serializes_as_plain_string() {
        let v = serde_json::to_value(TriageSource::Deflected(InputKind::Greeting)).unwrap();
        assert_eq!(v, json!("greeting"));
        assert_eq!(serde_json::to_value(TriageSource::Kb).unwrap(), json!("kb"));
    }

    #[test]
    fn fallback_prefix_depends_on_category() {
        let (src, en, hi) = compose_answer(Some("AEPS"), None);
        assert_eq!(src, TriageSource::Unknown);
        assert!(en.starts_with("I understand you are facing a **AEPS** issue, but this specific"));
        assert_eq!(hi, FALLBACK_MESSAGE_HI);
        let (_, en, _) = compose_answer(None, None);
        assert_eq!(en, FALLBACK_MESSAGE_EN);
    }
}
