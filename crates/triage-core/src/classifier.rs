//! Deterministic classification of free-form support input.
//!
//! The classifier is an ordered chain of rules evaluated against the trimmed
//! text; the first rule that fires decides the verdict. Inputs that survive the
//! chain are tagged with a service category from a keyword table.

use once_cell::sync::Lazy;
use regex::RegexSet;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const EMPTY_RESPONSE: &str = "Please type your issue message.";
pub const NOISE_RESPONSE: &str = "I am ready to help. Please state your issue.";
pub const GREETING_RESPONSE: &str = "Hello. Please state the issue you are facing.";
pub const VAGUE_RESPONSE: &str =
    "Please specify the error message or the service (e.g., AEPS, PAN) you are having trouble with.";
pub const SEVERE_ABUSE_RESPONSE: &str =
    "Support is available for technical issues. Please keep the conversation respectful.";

/// Kind of input detected by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Valid,
    Empty,
    Greeting,
    Vague,
    AbuseMild,
    AbuseSevere,
    Noise,
    EscalationRequest,
}

impl InputKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InputKind::Valid => "valid",
            InputKind::Empty => "empty",
            InputKind::Greeting => "greeting",
            InputKind::Vague => "vague",
            InputKind::AbuseMild => "abuse_mild",
            InputKind::AbuseSevere => "abuse_severe",
            InputKind::Noise => "noise",
            InputKind::EscalationRequest => "escalation_request",
        }
    }
}

impl std::fmt::Display for InputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured classifier output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub kind: InputKind,
    pub should_process: bool,
    pub canned_response: Option<&'static str>,
    pub category: Option<String>,
    pub should_escalate: bool,
}

/// A service category and the lowercase keywords that identify it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CategoryRule {
    pub name: String,
    pub keywords: Vec<String>,
}

impl CategoryRule {
    pub fn new(name: &str, keywords: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Category table used when configuration does not override it. Order matters:
/// the first category with a matching keyword wins.
pub fn default_categories() -> Vec<CategoryRule> {
    vec![
        CategoryRule::new("PAN", &["pan", "nsdl", "uti", "correction", "pan card"]),
        CategoryRule::new(
            "RECHARGE",
            &["recharge", "topup", "jio", "airtel", "vi", "vodafone", "dth", "mobile"],
        ),
        CategoryRule::new(
            "AEPS",
            &[
                "aeps",
                "withdrawal",
                "balance enquiry",
                "mini statement",
                "fingerprint",
                "biometric",
                "aadhaar pay",
            ],
        ),
        CategoryRule::new(
            "PAYOUT",
            &["payout", "transfer", "imps", "neft", "bank", "account", "beneficiary"],
        ),
        CategoryRule::new(
            "KYC",
            &["kyc", "document", "aadhaar", "verification", "upload", "ekyc"],
        ),
        CategoryRule::new(
            "IRCTC",
            &["irctc", "train", "booking", "cancellation", "ticket", "railway"],
        ),
    ]
}

static SEVERE_ABUSE: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\b(f+u+c+k+|shit|bastard|bitch|ass+hole)\b",
        r"(?i)\b(kill|murder|die|threat)\b",
        r"(?i)\b(madarch[o0]d|bhench[o0]d|chutiya|gandu|harami|saala|kutta|kamina)\b",
        r"(?i)\b(randi|hijra|chakka)\b",
    ])
    .expect("severe abuse patterns compile")
});

static NOISE: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)^(test|testing|123|abc|xyz|qwerty|asdf)\s*$",
        r"^[\W\d\s]+$",
    ])
    .expect("noise patterns compile")
});

static GREETING: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)^(hi|hello|hey|hii+|helo|hlo|namaste|namaskar)[\s!.?]*$",
        r"(?i)^(good\s*(morning|afternoon|evening|night|day))[\s!.?]*$",
        r"(?i)^(howdy|sup|yo|hiya)[\s!.?]*$",
    ])
    .expect("greeting patterns compile")
});

static VAGUE: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)^(help|help me|need help|i need help)[\s!.?]*$",
        r"(?i)^(issue|problem|error|not working)[\s!.?]*$",
        r"(?i)^(something (is )?(wrong|broken|not working))[\s!.?]*$",
        r"(?i)^(it'?s? not working)[\s!.?]*$",
        r"(?i)^(please help)[\s!.?]*$",
        r"(?i)^(kuch gadbad hai|kaam nahi kar raha)[\s!.?]*$",
    ])
    .expect("vague patterns compile")
});

static ESCALATION: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\b(talk to (a\s*)?(human|agent|person|support|executive))\b",
        r"(?i)\b(call me|call back|contact me)\b",
        r"(?i)\b(escalate|escalation|raise (a\s*)?complaint)\b",
        r"(?i)\b(speak to (a\s*)?(manager|supervisor))\b",
        r"(?i)\b(need (a\s*)?(human|real person))\b",
        r"(?i)\b(this (is\s*)?(not helping|useless))\b",
    ])
    .expect("escalation patterns compile")
});

static MILD_ABUSE: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\b(damn|crap|sucks|stupid|useless|rubbish|pathetic|worst)\b",
        r"(?i)\b(bakwas|bekaar|wahiyat|ghatiya)\b",
    ])
    .expect("mild abuse patterns compile")
});

#[derive(Clone, Copy)]
enum Disposition {
    Deflect(&'static str),
    Escalate,
    Process,
}

struct Rule {
    kind: InputKind,
    matches: fn(&str) -> bool,
    disposition: Disposition,
}

impl Rule {
    fn verdict(&self) -> Verdict {
        let (should_process, canned_response, should_escalate) = match self.disposition {
            Disposition::Deflect(text) => (false, Some(text), false),
            Disposition::Escalate => (true, None, true),
            Disposition::Process => (true, None, false),
        };
        Verdict {
            kind: self.kind,
            should_process,
            canned_response,
            category: None,
            should_escalate,
        }
    }
}

const RULES: &[Rule] = &[
    Rule {
        kind: InputKind::Empty,
        matches: str::is_empty,
        disposition: Disposition::Deflect(EMPTY_RESPONSE),
    },
    Rule {
        kind: InputKind::AbuseSevere,
        matches: is_severe_abuse,
        disposition: Disposition::Deflect(SEVERE_ABUSE_RESPONSE),
    },
    Rule {
        kind: InputKind::Noise,
        matches: is_noise,
        disposition: Disposition::Deflect(NOISE_RESPONSE),
    },
    Rule {
        kind: InputKind::Greeting,
        matches: is_greeting,
        disposition: Disposition::Deflect(GREETING_RESPONSE),
    },
    Rule {
        kind: InputKind::Vague,
        matches: is_vague,
        disposition: Disposition::Deflect(VAGUE_RESPONSE),
    },
    Rule {
        kind: InputKind::EscalationRequest,
        matches: is_escalation,
        disposition: Disposition::Escalate,
    },
    Rule {
        kind: InputKind::AbuseMild,
        matches: is_mild_abuse,
        disposition: Disposition::Process,
    },
];

fn is_severe_abuse(text: &str) -> bool {
    SEVERE_ABUSE.is_match(text)
}

fn is_noise(text: &str) -> bool {
    text.chars().count() <= 2 || is_repeated_letter(text) || NOISE.is_match(text)
}

fn is_greeting(text: &str) -> bool {
    GREETING.is_match(text)
}

fn is_vague(text: &str) -> bool {
    VAGUE.is_match(text)
}

fn is_escalation(text: &str) -> bool {
    ESCALATION.is_match(text)
}

fn is_mild_abuse(text: &str) -> bool {
    MILD_ABUSE.is_match(text)
}

/// One letter repeated three or more times, ignoring case ("aaaa", "ZzZ").
fn is_repeated_letter(text: &str) -> bool {
    let mut chars = text.chars().flat_map(char::to_lowercase);
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_alphabetic() {
        return false;
    }
    let mut count = 1usize;
    for c in chars {
        if c != first {
            return false;
        }
        count += 1;
    }
    count >= 3
}

/// Rule-chain classifier with a configurable category table.
#[derive(Debug, Clone)]
pub struct Classifier {
    categories: Vec<CategoryRule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(default_categories())
    }
}

impl Classifier {
    pub fn new(categories: Vec<CategoryRule>) -> Self {
        let categories = categories
            .into_iter()
            .map(|rule| CategoryRule {
                name: rule.name,
                keywords: rule
                    .keywords
                    .into_iter()
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect(),
            })
            .collect();
        Self { categories }
    }

    pub fn categories(&self) -> &[CategoryRule] {
        &self.categories
    }

    /// Classify raw input. Leading and trailing whitespace is ignored.
    pub fn classify(&self, text: &str) -> Verdict {
        let trimmed = text.trim();
        if let Some(rule) = RULES.iter().find(|rule| (rule.matches)(trimmed)) {
            return rule.verdict();
        }
        Verdict {
            kind: InputKind::Valid,
            should_process: true,
            canned_response: None,
            category: self.detect_category(trimmed),
            should_escalate: false,
        }
    }

    /// First category (in table order) with a keyword contained in `text`.
    pub fn detect_category(&self, text: &str) -> Option<String> {
        let lower = text.to_lowercase();
        self.categories
            .iter()
            .find(|rule| rule.keywords.iter().any(|k| lower.contains(k.as_str())))
            .map(|rule| rule.name.clone())
    }
}
