//! Parsing and repair of the completion service's structured reply.
//!
//! The reply is untrusted: it may be wrapped in prose or code fences, carry an
//! unknown action, or cite documents that were never shown to the model. The
//! validator recovers what it can, records each repair as a
//! [`ValidationWarning`], and reports [`Error::Parse`] only when no usable
//! object exists at all.

use serde::Serialize;
use serde_json::{Map, Value};

use kbase_core::error::{Error, Result};
use kbase_core::types::{ActionKind, Resolution};

use crate::retriever::Retrieval;

pub const FALLBACK_ANSWER: &str = "We're sorry, we could not prepare an automated answer for this ticket. \
Please review it manually and contact the customer directly.";

pub const DEGRADED_ANSWER: &str = "We're sorry, the knowledge assistant is temporarily unavailable. \
Please review this ticket manually and contact the customer directly.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationWarning {
    /// `action_required` was not a known action.
    UnknownAction { value: String, replaced_with: ActionKind },
    /// A non-conservative action was requested without supporting documentation.
    ActionRestricted { requested: ActionKind, replaced_with: ActionKind },
    /// A reference did not match any source presented in the prompt.
    ReferenceDropped { reference: String },
    /// The first reply was unparseable and a corrective request was sent.
    CorrectiveRetry { error: String },
}

/// Why a resolution was produced without a usable model answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    EmbeddingUnavailable,
    RetrievalFailed,
    CompletionUnavailable,
    UnparseableOutput,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    pub resolution: Resolution,
    pub warnings: Vec<ValidationWarning>,
}

/// Validates replies against the sources presented in one particular prompt.
#[derive(Debug, Clone)]
pub struct ResponseValidator {
    allowed_sources: Vec<String>,
    has_context: bool,
}

impl ResponseValidator {
    pub fn new(allowed_sources: Vec<String>, has_context: bool) -> Self {
        Self { allowed_sources, has_context }
    }

    pub fn for_retrieval(retrieval: &Retrieval) -> Self {
        Self::new(retrieval.sources(), retrieval.has_context())
    }

    pub fn validate(&self, raw: &str) -> Result<Validated> {
        let object = extract_object(raw).ok_or_else(|| Error::Parse("no JSON object found in completion output".into()))?;
        let mut warnings = Vec::new();

        let answer = match object.get("answer") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::String(_)) => return Err(Error::Parse("field 'answer' is empty".into())),
            Some(other) => return Err(Error::Parse(format!("field 'answer' must be a string, got {}", type_name(other)))),
            None => return Err(Error::Parse("missing field 'answer'".into())),
        };
        let raw_action = match object.get("action_required") {
            Some(Value::String(s)) => s.as_str(),
            Some(other) => {
                return Err(Error::Parse(format!("field 'action_required' must be a string, got {}", type_name(other))))
            }
            None => return Err(Error::Parse("missing field 'action_required'".into())),
        };
        let raw_refs: &[Value] = match object.get("references") {
            Some(Value::Array(items)) => items.as_slice(),
            Some(Value::Null) => &[],
            Some(other) => {
                return Err(Error::Parse(format!("field 'references' must be an array, got {}", type_name(other))))
            }
            None => return Err(Error::Parse("missing field 'references'".into())),
        };

        let action = self.check_action(raw_action, &mut warnings);
        let references = self.check_references(raw_refs, &mut warnings);
        Ok(Validated { resolution: Resolution { answer, references, action }, warnings })
    }

    fn check_action(&self, raw: &str, warnings: &mut Vec<ValidationWarning>) -> ActionKind {
        let action = match raw.parse::<ActionKind>() {
            Ok(a) => a,
            Err(_) => {
                let replaced_with = ActionKind::NoActionRequired;
                warnings.push(ValidationWarning::UnknownAction { value: raw.to_string(), replaced_with });
                replaced_with
            }
        };
        if !self.has_context && !action.is_conservative() {
            let replaced_with = ActionKind::ContactCustomerDirectly;
            warnings.push(ValidationWarning::ActionRestricted { requested: action, replaced_with });
            return replaced_with;
        }
        action
    }

    fn check_references(&self, raw: &[Value], warnings: &mut Vec<ValidationWarning>) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for item in raw {
            let Value::String(reference) = item else {
                warnings.push(ValidationWarning::ReferenceDropped { reference: item.to_string() });
                continue;
            };
            match self.match_source(reference) {
                Some(source) => {
                    if !out.iter().any(|s| s == source) {
                        out.push(source.to_string());
                    }
                }
                None => warnings.push(ValidationWarning::ReferenceDropped { reference: reference.clone() }),
            }
        }
        out
    }

    /// Exact source name, or a source name followed by `:` (e.g. `billing.md: Refunds`).
    fn match_source(&self, reference: &str) -> Option<&str> {
        let reference = reference.trim();
        if let Some(s) = self.allowed_sources.iter().find(|s| s.as_str() == reference) {
            return Some(s);
        }
        self.allowed_sources
            .iter()
            .filter(|s| reference.strip_prefix(s.as_str()).is_some_and(|rest| rest.starts_with(':')))
            .max_by_key(|s| s.len())
            .map(String::as_str)
    }
}

pub fn fallback_resolution() -> Resolution {
    Resolution {
        answer: FALLBACK_ANSWER.to_string(),
        references: Vec::new(),
        action: ActionKind::ContactCustomerDirectly,
    }
}

pub fn degraded_resolution() -> Resolution {
    Resolution {
        answer: DEGRADED_ANSWER.to_string(),
        references: Vec::new(),
        action: ActionKind::ContactCustomerDirectly,
    }
}

/// The first outermost `{...}` span carrying both `answer` and `action_required`,
/// or failing that the first one that parses as a JSON object at all.
pub fn extract_object(raw: &str) -> Option<Map<String, Value>> {
    let bytes = raw.as_bytes();
    let mut first = None;
    let mut start = 0;
    while let Some(offset) = raw[start..].find('{') {
        let open = start + offset;
        if let Some(close) = matching_brace(bytes, open) {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&raw[open..=close]) {
                if map.contains_key("answer") && map.contains_key("action_required") {
                    return Some(map);
                }
                first.get_or_insert(map);
                start = close + 1;
                continue;
            }
        }
        start = open + 1;
    }
    first
}

/// Index of the `}` closing the `{` at `open`, skipping braces inside string literals.
fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
