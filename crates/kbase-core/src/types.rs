//! Domain types shared by the chunker, the vector index and the assistant.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type ChunkId = String;

/// A bounded unit of source text that is indexed independently.
///
/// - `id`: `"<source_document>#<ordinal>"`, unique across the corpus
/// - `source_document`: corpus-relative path of the file (e.g. `billing.md`)
/// - `section`: heading the text was found under
/// - `text`: the payload, never empty
/// - `ordinal`: position within the source document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub source_document: String,
    pub section: String,
    pub text: String,
    pub ordinal: usize,
}

impl Chunk {
    pub fn make_id(source_document: &str, ordinal: usize) -> ChunkId {
        format!("{source_document}#{ordinal}")
    }
}

/// A chunk together with its embedding. All vectors of one index share a dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A chunk returned by retrieval. Higher `score` is more relevant.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedPassage {
    pub chunk: Chunk,
    pub score: f32,
}

impl RetrievedPassage {
    pub fn source_document(&self) -> &str {
        &self.chunk.source_document
    }
}

/// Closed set of follow-up actions a resolution may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    EscalateToTechnicalTeam,
    EscalateToAbuseTeam,
    EscalateToBillingTeam,
    EscalateToManagement,
    EscalateToLegalTeam,
    ContactCustomerDirectly,
    NoActionRequired,
}

impl ActionKind {
    pub const ALL: [ActionKind; 7] = [
        ActionKind::EscalateToTechnicalTeam,
        ActionKind::EscalateToAbuseTeam,
        ActionKind::EscalateToBillingTeam,
        ActionKind::EscalateToManagement,
        ActionKind::EscalateToLegalTeam,
        ActionKind::ContactCustomerDirectly,
        ActionKind::NoActionRequired,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::EscalateToTechnicalTeam => "escalate_to_technical_team",
            ActionKind::EscalateToAbuseTeam => "escalate_to_abuse_team",
            ActionKind::EscalateToBillingTeam => "escalate_to_billing_team",
            ActionKind::EscalateToManagement => "escalate_to_management",
            ActionKind::EscalateToLegalTeam => "escalate_to_legal_team",
            ActionKind::ContactCustomerDirectly => "contact_customer_directly",
            ActionKind::NoActionRequired => "no_action_required",
        }
    }

    /// Actions allowed when no documentation backs the answer.
    pub fn is_conservative(self) -> bool {
        matches!(self, ActionKind::ContactCustomerDirectly | ActionKind::NoActionRequired)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        ActionKind::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown action '{wanted}'"))
    }
}

/// The structured answer to a support ticket.
///
/// Serializes with the wire field name `action_required`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub answer: String,
    pub references: Vec<String>,
    #[serde(rename = "action_required")]
    pub action: ActionKind,
}

/// Two-part request sent to the completion service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionPrompt {
    pub system: String,
    pub user: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_parses_case_insensitively() {
        assert_eq!("Escalate_To_Abuse_Team".parse::<ActionKind>(), Ok(ActionKind::EscalateToAbuseTeam));
        assert!("escalate_to_ceo".parse::<ActionKind>().is_err());
    }

    #[test]
    fn action_strings_match_serde_names() {
        for action in ActionKind::ALL {
            let json = serde_json::to_string(&action).unwrap();
            assert_eq!(json, format!("\"{}\"", action.as_str()));
        }
    }

    #[test]
    fn resolution_uses_wire_field_name() {
        let r = Resolution { answer: "ok".into(), references: vec![], action: ActionKind::NoActionRequired };
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["action_required"], "no_action_required");
    }
}
