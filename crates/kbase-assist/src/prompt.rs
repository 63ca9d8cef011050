use std::fmt::Write;

use kbase_core::types::{ActionKind, CompletionPrompt};

use crate::retriever::Retrieval;

pub const ROLE_DEFINITION: &str = "You are a knowledge assistant for a domain registrar's customer support team. \
You read an incoming support ticket together with excerpts from the internal support documentation and \
produce a resolution for the support agent. Base every statement on the documentation provided. \
If the documentation does not cover the ticket, say so plainly instead of guessing. \
You always reply with a single JSON object and nothing else.";

const CORRECTIVE_INSTRUCTION: &str = "Your previous reply could not be parsed. \
Respond with valid structured output only: one JSON object with exactly the fields \
\"answer\", \"references\" and \"action_required\", with no text before or after it.";

/// Assembles the two-part request sent to the completion service.
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, ticket: &str, retrieval: &Retrieval) -> CompletionPrompt {
        let mut user = String::new();
        let _ = writeln!(user, "Customer ticket:\n\"\"\"\n{}\n\"\"\"\n", ticket.trim());

        match retrieval {
            Retrieval::Passages(passages) => {
                user.push_str("Relevant documentation:\n\n");
                for p in passages {
                    let _ = writeln!(user, "[Source: {} | {}]\n{}\n", p.source_document(), p.chunk.section, p.chunk.text.trim());
                }
                let sources = retrieval.sources().join(", ");
                let _ = writeln!(
                    user,
                    "Cite only the source documents listed above ({sources}). \
                     Use the document name exactly as shown after \"Source:\".\n"
                );
            }
            Retrieval::NoRelevantContext => {
                let _ = writeln!(
                    user,
                    "No relevant documentation was found for this ticket.\n\
                     Answer conservatively: do not invent policies or procedures, \
                     set \"references\" to an empty list, and set \"action_required\" to \
                     \"{}\" or \"{}\".\n",
                    ActionKind::NoActionRequired,
                    ActionKind::ContactCustomerDirectly
                );
            }
        }

        user.push_str(&schema_instruction());
        CompletionPrompt { system: ROLE_DEFINITION.to_string(), user }
    }

    /// Same request with an appended instruction to emit valid structured output only.
    pub fn corrective(&self, original: &CompletionPrompt) -> CompletionPrompt {
        CompletionPrompt {
            system: original.system.clone(),
            user: format!("{}\n\n{}", original.user.trim_end(), CORRECTIVE_INSTRUCTION),
        }
    }
}

fn schema_instruction() -> String {
    let actions: Vec<String> = ActionKind::ALL.iter().map(|a| format!("  - {a}")).collect();
    format!(
        "Respond with a single JSON object with exactly these fields:\n\
         {{\n  \"answer\": string, the resolution text for the agent,\n  \
         \"references\": array of strings, the source documents you relied on,\n  \
         \"action_required\": string, one of the values below\n}}\n\
         Allowed values for \"action_required\":\n{}\n",
        actions.join("\n")
    )
}
