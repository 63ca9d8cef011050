//! kbase-assist
//!
//! Ticket resolution over the indexed support corpus: relevance filtering,
//! prompt assembly, the chat completion client, reply validation and the
//! `KnowledgeAssistant` orchestrator that owns the active index.

pub mod completion;
pub mod orchestrator;
pub mod prompt;
pub mod retriever;
pub mod validator;

pub use completion::HttpCompleter;
pub use orchestrator::{KnowledgeAssistant, RebuildReport, ResolutionReport, StartupMode, Stats};
pub use prompt::PromptBuilder;
pub use retriever::{Retrieval, RetrievalPolicy, Retriever};
pub use validator::{DegradedReason, ResponseValidator, ValidationWarning};
