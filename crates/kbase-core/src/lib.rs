//! kbase-core
//!
//! Data model, error taxonomy, configuration, document chunking and the
//! service traits shared by the embedding, vector and assistant crates.

pub mod chunker;
pub mod config;
pub mod corpus;
pub mod error;
pub mod retry;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
