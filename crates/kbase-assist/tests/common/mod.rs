#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use kbase_core::config::{RetrySettings, Settings};
use kbase_core::error::{Error, Result};
use kbase_core::traits::{Completer, Embedder};
use kbase_core::types::CompletionPrompt;

pub fn fixture_docs() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).ancestors().nth(2).unwrap().join("test_data/docs")
}

/// Settings rooted in `dir` (`dir/docs`, `dir/index/snapshot.json`) with near-instant retries.
pub fn settings_in(dir: &Path) -> Settings {
    let mut s = Settings::default();
    s.corpus.docs_dir = dir.join("docs");
    s.corpus.index_path = dir.join("index/snapshot.json");
    s.retry = RetrySettings { max_attempts: 2, initial_delay_ms: 1, max_delay_ms: 2, backoff_factor: 2.0, jitter_percent: 0.0 };
    std::fs::create_dir_all(&s.corpus.docs_dir).unwrap();
    s
}

pub fn write_doc(settings: &Settings, name: &str, content: &str) {
    std::fs::write(settings.corpus.docs_dir.join(name), content).unwrap();
}

pub fn resolution_json(answer: &str, references: &[&str], action: &str) -> String {
    serde_json::json!({ "answer": answer, "references": references, "action_required": action }).to_string()
}

const AXES: [&[&str]; 4] = [
    &["suspend", "suspended", "suspension", "reactivate"],
    &["refund", "invoice", "billing", "charge"],
    &["dns", "nameserver", "nameservers"],
    &["ssl", "certificate"],
];

/// One axis per topic; a text's vector counts its topic words.
///
/// Texts on a single topic score exactly 1.0 against each other and 0.0
/// against other topics, which keeps threshold tests independent of any model.
pub struct KeywordEmbedder {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self { calls: AtomicUsize::new(0), fail: AtomicBool::new(false) }
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0f32; AXES.len()];
        let lowered = text.to_lowercase();
        for token in lowered.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            for (axis, words) in AXES.iter().enumerate() {
                if words.contains(&token) {
                    v[axis] += 1.0;
                }
            }
        }
        v
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_id(&self) -> &str {
        "keyword-axes"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Service("embedding service unavailable".into()));
        }
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Replies from a queue and records every prompt it receives.
pub struct ScriptedCompleter {
    replies: Mutex<VecDeque<Result<String>>>,
    pub prompts: Mutex<Vec<CompletionPrompt>>,
}

impl ScriptedCompleter {
    pub fn new(replies: Vec<Result<String>>) -> Self {
        Self { replies: Mutex::new(replies.into()), prompts: Mutex::new(Vec::new()) }
    }

    pub fn replying(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn prompts(&self) -> Vec<CompletionPrompt> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Completer for ScriptedCompleter {
    fn model_id(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &CompletionPrompt) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Service("no scripted reply left".into())))
    }
}

/// Cites every source shown in the prompt, after a short delay.
pub struct EchoCompleter {
    pub delay: Duration,
}

pub fn prompt_sources(prompt: &CompletionPrompt) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for line in prompt.user.lines() {
        if let Some(rest) = line.strip_prefix("[Source: ") {
            if let Some((source, _)) = rest.split_once(" | ") {
                if !out.iter().any(|s| s == source) {
                    out.push(source.to_string());
                }
            }
        }
    }
    out
}

#[async_trait]
impl Completer for EchoCompleter {
    fn model_id(&self) -> &str {
        "echo"
    }

    async fn complete(&self, prompt: &CompletionPrompt) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        let sources = prompt_sources(prompt);
        let refs: Vec<&str> = sources.iter().map(String::as_str).collect();
        Ok(resolution_json("See the cited documents.", &refs, "no_action_required"))
    }
}
