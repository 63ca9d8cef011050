use serde::{Deserialize, Serialize};

use crate::corpus::SourceDocument;
use crate::error::Error;
use crate::types::Chunk;

/// Chunk size bounds, measured in UTF-8 bytes of chunk text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub min_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_chars: 1000, min_chars: 20, overlap_chars: 100 }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.min_chars > self.max_chars {
            return Err(Error::InvalidConfig(format!(
                "chunking.min_chars ({}) exceeds chunking.max_chars ({})",
                self.min_chars, self.max_chars
            )));
        }
        if self.overlap_chars.saturating_mul(2) >= self.max_chars {
            return Err(Error::InvalidConfig(format!(
                "chunking.overlap_chars ({}) must be less than half of chunking.max_chars ({})",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Boundary {
    Paragraph,
    Sentence,
    Word,
}

const DEFAULT_SECTION: &str = "Introduction";

/// Splits markdown-ish documents into heading-aligned chunks.
///
/// Sections are taken from `#`..`######` headings outside fenced code. Sections
/// shorter than `min_chars` are folded into a neighbour; sections longer than
/// `max_chars` are cut at paragraph, sentence, then word boundaries, and every
/// piece after the first repeats up to `overlap_chars` of the text before it.
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    pub fn chunk_corpus(&self, documents: &[SourceDocument]) -> Vec<Chunk> {
        documents.iter().flat_map(|d| self.chunk_document(&d.name, &d.content)).collect()
    }

    pub fn chunk_document(&self, source: &str, content: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for (title, body) in self.merge_short(split_sections(content)) {
            for text in self.split_section(&body) {
                let ordinal = chunks.len();
                chunks.push(Chunk {
                    id: Chunk::make_id(source, ordinal),
                    source_document: source.to_string(),
                    section: title.clone(),
                    text,
                    ordinal,
                });
            }
        }
        chunks
    }

    fn merge_short(&self, sections: Vec<(String, String)>) -> Vec<(String, String)> {
        let min = self.config.min_chars;
        let mut merged: Vec<(String, String)> = Vec::with_capacity(sections.len());
        let mut carry: Option<(String, String)> = None;
        for (title, body) in sections {
            let (title, body) = match carry.take() {
                Some((carry_title, carry_body)) => (carry_title, format!("{carry_body}\n\n{title}\n{body}")),
                None => (title, body),
            };
            if body.len() < min {
                carry = Some((title, body));
            } else {
                merged.push((title, body));
            }
        }
        if let Some((title, body)) = carry {
            match merged.last_mut() {
                Some((_, last)) => {
                    last.push_str("\n\n");
                    last.push_str(&title);
                    last.push('\n');
                    last.push_str(&body);
                }
                None => merged.push((title, body)),
            }
        }
        merged
    }

    fn split_section(&self, text: &str) -> Vec<String> {
        let max = self.config.max_chars;
        if text.len() <= max {
            return vec![text.to_string()];
        }
        let overlap = self.config.overlap_chars;
        let budget = (max - overlap).max(1);

        let mut cuts = Vec::new();
        segment(text, 0, text.len(), budget, Boundary::Paragraph, &mut cuts);

        let mut windows: Vec<(usize, usize)> = Vec::new();
        let (mut start, mut end) = (0usize, 0usize);
        for cut in cuts {
            while cut - start > budget && end > start {
                if end - start >= self.config.min_chars {
                    windows.push((start, end));
                    start = end;
                } else {
                    // too short to stand alone: borrow words from the following piece
                    let floor = end.max(start + self.config.min_chars);
                    let mut split = word_cut(text, floor, start + budget);
                    if split <= start {
                        split = start + text[start..].chars().next().map_or(1, char::len_utf8);
                    }
                    windows.push((start, split));
                    start = split;
                }
            }
            end = cut;
        }
        if end > start {
            windows.push((start, end));
        }

        let last = windows.len().saturating_sub(1);
        windows
            .iter()
            .enumerate()
            .filter_map(|(i, &(s, e))| {
                let from = if i == 0 {
                    s
                } else if i == last && e - s < self.config.min_chars {
                    overlap_start(text, s, max - (e - s))
                } else {
                    overlap_start(text, s, overlap)
                };
                let piece = text[from..e].trim();
                (!piece.is_empty()).then(|| piece.to_string())
            })
            .collect()
    }
}

/// Split into `(heading, body)` pairs; bodies are trimmed and never empty.
fn split_sections(content: &str) -> Vec<(String, String)> {
    let mut sections = Vec::new();
    let mut title = DEFAULT_SECTION.to_string();
    let mut body = String::new();
    let mut in_fence = false;
    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }
        let heading = if in_fence { None } else { parse_heading(line) };
        match heading {
            Some(h) => {
                if !body.trim().is_empty() {
                    sections.push((title, body.trim().to_string()));
                }
                title = h.to_string();
                body.clear();
            }
            None => {
                body.push_str(line);
                body.push('\n');
            }
        }
    }
    if !body.trim().is_empty() {
        sections.push((title, body.trim().to_string()));
    }
    sections
}

fn parse_heading(line: &str) -> Option<&str> {
    let hashes = line.bytes().take_while(|&b| b == b'#').count();
    if !(1..=6).contains(&hashes) {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with(|c: char| c.is_whitespace()) {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim();
    (!title.is_empty()).then_some(title)
}

/// Record cut offsets so that every piece of `text[start..end]` fits `budget`.
fn segment(text: &str, start: usize, end: usize, budget: usize, level: Boundary, cuts: &mut Vec<usize>) {
    if end - start <= budget {
        cuts.push(end);
        return;
    }
    let next = match level {
        Boundary::Paragraph => Boundary::Sentence,
        Boundary::Sentence => Boundary::Word,
        Boundary::Word => {
            split_words(text, start, end, budget, cuts);
            return;
        }
    };
    let slice = &text[start..end];
    let mut inner: Vec<usize> = match level {
        Boundary::Paragraph => slice.match_indices("\n\n").map(|(i, _)| start + i + 2).collect(),
        _ => {
            let mut out = Vec::new();
            let mut chars = slice.char_indices().peekable();
            while let Some((i, c)) = chars.next() {
                let after = start + i + c.len_utf8();
                let ends_sentence = matches!(c, '.' | '!' | '?')
                    && chars.peek().map_or(false, |&(_, n)| n.is_whitespace());
                if c == '\n' || ends_sentence {
                    out.push(after);
                }
            }
            out
        }
    };
    inner.retain(|&c| c > start && c < end);
    inner.push(end);
    let mut piece_start = start;
    for cut in inner {
        if cut > piece_start {
            segment(text, piece_start, cut, budget, next, cuts);
            piece_start = cut;
        }
    }
}

fn split_words(text: &str, mut start: usize, end: usize, budget: usize, cuts: &mut Vec<usize>) {
    while end - start > budget {
        let mut limit = start + budget;
        while !text.is_char_boundary(limit) {
            limit -= 1;
        }
        let mut cut = match text[start..limit].char_indices().rev().find(|(_, c)| c.is_whitespace()) {
            Some((i, c)) => start + i + c.len_utf8(),
            None => limit,
        };
        if cut <= start {
            cut = start + text[start..].chars().next().map_or(1, char::len_utf8);
        }
        cuts.push(cut);
        start = cut;
    }
    cuts.push(end);
}

/// Last word boundary in `[floor, limit]`, or `limit` itself when there is none.
fn word_cut(text: &str, floor: usize, limit: usize) -> usize {
    let mut limit = limit.min(text.len());
    while !text.is_char_boundary(limit) {
        limit -= 1;
    }
    let mut floor = floor.min(limit);
    while !text.is_char_boundary(floor) {
        floor += 1;
    }
    text[floor..limit]
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map_or(limit, |(i, c)| floor + i + c.len_utf8())
}

/// Start offset that repeats at most `overlap` bytes before `start`, on a word boundary.
fn overlap_start(text: &str, start: usize, overlap: usize) -> usize {
    if overlap == 0 || start == 0 {
        return start;
    }
    let mut from = start.saturating_sub(overlap);
    while !text.is_char_boundary(from) {
        from += 1;
    }
    if from == 0 {
        return 0;
    }
    match text[from..start].find(char::is_whitespace) {
        Some(ws) => from + ws,
        None => from,
    }
}
