use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};

/// One readable file of the support corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// Path relative to the corpus root, `/`-separated.
    pub name: String,
    pub content: String,
}

/// Read every file under `root` whose extension is in `extensions`, sorted by name.
///
/// A missing or unreadable root is an `Error::Index`; an empty directory is an
/// empty corpus.
pub fn load_corpus(root: &Path, extensions: &[String]) -> Result<Vec<SourceDocument>> {
    if !root.is_dir() {
        return Err(Error::Index(format!("corpus directory does not exist: {}", root.display())));
    }
    let mut files: Vec<PathBuf> = Vec::new();
    for entry in walkdir::WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|e| Error::Index(format!("failed to walk {}: {}", root.display(), e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let wanted = path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)));
        if wanted {
            files.push(path.to_path_buf());
        }
    }
    files.sort();

    let mut documents = Vec::with_capacity(files.len());
    for path in files {
        let content = read_file_content(&path)?;
        let name = document_name(root, &path);
        debug!(document = %name, bytes = content.len(), "loaded source document");
        documents.push(SourceDocument { name, content });
    }
    info!(root = %root.display(), documents = documents.len(), "corpus loaded");
    Ok(documents)
}

fn read_file_content(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|e| Error::Index(format!("failed to read {}: {}", path.display(), e)))?;
    Ok(match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}

fn document_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
