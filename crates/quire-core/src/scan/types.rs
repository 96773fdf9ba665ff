//! Types produced by the document scanner.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Line span of a fenced block, 1-based, fence lines inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start_line: usize,
    pub end_line: usize,
}

impl SourceSpan {
    /// First line of block content (the line after the opening fence).
    pub fn content_start(&self) -> usize {
        self.start_line + 1
    }
}

/// A single fenced code region.
#[derive(Debug, Clone)]
pub struct CodeBlock {
    /// Owning document (chapter id).
    pub document: String,
    /// 1-based position among all fenced blocks of the document.
    pub ordinal: usize,
    /// Location in the document.
    pub span: SourceSpan,
    /// Declared language tag; empty when untagged.
    pub language: String,
    /// `key=value` attributes from the info string.
    pub attributes: BTreeMap<String, String>,
    /// Raw block text, fence lines excluded.
    pub text: String,
    /// Title from a `title=` attribute or a preceding heading.
    pub title: Option<String>,
}

impl CodeBlock {
    /// Look up an info-string attribute.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Human-readable location for diagnostics.
    pub fn location(&self) -> String {
        format!("{}#{} (line {})", self.document, self.ordinal, self.span.start_line)
    }
}

/// One chapter of the corpus.
#[derive(Debug, Clone)]
pub struct Document {
    /// Chapter id.
    pub id: String,
    /// Path the document was read from.
    pub path: PathBuf,
    /// Fenced blocks in source order.
    pub blocks: Vec<CodeBlock>,
}

/// Structural failure that excludes a whole document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanError {
    /// Chapter id, or the path when no id could be derived.
    pub document: String,
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub message: String,
}

impl std::fmt::Display for ScanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}: {}", self.path.display(), line, self.message),
            None => write!(f, "{}: {}", self.path.display(), self.message),
        }
    }
}

/// Result of scanning a corpus.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// Documents that scanned cleanly, sorted by id.
    pub documents: Vec<Document>,
    /// Documents excluded by structural errors.
    pub errors: Vec<ScanError>,
}
