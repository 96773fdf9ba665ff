//! Document scanning.
//!
//! This module provides:
//! - Corpus walking in sorted order
//! - Fenced code block parsing with info-string attributes
//! - Chapter id derivation
//! - Structural error collection per document

mod scanner;
mod types;

pub use scanner::Scanner;
pub use types::{CodeBlock, Document, ScanError, ScanOutcome, SourceSpan};
