//! Maps compiler diagnostics back to document lines.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::dialect::{RawDiagnostic, Severity};
use crate::extract::{ExtractIndex, ExtractedUnit};
use crate::paths::OutputLayout;

/// A diagnostic with its location in the source document, when the file is
/// an extracted unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedDiagnostic {
    pub severity: Severity,
    pub message: String,
    /// File as printed by the compiler.
    pub file: String,
    pub line: usize,
    pub column: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_line: Option<usize>,
}

impl std::fmt::Display for MappedDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.document, self.document_line) {
            (Some(doc), Some(line)) => write!(f, "{}:{}: {}", doc.display(), line, self.message),
            _ => write!(f, "{}:{}: {}", self.file, self.line, self.message),
        }
    }
}

/// Unit file path to owning block.
pub struct DiagnosticMapper<'a> {
    units: FxHashMap<PathBuf, &'a ExtractedUnit>,
}

impl<'a> DiagnosticMapper<'a> {
    pub fn new(layout: &OutputLayout, index: &'a ExtractIndex) -> Self {
        let units = index
            .units()
            .map(|unit| (layout.resolve(&unit.path), unit))
            .collect();
        Self { units }
    }

    fn lookup(&self, file: &str) -> Option<&'a ExtractedUnit> {
        let path = Path::new(file);
        if let Some(&unit) = self.units.get(path) {
            return Some(unit);
        }
        // Relative or differently-rooted paths: match on `<chapter>/<file>`.
        self.units
            .values()
            .find(|unit| path.ends_with(&unit.path))
            .copied()
    }

    pub fn map(&self, raw: RawDiagnostic) -> MappedDiagnostic {
        let unit = self.lookup(&raw.file);
        MappedDiagnostic {
            document: unit.map(|u| u.document.clone()),
            document_line: unit.map(|u| u.content_start() + raw.line.saturating_sub(1)),
            severity: raw.severity,
            message: raw.message,
            file: raw.file,
            line: raw.line,
            column: raw.column,
        }
    }
}
