//! Drift between documents and the extraction tree.
//!
//! The corpus is re-planned in memory and every planned unit is compared
//! against the persisted file by content hash. Nothing is written.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use similar::TextDiff;

use crate::config::QuireConfig;
use crate::error::{Error, Result};
use crate::extract::{ExtractPlan, Extractor, unit_files_in};
use crate::paths::{OutputLayout, content_hash};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    /// Block and file both exist but differ.
    Modified,
    /// Block exists, file does not.
    Missing,
    /// File exists, block does not.
    Orphaned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftFinding {
    pub unit: String,
    pub chapter: String,
    pub kind: DriftKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<PathBuf>,
    /// Opening fence line of the block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_hash: Option<String>,
    /// Unified diff, document side first.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub diff: String,
}

impl std::fmt::Display for DriftFinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            DriftKind::Modified => "modified",
            DriftKind::Missing => "missing",
            DriftKind::Orphaned => "orphaned",
        };
        match (&self.document, self.line) {
            (Some(doc), Some(line)) => {
                write!(f, "{kind}: {} ({}:{})", self.unit, doc.display(), line)
            }
            _ => write!(f, "{kind}: {}", self.unit),
        }
    }
}

/// Compare a corpus against an extraction tree.
pub fn detect(config: &QuireConfig, corpus: &Path, layout: &OutputLayout) -> Result<Vec<DriftFinding>> {
    let plan = Extractor::new(config).plan(corpus)?;
    compare(&plan, layout, &config.language.extension)
}

/// Compare an in-memory plan against an extraction tree.
///
/// Chapters excluded by scan errors are skipped: their blocks are unknown.
pub fn compare(plan: &ExtractPlan, layout: &OutputLayout, extension: &str) -> Result<Vec<DriftFinding>> {
    let excluded: BTreeSet<&str> = plan.index.failed_chapters().collect();
    let mut findings = Vec::new();

    for (chapter, index) in &plan.index.chapters {
        if excluded.contains(chapter.as_str()) {
            continue;
        }
        let mut planned = BTreeSet::new();
        for unit in &index.units {
            planned.insert(unit.file_name().to_string());
            let path = layout.resolve(&unit.path);
            let base = DriftFinding {
                unit: unit.id.clone(),
                chapter: chapter.clone(),
                kind: DriftKind::Missing,
                document: Some(unit.document.clone()),
                line: Some(unit.span.start_line),
                expected_hash: Some(unit.hash.clone()),
                actual_hash: None,
                diff: String::new(),
            };

            if !path.exists() {
                findings.push(base);
                continue;
            }
            let actual = fs::read_to_string(&path).map_err(|e| Error::file_io("read", &path, e))?;
            let actual_hash = content_hash(&actual);
            if actual_hash != unit.hash {
                findings.push(DriftFinding {
                    kind: DriftKind::Modified,
                    actual_hash: Some(actual_hash),
                    diff: unified_diff(&unit.text, &actual),
                    ..base
                });
            }
        }

        for (name, _) in unit_files_in(&layout.chapter_dir(chapter), extension)? {
            if !planned.contains(&name) {
                findings.push(orphan(chapter, &name, extension));
            }
        }
    }

    // Chapter directories whose document is gone entirely.
    for chapter in output_chapters(layout)? {
        if plan.index.chapters.contains_key(&chapter) || excluded.contains(chapter.as_str()) {
            continue;
        }
        for (name, _) in unit_files_in(&layout.chapter_dir(&chapter), extension)? {
            findings.push(orphan(&chapter, &name, extension));
        }
    }

    findings.sort_by(|a, b| a.chapter.cmp(&b.chapter).then_with(|| a.unit.cmp(&b.unit)));
    for finding in &findings {
        tracing::warn!("Drift {}", finding);
    }
    Ok(findings)
}

fn orphan(chapter: &str, file_name: &str, extension: &str) -> DriftFinding {
    let stem = file_name
        .strip_suffix(extension)
        .and_then(|s| s.strip_suffix('.'))
        .unwrap_or(file_name);
    DriftFinding {
        unit: format!("{chapter}/{stem}"),
        chapter: chapter.to_string(),
        kind: DriftKind::Orphaned,
        document: None,
        line: None,
        expected_hash: None,
        actual_hash: None,
        diff: String::new(),
    }
}

/// Visible subdirectories of the output root.
fn output_chapters(layout: &OutputLayout) -> Result<Vec<String>> {
    let mut chapters = Vec::new();
    if !layout.root.is_dir() {
        return Ok(chapters);
    }
    let root = &layout.root;
    for entry in fs::read_dir(root).map_err(|e| Error::file_io("read", root, e))? {
        let entry = entry.map_err(|e| Error::file_io("read", root, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with('.') && entry.path().is_dir() {
            chapters.push(name);
        }
    }
    chapters.sort();
    Ok(chapters)
}

fn unified_diff(expected: &str, actual: &str) -> String {
    TextDiff::from_lines(expected, actual)
        .unified_diff()
        .context_radius(3)
        .header("document", "extracted")
        .to_string()
}
