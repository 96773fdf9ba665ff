//! Plans and writes extracted units.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::Serialize;

use super::index::{ChapterIndex, EntryKind, ExtractIndex, ExtractedUnit};
use super::readme::{README_FILE, chapter_readme};
use crate::classify::{Classification, Classifier, Role};
use crate::config::QuireConfig;
use crate::error::{Error, Result};
use crate::paths::{OutputLayout, content_hash, is_unit_file_name, unit_file_name, write_if_changed};
use crate::scan::{CodeBlock, Document, ScanOutcome, Scanner};

/// Per-role block counts of one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoleCounts {
    pub total: usize,
    pub runnable: usize,
    pub test_only: usize,
    pub transcript: usize,
    pub config: usize,
    pub ignored: usize,
}

impl RoleCounts {
    fn add(&mut self, role: Role) {
        self.total += 1;
        match role {
            Role::Runnable => self.runnable += 1,
            Role::TestOnly => self.test_only += 1,
            Role::Transcript => self.transcript += 1,
            Role::Config => self.config += 1,
            Role::Ignored => self.ignored += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub chapter: String,
    pub counts: RoleCounts,
}

/// In-memory result of scanning, classifying and planning a corpus.
#[derive(Debug, Clone)]
pub struct ExtractPlan {
    /// The index that writing this plan produces; units carry their text.
    pub index: ExtractIndex,
    /// One entry per cleanly scanned document, sorted by chapter.
    pub summaries: Vec<DocumentSummary>,
}

impl ExtractPlan {
    /// Whether any document failed structurally.
    pub fn has_scan_errors(&self) -> bool {
        !self.index.scan_errors.is_empty()
    }
}

/// What a write pass changed on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub written: usize,
    pub unchanged: usize,
    pub pruned: usize,
}

/// Materializes runnable and test-only blocks as unit files.
pub struct Extractor<'a> {
    config: &'a QuireConfig,
}

impl<'a> Extractor<'a> {
    pub fn new(config: &'a QuireConfig) -> Self {
        Self { config }
    }

    /// Scan and classify a corpus without touching the output tree.
    pub fn plan(&self, corpus: &Path) -> Result<ExtractPlan> {
        let outcome = Scanner::new(&self.config.scan).scan_corpus(corpus)?;
        Ok(self.plan_outcome(outcome))
    }

    /// Plan from an existing scan.
    pub fn plan_outcome(&self, outcome: ScanOutcome) -> ExtractPlan {
        let classifier = Classifier::new(&self.config.classify, &self.config.language.tag);
        let mut index = ExtractIndex::new(self.config.language.clone());
        let mut summaries = Vec::new();

        for document in &outcome.documents {
            let mut counts = RoleCounts::default();
            let mut units = Vec::new();

            for block in &document.blocks {
                let classification = classifier.classify(block, &mut index.warnings);
                counts.add(classification.role);
                tracing::debug!("{} -> {}", block.location(), classification.role);

                if classification.role.is_extractable() {
                    units.push(self.unit_for(document, block, classification));
                }
            }

            index.chapters.insert(
                document.id.clone(),
                ChapterIndex {
                    document: document.path.clone(),
                    units,
                },
            );
            summaries.push(DocumentSummary {
                chapter: document.id.clone(),
                counts,
            });
        }

        index.scan_errors = outcome.errors;
        summaries.sort_by(|a, b| a.chapter.cmp(&b.chapter));

        tracing::info!(
            "Planned {} units from {} documents",
            index.units().count(),
            summaries.len()
        );
        ExtractPlan { index, summaries }
    }

    fn unit_for(
        &self,
        document: &Document,
        block: &CodeBlock,
        classification: Classification,
    ) -> ExtractedUnit {
        let mut text = block.text.clone();
        if !text.ends_with('\n') {
            text.push('\n');
        }

        let entry = if classification.role == Role::TestOnly || classification.test_idiom {
            EntryKind::Test
        } else if classification.entry_point {
            EntryKind::Executable
        } else {
            EntryKind::Library
        };
        let file = unit_file_name(block.ordinal, &self.config.language.extension);

        ExtractedUnit {
            id: format!("{}/{:03}", document.id, block.ordinal),
            chapter: document.id.clone(),
            sequence: block.ordinal,
            path: format!("{}/{file}", document.id),
            document: document.path.clone(),
            span: block.span,
            role: classification.role,
            entry,
            title: block.title.clone(),
            module: block
                .attribute("module")
                .filter(|m| !m.is_empty())
                .map(str::to_string),
            hash: content_hash(&text),
            text,
        }
    }

    /// Persist a plan: unit files, chapter overviews, stale-unit pruning,
    /// `index.json`.
    ///
    /// Files whose contents already match are left untouched. Chapters
    /// excluded by scan errors keep whatever was extracted before.
    pub fn write(&self, plan: &ExtractPlan, layout: &OutputLayout) -> Result<WriteStats> {
        layout.create()?;
        let previous = ExtractIndex::load_optional(layout).unwrap_or_else(|e| {
            tracing::warn!("Ignoring unreadable previous index: {}", e);
            None
        });

        let mut stats = WriteStats::default();
        for unit in plan.index.units() {
            if write_if_changed(&layout.resolve(&unit.path), &unit.text)? {
                stats.written += 1;
                tracing::debug!("Wrote {}", unit.path);
            } else {
                stats.unchanged += 1;
            }
        }

        for (chapter, entry) in &plan.index.chapters {
            let readme = layout.chapter_dir(chapter).join(README_FILE);
            if write_if_changed(&readme, &chapter_readme(chapter, entry))? {
                tracing::debug!("Wrote {}", readme.display());
            }
        }

        let excluded: BTreeSet<&str> = plan.index.failed_chapters().collect();
        let mut chapters: BTreeSet<&str> = plan.index.chapters.keys().map(String::as_str).collect();
        if let Some(previous) = &previous {
            chapters.extend(previous.chapters.keys().map(String::as_str));
        }

        let ext = &self.config.language.extension;
        for chapter in chapters.into_iter().filter(|c| !excluded.contains(c)) {
            let keep: BTreeSet<&str> = plan
                .index
                .chapters
                .get(chapter)
                .map(|c| c.units.iter().map(ExtractedUnit::file_name).collect())
                .unwrap_or_default();
            stats.pruned += prune_units(&layout.chapter_dir(chapter), ext, &keep)?;
        }

        plan.index.save(layout)?;
        tracing::info!(
            "Extraction wrote {} files ({} unchanged, {} pruned)",
            stats.written,
            stats.unchanged,
            stats.pruned
        );
        Ok(stats)
    }
}

/// Unit files present in a chapter directory, by file name.
pub(crate) fn unit_files_in(dir: &Path, extension: &str) -> Result<BTreeMap<String, std::path::PathBuf>> {
    let mut found = BTreeMap::new();
    if !dir.is_dir() {
        return Ok(found);
    }
    for entry in fs::read_dir(dir).map_err(|e| Error::file_io("read", dir, e))? {
        let path = entry.map_err(|e| Error::file_io("read", dir, e))?.path();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if path.is_file() && is_unit_file_name(&name, extension) {
            found.insert(name, path);
        }
    }
    Ok(found)
}

fn prune_units(dir: &Path, extension: &str, keep: &BTreeSet<&str>) -> Result<usize> {
    let mut pruned = 0;
    for (name, path) in unit_files_in(dir, extension)? {
        if !keep.contains(name.as_str()) {
            fs::remove_file(&path).map_err(|e| Error::file_io("remove", &path, e))?;
            tracing::debug!("Pruned stale unit {}", path.display());
            pruned += 1;
        }
    }
    Ok(pruned)
}
