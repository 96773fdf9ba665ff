//! Dependency resolution and stub planning.

use std::collections::BTreeMap;
use std::fs;

use rayon::prelude::*;

use super::graph::ImportGraph;
use super::types::{
    ChapterError, ChapterResolution, DependencySymbol, ImportSource, ResolutionWarning,
    ResolvedImport, UnitResolution,
};
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::extract::{ChapterIndex, ExtractIndex, ExtractedUnit};
use crate::paths::OutputLayout;
use crate::stubs::{StubRegistry, write_stubs};

/// Totals of a resolve pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    pub chapters: usize,
    pub failed_chapters: usize,
    pub stubs_written: usize,
    pub stubs_pruned: usize,
}

/// Partitions unit imports into standard, sibling and stubbed modules.
pub struct Resolver<'a> {
    dialect: &'a dyn Dialect,
    stdlib: &'a [String],
    extension: &'a str,
}

impl<'a> Resolver<'a> {
    pub fn new(dialect: &'a dyn Dialect, stdlib: &'a [String], extension: &'a str) -> Self {
        Self {
            dialect,
            stdlib,
            extension,
        }
    }

    /// Resolve every chapter of an index, reading units from the output tree.
    ///
    /// Chapters are independent and resolve in parallel.
    pub fn resolve_index(
        &self,
        index: &ExtractIndex,
        layout: &OutputLayout,
    ) -> Result<Vec<ChapterResolution>> {
        let mut resolutions: Vec<ChapterResolution> = index
            .chapters
            .par_iter()
            .map(|(chapter, entry)| {
                let sources = read_sources(entry, layout)?;
                Ok(self.resolve_chapter(chapter, &entry.units, &sources))
            })
            .collect::<Result<_>>()?;
        resolutions.sort_by(|a, b| a.chapter.cmp(&b.chapter));
        Ok(resolutions)
    }

    /// Resolve one chapter.
    ///
    /// `sources` maps unit id to file contents. Stub usage is aggregated
    /// sequentially in unit order through a chapter-scoped registry.
    pub fn resolve_chapter(
        &self,
        chapter: &str,
        units: &[ExtractedUnit],
        sources: &BTreeMap<String, String>,
    ) -> ChapterResolution {
        let mut ordered: Vec<&ExtractedUnit> = units.iter().collect();
        ordered.sort_by(|a, b| a.id.cmp(&b.id));

        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let mut declared: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for unit in &ordered {
            if let Some(module) = unit.module.as_deref() {
                declared.entry(module).or_default().push(unit.id.as_str());
            }
        }
        for (module, owners) in &declared {
            if owners.len() > 1 {
                errors.push(ChapterError::DuplicateModule {
                    module: module.to_string(),
                    units: owners.iter().map(|u| u.to_string()).collect(),
                });
            }
        }

        let mut graph = ImportGraph::new();
        let mut registry = StubRegistry::new();
        let mut resolved_units = Vec::new();

        for unit in &ordered {
            let source = sources.get(&unit.id).map(String::as_str).unwrap_or("");
            let mut imports = Vec::new();
            let mut symbols = Vec::new();

            for import in self.dialect.scan_imports(source) {
                let module = import.module.as_str();

                let file_stem = if self.dialect.is_file_import(module) {
                    let Some(stem) = self.local_file_stem(module) else {
                        warnings.push(ResolutionWarning {
                            chapter: chapter.to_string(),
                            unit: unit.id.clone(),
                            line: import.line,
                            message: format!("file import `{module}` is left to the compiler"),
                        });
                        continue;
                    };
                    Some(stem)
                } else {
                    None
                };

                // `"shapes.zig"` names the sibling declaring `shapes`, or the
                // unit file itself.
                let sibling: Option<&str> = match file_stem {
                    Some(stem) => declared
                        .get(stem)
                        .and_then(|o| o.first())
                        .copied()
                        .or_else(|| {
                            ordered
                                .iter()
                                .find(|u| u.file_name() == module)
                                .map(|u| u.id.as_str())
                        }),
                    None => declared.get(module).and_then(|o| o.first()).copied(),
                };

                let source = if file_stem.is_none() && self.stdlib.iter().any(|s| s == module) {
                    ImportSource::Std
                } else if let Some(owner) = sibling {
                    if owner == unit.id {
                        errors.push(ChapterError::SelfImport {
                            unit: unit.id.clone(),
                            module: module.to_string(),
                        });
                        continue;
                    }
                    graph.add_import(&unit.id, owner);
                    ImportSource::Sibling {
                        unit: owner.to_string(),
                    }
                } else {
                    registry.declare(module, &unit.id);
                    for member in &import.members {
                        if let Err(conflict) =
                            registry.record(module, &unit.id, &member.name, member.shape)
                        {
                            tracing::warn!("{}: {}", chapter, conflict);
                            errors.push(ChapterError::Conflict(conflict));
                        }
                    }
                    ImportSource::Stub
                };

                if !source.is_std() {
                    symbols.extend(import.members.iter().map(|member| DependencySymbol {
                        name: member.name.clone(),
                        module: module.to_string(),
                        unit: unit.id.clone(),
                        shape: member.shape,
                        line: member.line,
                        resolved: !matches!(source, ImportSource::Stub),
                    }));
                }
                imports.push(ResolvedImport {
                    module: module.to_string(),
                    source,
                });
            }

            imports.sort_by(|a, b| a.module.cmp(&b.module));
            resolved_units.push(UnitResolution {
                unit: unit.id.clone(),
                hash: unit.hash.clone(),
                imports,
                symbols,
            });
        }

        for units in graph.cycles() {
            errors.push(ChapterError::Cycle { units });
        }

        let stubs = registry.into_modules(self.extension);
        tracing::debug!(
            "Resolved {}: {} units, {} stubs, {} errors",
            chapter,
            resolved_units.len(),
            stubs.len(),
            errors.len()
        );

        ChapterResolution {
            chapter: chapter.to_string(),
            units: resolved_units,
            stubs,
            warnings,
            errors,
        }
    }
}

impl Resolver<'_> {
    /// Stem of a file import naming a file next to the unit, such as
    /// `"shapes.zig"`; `None` for paths with directories.
    fn local_file_stem<'m>(&self, module: &'m str) -> Option<&'m str> {
        module
            .strip_suffix(self.extension)?
            .strip_suffix('.')
            .filter(|stem| !stem.is_empty() && !stem.contains('/'))
    }
}

fn read_sources(entry: &ChapterIndex, layout: &OutputLayout) -> Result<BTreeMap<String, String>> {
    entry
        .units
        .iter()
        .map(|unit| {
            let path = layout.resolve(&unit.path);
            fs::read_to_string(&path)
                .map(|text| (unit.id.clone(), text))
                .map_err(|e| {
                    Error::Index(format!(
                        "cannot read unit {} ({e}); re-run `quire extract`",
                        path.display()
                    ))
                })
        })
        .collect()
}

/// Persist resolutions: `resolution.json` per chapter plus stub files.
///
/// Chapters with errors get no stubs; any stubs left from an earlier pass
/// are removed.
pub fn write_resolutions(
    resolutions: &[ChapterResolution],
    layout: &OutputLayout,
    dialect: &dyn Dialect,
    extension: &str,
) -> Result<ResolveStats> {
    let mut stats = ResolveStats::default();
    for resolution in resolutions {
        stats.chapters += 1;
        resolution.save(layout)?;

        let stubs = if resolution.is_ok() {
            resolution.stubs.as_slice()
        } else {
            stats.failed_chapters += 1;
            for error in &resolution.errors {
                tracing::warn!("{}: {}", resolution.chapter, error);
            }
            &[]
        };
        let (written, pruned) =
            write_stubs(&layout.chapter_dir(&resolution.chapter), stubs, dialect, extension)?;
        stats.stubs_written += written;
        stats.stubs_pruned += pruned;
    }

    tracing::info!(
        "Resolved {} chapters ({} failed), {} stubs written",
        stats.chapters,
        stats.failed_chapters,
        stats.stubs_written
    );
    Ok(stats)
}
