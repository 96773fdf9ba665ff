//! Manifest and build script generation.

use super::{BuildUnit, ChapterManifest, ManifestModule, ModuleProvenance};
use crate::dialect::Dialect;
use crate::error::Result;
use crate::extract::ChapterIndex;
use crate::paths::{OutputLayout, write_if_changed};
use crate::resolve::{ChapterResolution, ImportSource};

/// Build the manifest of a resolved chapter.
pub fn synthesize(
    index: &ChapterIndex,
    resolution: &ChapterResolution,
    extension: &str,
    advisory: Vec<String>,
) -> ChapterManifest {
    let mut units: Vec<BuildUnit> = index
        .units
        .iter()
        .map(|unit| BuildUnit {
            id: unit.id.clone(),
            path: unit.path.clone(),
            file: unit.file_name().to_string(),
            target: unit.entry.into(),
            module: unit.module.clone(),
            imports: resolution
                .unit(&unit.id)
                .map(|r| r.imports.clone())
                .unwrap_or_default(),
        })
        .collect();
    units.sort_by(|a, b| a.id.cmp(&b.id));

    let mut modules: Vec<ManifestModule> = units
        .iter()
        .filter_map(|unit| {
            Some(ManifestModule {
                name: unit.module.clone()?,
                path: unit.file.clone(),
                provenance: ModuleProvenance::Sibling,
                deps: module_deps(unit),
            })
        })
        .chain(resolution.stubs.iter().map(|stub| ManifestModule {
            name: stub.module.clone(),
            path: stub.path.clone(),
            provenance: ModuleProvenance::Stub,
            deps: Vec::new(),
        }))
        .collect();

    // Siblings imported by file name are modules under that name.
    for unit in &units {
        for import in &unit.imports {
            let ImportSource::Sibling { unit: owner } = &import.source else {
                continue;
            };
            if modules.iter().any(|m| m.name == import.module) {
                continue;
            }
            if let Some(owner) = units.iter().find(|u| &u.id == owner) {
                modules.push(ManifestModule {
                    name: import.module.clone(),
                    path: owner.file.clone(),
                    provenance: ModuleProvenance::Sibling,
                    deps: module_deps(owner),
                });
            }
        }
    }
    modules.sort_by(|a, b| a.name.cmp(&b.name));

    ChapterManifest {
        chapter: resolution.chapter.clone(),
        extension: extension.to_string(),
        units,
        modules,
        advisory,
    }
}

fn module_deps(unit: &BuildUnit) -> Vec<String> {
    let mut deps: Vec<String> = unit
        .imports
        .iter()
        .filter(|i| !i.source.is_std())
        .map(|i| i.module.clone())
        .collect();
    deps.sort();
    deps
}

/// Write `manifest.json` and the dialect's build script; returns whether
/// either file changed.
pub fn write_manifest(
    layout: &OutputLayout,
    manifest: &ChapterManifest,
    dialect: &dyn Dialect,
) -> Result<bool> {
    let mut json = serde_json::to_string_pretty(manifest)?;
    json.push('\n');
    let mut changed = write_if_changed(&layout.manifest_path(&manifest.chapter), &json)?;

    if let Some((name, script)) = dialect.build_script(manifest) {
        let path = layout.chapter_dir(&manifest.chapter).join(name);
        changed |= write_if_changed(&path, &script)?;
    }
    if changed {
        tracing::debug!("Wrote manifest for {}", manifest.chapter);
    }
    Ok(changed)
}
