//! Build manifest synthesis.
//!
//! One manifest per resolved chapter: every unit with its target kind and
//! resolved imports, every sibling and stub module with its own deps. The
//! manifest is a pure function of the index and the resolution.

mod generator;

use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::extract::EntryKind;
use crate::resolve::ResolvedImport;

pub use generator::{synthesize, write_manifest};

/// What a unit is built as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Executable,
    Test,
    BuildCheck,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::Executable => "executable",
            TargetKind::Test => "test",
            TargetKind::BuildCheck => "build_check",
        }
    }
}

impl From<EntryKind> for TargetKind {
    fn from(entry: EntryKind) -> Self {
        match entry {
            EntryKind::Test => TargetKind::Test,
            EntryKind::Executable => TargetKind::Executable,
            EntryKind::Library => TargetKind::BuildCheck,
        }
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit ready for compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildUnit {
    pub id: String,
    /// Path relative to the output root.
    pub path: String,
    /// File name inside the chapter directory.
    pub file: String,
    pub target: TargetKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// Sorted by module name.
    pub imports: Vec<ResolvedImport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleProvenance {
    Sibling,
    Stub,
}

/// A named module compilations can import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestModule {
    pub name: String,
    /// Path relative to the chapter directory.
    pub path: String,
    pub provenance: ModuleProvenance,
    /// Non-standard modules this module imports, sorted.
    pub deps: Vec<String>,
}

/// `<chapter>/manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterManifest {
    pub chapter: String,
    /// Unit file extension.
    pub extension: String,
    /// Sorted by id.
    pub units: Vec<BuildUnit>,
    /// Sorted by name.
    pub modules: Vec<ManifestModule>,
    /// Toolchains whose failures do not gate this chapter.
    #[serde(default)]
    pub advisory: Vec<String>,
}

impl ChapterManifest {
    pub fn module(&self, name: &str) -> Option<&ManifestModule> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Modules a unit needs, transitively, sorted by name.
    pub fn module_closure(&self, unit: &BuildUnit) -> Vec<&ManifestModule> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = unit
            .imports
            .iter()
            .filter(|i| !i.source.is_std())
            .map(|i| i.module.as_str())
            .collect();

        while let Some(name) = queue.pop_front() {
            if unit.module.as_deref() == Some(name) || !seen.insert(name) {
                continue;
            }
            if let Some(module) = self.module(name) {
                queue.extend(module.deps.iter().map(String::as_str));
            }
        }

        seen.into_iter().filter_map(|name| self.module(name)).collect()
    }

    pub fn is_advisory(&self, toolchain: &str) -> bool {
        self.advisory.iter().any(|a| a == toolchain)
    }
}
