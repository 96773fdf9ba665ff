//! Types produced by dependency resolution.

use serde::{Deserialize, Serialize};

use crate::dialect::SymbolShape;
use crate::error::{Error, Result};
use crate::extract::ExtractedUnit;
use crate::paths::{OutputLayout, write_if_changed};
use crate::stubs::{StubConflict, StubModule};

/// Where an imported module comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImportSource {
    /// Provided by the toolchain.
    Std,
    /// Declared by another unit of the same chapter.
    Sibling { unit: String },
    /// Synthesized placeholder.
    Stub,
}

impl ImportSource {
    pub fn is_std(&self) -> bool {
        matches!(self, ImportSource::Std)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedImport {
    pub module: String,
    pub source: ImportSource,
}

/// A member a unit needs from a non-standard module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySymbol {
    pub name: String,
    pub module: String,
    pub unit: String,
    pub shape: SymbolShape,
    pub line: usize,
    /// Satisfied by a real module rather than a stub.
    pub resolved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitResolution {
    pub unit: String,
    /// Content hash of the unit file this resolution was computed from.
    #[serde(default)]
    pub hash: String,
    /// Sorted by module name.
    pub imports: Vec<ResolvedImport>,
    pub symbols: Vec<DependencySymbol>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionWarning {
    pub chapter: String,
    pub unit: String,
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ResolutionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (line {}): {}", self.unit, self.line, self.message)
    }
}

/// A problem that fails resolution for a whole chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChapterError {
    Cycle { units: Vec<String> },
    SelfImport { unit: String, module: String },
    DuplicateModule { module: String, units: Vec<String> },
    Conflict(StubConflict),
}

impl std::fmt::Display for ChapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChapterError::Cycle { units } => {
                write!(f, "import cycle: {}", units.join(" -> "))?;
                if let Some(first) = units.first() {
                    write!(f, " -> {first}")?;
                }
                Ok(())
            }
            ChapterError::SelfImport { unit, module } => {
                write!(f, "{unit} imports its own module `{module}`")
            }
            ChapterError::DuplicateModule { module, units } => {
                write!(f, "module `{module}` declared by {}", units.join(", "))
            }
            ChapterError::Conflict(conflict) => write!(f, "stub conflict: {conflict}"),
        }
    }
}

/// Resolution of one chapter (`<chapter>/resolution.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterResolution {
    pub chapter: String,
    /// Sorted by unit id.
    pub units: Vec<UnitResolution>,
    /// Sorted by module name.
    pub stubs: Vec<StubModule>,
    pub warnings: Vec<ResolutionWarning>,
    pub errors: Vec<ChapterError>,
}

impl ChapterResolution {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn unit(&self, id: &str) -> Option<&UnitResolution> {
        self.units.iter().find(|u| u.unit == id)
    }

    /// Whether this resolution covers exactly `units`, each unchanged since
    /// it was resolved.
    pub fn is_current(&self, units: &[ExtractedUnit]) -> bool {
        self.units.len() == units.len()
            && units
                .iter()
                .all(|unit| self.unit(&unit.id).is_some_and(|r| r.hash == unit.hash))
    }

    /// Load a chapter's resolution, `None` if `resolve` never ran for it.
    pub fn load(layout: &OutputLayout, chapter: &str) -> Result<Option<Self>> {
        let path = layout.resolution_path(chapter);
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            std::fs::read_to_string(&path).map_err(|e| Error::file_io("read", &path, e))?;
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| Error::Index(format!("corrupt {}: {e}", path.display())))
    }

    pub fn save(&self, layout: &OutputLayout) -> Result<bool> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        write_if_changed(&layout.resolution_path(&self.chapter), &json)
    }
}
