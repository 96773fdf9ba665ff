//! Stub module synthesis.
//!
//! A [`StubRegistry`] is scoped to one chapter and fed sequentially in unit
//! order. The first use of a symbol fixes its shape; any later use with a
//! different shape is a [`StubConflict`].

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dialect::{Dialect, SymbolShape};
use crate::error::{Error, Result};
use crate::paths::{STUBS_DIR, write_if_changed};

/// Provenance marker on the first line of every synthesized stub.
pub const STUB_MARKER: &str = "quire:stub";

/// Two incompatible uses of the same stub symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StubConflict {
    pub module: String,
    pub symbol: String,
    pub first_unit: String,
    pub first_shape: SymbolShape,
    pub second_unit: String,
    pub second_shape: SymbolShape,
}

impl std::fmt::Display for StubConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "`{}.{}` used as {} in {} but as {} in {}",
            self.module,
            self.symbol,
            self.first_shape,
            self.first_unit,
            self.second_shape,
            self.second_unit
        )
    }
}

/// A synthesized placeholder module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StubModule {
    pub module: String,
    /// Path relative to the chapter directory.
    pub path: String,
    /// Symbol name to shape, sorted.
    pub surface: BTreeMap<String, SymbolShape>,
    /// Units importing the module, sorted.
    pub used_by: Vec<String>,
}

#[derive(Debug, Default)]
struct PendingStub {
    surface: BTreeMap<String, (SymbolShape, String)>,
    used_by: BTreeSet<String>,
}

/// Chapter-scoped accumulator of stub surfaces.
#[derive(Debug, Default)]
pub struct StubRegistry {
    modules: BTreeMap<String, PendingStub>,
}

impl StubRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note that `unit` imports `module`, even if it uses no members.
    pub fn declare(&mut self, module: &str, unit: &str) {
        self.modules
            .entry(module.to_string())
            .or_default()
            .used_by
            .insert(unit.to_string());
    }

    /// Record one symbol use.
    pub fn record(
        &mut self,
        module: &str,
        unit: &str,
        symbol: &str,
        shape: SymbolShape,
    ) -> std::result::Result<(), StubConflict> {
        let stub = self.modules.entry(module.to_string()).or_default();
        stub.used_by.insert(unit.to_string());

        match stub.surface.get(symbol) {
            None => {
                stub.surface
                    .insert(symbol.to_string(), (shape, unit.to_string()));
                Ok(())
            }
            Some((existing, _)) if *existing == shape => Ok(()),
            Some((existing, first_unit)) => Err(StubConflict {
                module: module.to_string(),
                symbol: symbol.to_string(),
                first_unit: first_unit.clone(),
                first_shape: *existing,
                second_unit: unit.to_string(),
                second_shape: shape,
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Finished stub modules, sorted by module name.
    pub fn into_modules(self, extension: &str) -> Vec<StubModule> {
        self.modules
            .into_iter()
            .map(|(module, stub)| StubModule {
                path: stub_path(&module, extension),
                surface: stub
                    .surface
                    .into_iter()
                    .map(|(name, (shape, _))| (name, shape))
                    .collect(),
                used_by: stub.used_by.into_iter().collect(),
                module,
            })
            .collect()
    }
}

/// `stubs/<module>.<ext>`; a module named by file import keeps its name.
fn stub_path(module: &str, extension: &str) -> String {
    let suffix = format!(".{extension}");
    if module.ends_with(&suffix) {
        format!("{STUBS_DIR}/{module}")
    } else {
        format!("{STUBS_DIR}/{module}{suffix}")
    }
}

/// Whether a file's contents carry the stub provenance marker.
pub fn is_stub_source(contents: &str) -> bool {
    contents
        .lines()
        .next()
        .is_some_and(|line| line.contains(STUB_MARKER))
}

/// Write stub files into a chapter's stub directory and remove stale ones.
///
/// Only files carrying [`STUB_MARKER`] are ever removed. Returns
/// `(written, pruned)`.
pub fn write_stubs(
    chapter_dir: &Path,
    stubs: &[StubModule],
    dialect: &dyn Dialect,
    extension: &str,
) -> Result<(usize, usize)> {
    let mut written = 0;
    let mut keep = BTreeSet::new();
    for stub in stubs {
        let path = chapter_dir.join(&stub.path);
        let contents = dialect.render_stub(&stub.module, &stub.surface);
        if write_if_changed(&path, &contents)? {
            written += 1;
            tracing::debug!("Wrote stub {}", path.display());
        }
        keep.insert(path);
    }

    let mut pruned = 0;
    let dir = chapter_dir.join(STUBS_DIR);
    if dir.is_dir() {
        for entry in fs::read_dir(&dir).map_err(|e| Error::file_io("read", &dir, e))? {
            let path = entry.map_err(|e| Error::file_io("read", &dir, e))?.path();
            let matches_ext = path
                .extension()
                .is_some_and(|e| e.to_string_lossy() == extension);
            if !matches_ext || keep.contains(&path) {
                continue;
            }
            let stale = fs::read_to_string(&path)
                .map(|c| is_stub_source(&c))
                .unwrap_or(false);
            if stale {
                fs::remove_file(&path).map_err(|e| Error::file_io("remove", &path, e))?;
                tracing::debug!("Removed stale stub {}", path.display());
                pruned += 1;
            }
        }
    }
    Ok((written, pruned))
}
