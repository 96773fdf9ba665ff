//! Language dialects.
//!
//! The pipeline core is language-agnostic. Everything that depends on the
//! syntax of the book's examples goes through a [`Dialect`]:
//! - Import and member-usage scanning
//! - Stub module rendering
//! - Toolchain command defaults and module-mapping arguments
//! - Compiler diagnostic parsing
//! - The native build script

mod zig;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::manifest::{ChapterManifest, TargetKind};

pub use zig::ZigDialect;

/// How the result of a call is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnUse {
    /// The call is a whole statement.
    Discarded,
    /// The result feeds an expression.
    Value,
}

/// Usage shape of an imported symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SymbolShape {
    Function {
        arity: usize,
        returns: ReturnUse,
        fallible: bool,
    },
    Constant,
    Type,
}

impl std::fmt::Display for SymbolShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbolShape::Function {
                arity,
                returns,
                fallible,
            } => {
                let returns = match returns {
                    ReturnUse::Discarded => "discarded",
                    ReturnUse::Value => "value",
                };
                write!(f, "function(arity {arity}, result {returns}")?;
                if *fallible {
                    write!(f, ", fallible")?;
                }
                write!(f, ")")
            }
            SymbolShape::Constant => write!(f, "constant"),
            SymbolShape::Type => write!(f, "type"),
        }
    }
}

/// One use of a module member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberUse {
    pub name: String,
    pub shape: SymbolShape,
    /// 1-based line in the unit.
    pub line: usize,
}

/// A module imported by a unit, with every member use found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    pub module: String,
    /// Line of the first import.
    pub line: usize,
    pub members: Vec<MemberUse>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Note,
}

/// A compiler diagnostic as printed, before source mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDiagnostic {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub severity: Severity,
    pub message: String,
}

/// A named module made available to a compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleArg {
    pub name: String,
    pub path: PathBuf,
    /// Names of the modules this one imports.
    pub deps: Vec<String>,
}

/// Language-specific behaviour of the pipeline.
pub trait Dialect: Send + Sync {
    /// Registry name (`[language] dialect`).
    fn name(&self) -> &'static str;

    /// Module imports of a unit, with member usages.
    fn scan_imports(&self, source: &str) -> Vec<ImportRef>;

    /// Whether an import names a file rather than a module.
    fn is_file_import(&self, module: &str) -> bool;

    /// Source text of a stub module exposing `surface`.
    fn render_stub(&self, module: &str, surface: &BTreeMap<String, SymbolShape>) -> String;

    /// Default command template for a target kind.
    fn default_template(&self, kind: TargetKind) -> &'static str;

    /// Arguments mapping module names to files for one compilation.
    fn module_args(&self, root: &Path, root_deps: &[String], modules: &[ModuleArg]) -> Vec<String>;

    /// Diagnostics in compiler output.
    fn parse_diagnostics(&self, output: &str) -> Vec<RawDiagnostic>;

    /// File name and contents of the chapter's native build script, if any.
    fn build_script(&self, manifest: &ChapterManifest) -> Option<(&'static str, String)>;
}

/// Look up a dialect by name.
pub fn dialect_for(name: &str) -> Result<Box<dyn Dialect>> {
    match name.to_ascii_lowercase().as_str() {
        "zig" => Ok(Box::new(ZigDialect::new()?)),
        _ => Err(Error::UnknownDialect(name.to_string())),
    }
}
