//! The extraction index (`<out>/index.json`).

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::classify::{ClassificationWarning, Role};
use crate::config::LanguageConfig;
use crate::error::{Error, Result};
use crate::paths::{OutputLayout, write_if_changed};
use crate::scan::{ScanError, SourceSpan};

/// Format version of `index.json`.
pub const INDEX_VERSION: u32 = 1;

/// How an extracted unit is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Executable,
    Test,
    Library,
}

/// A block materialized as a standalone file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedUnit {
    /// `<chapter>/<sequence>`.
    pub id: String,
    pub chapter: String,
    /// Block ordinal within the document.
    pub sequence: usize,
    /// File path relative to the output root.
    pub path: String,
    /// Source document.
    pub document: PathBuf,
    pub span: SourceSpan,
    pub role: Role,
    pub entry: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Declared module name (`module=` attribute).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// SHA-256 of the file contents.
    pub hash: String,
    /// File contents; only present on freshly planned units.
    #[serde(skip)]
    pub text: String,
}

impl ExtractedUnit {
    /// File name inside the chapter directory.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Document line of the first content line.
    pub fn content_start(&self) -> usize {
        self.span.content_start()
    }
}

/// Units of one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterIndex {
    pub document: PathBuf,
    /// Sorted by id.
    pub units: Vec<ExtractedUnit>,
}

/// Everything later stages need to know about an extraction pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractIndex {
    pub version: u32,
    /// Language settings in effect during extraction.
    pub language: LanguageConfig,
    pub chapters: BTreeMap<String, ChapterIndex>,
    #[serde(default)]
    pub scan_errors: Vec<ScanError>,
    #[serde(default)]
    pub warnings: Vec<ClassificationWarning>,
}

impl ExtractIndex {
    pub fn new(language: LanguageConfig) -> Self {
        Self {
            version: INDEX_VERSION,
            language,
            chapters: BTreeMap::new(),
            scan_errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Load `index.json`; a missing file means extraction never ran.
    pub fn load(layout: &OutputLayout) -> Result<Self> {
        let path = layout.index_path();
        if !path.exists() {
            return Err(Error::Index(format!(
                "{} not found; run `quire extract` first",
                path.display()
            )));
        }
        let contents =
            std::fs::read_to_string(&path).map_err(|e| Error::file_io("read", &path, e))?;
        let index: ExtractIndex = serde_json::from_str(&contents)
            .map_err(|e| Error::Index(format!("corrupt {}: {e}", path.display())))?;
        if index.version != INDEX_VERSION {
            return Err(Error::Index(format!(
                "{} has version {}, expected {INDEX_VERSION}; re-run `quire extract`",
                path.display(),
                index.version
            )));
        }
        Ok(index)
    }

    /// Load `index.json` if present.
    pub fn load_optional(layout: &OutputLayout) -> Result<Option<Self>> {
        if layout.index_path().exists() {
            Self::load(layout).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Persist as pretty JSON; returns whether the file changed.
    pub fn save(&self, layout: &OutputLayout) -> Result<bool> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        write_if_changed(&layout.index_path(), &json)
    }

    pub fn units(&self) -> impl Iterator<Item = &ExtractedUnit> {
        self.chapters.values().flat_map(|c| c.units.iter())
    }

    pub fn unit(&self, id: &str) -> Option<&ExtractedUnit> {
        let (chapter, _) = id.rsplit_once('/')?;
        self.chapters
            .get(chapter)?
            .units
            .iter()
            .find(|u| u.id == id)
    }

    /// Chapters excluded by structural scan errors.
    pub fn failed_chapters(&self) -> impl Iterator<Item = &str> {
        self.scan_errors.iter().map(|e| e.document.as_str())
    }
}
