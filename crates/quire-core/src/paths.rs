//! Output directory layout.
//!
//! Every stage reads and writes through [`OutputLayout`] so that the CLI and
//! the library agree on where artifacts live:
//!
//! ```text
//! <out>/
//! ├── index.json              # unit id → source span, hashes, scan findings
//! ├── report.json             # aggregated verdict
//! ├── <chapter>/
//! │   ├── 001.zig             # extracted units
//! │   ├── stubs/widgets.zig   # synthesized stub modules
//! │   ├── resolution.json
//! │   ├── manifest.json
//! │   └── build.zig
//! └── .quire/scratch/         # per (toolchain, unit) working directories
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Index file name.
pub const INDEX_FILE: &str = "index.json";
/// Report file name.
pub const REPORT_FILE: &str = "report.json";
/// Per-chapter resolution file name.
pub const RESOLUTION_FILE: &str = "resolution.json";
/// Per-chapter manifest file name.
pub const MANIFEST_FILE: &str = "manifest.json";
/// Directory holding synthesized stubs inside a chapter.
pub const STUBS_DIR: &str = "stubs";

/// Directory structure of an extraction output tree.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    /// The output directory itself.
    pub root: PathBuf,

    /// Private working area for matrix runs.
    pub scratch_dir: PathBuf,
}

impl OutputLayout {
    /// Describe the layout rooted at `root` without touching the disk.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let scratch_dir = root.join(".quire").join("scratch");
        Self { root, scratch_dir }
    }

    /// Create the root directory if missing.
    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| Error::file_io("create", &self.root, e))
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    pub fn report_path(&self) -> PathBuf {
        self.root.join(REPORT_FILE)
    }

    pub fn chapter_dir(&self, chapter: &str) -> PathBuf {
        self.root.join(chapter)
    }

    pub fn resolution_path(&self, chapter: &str) -> PathBuf {
        self.chapter_dir(chapter).join(RESOLUTION_FILE)
    }

    pub fn manifest_path(&self, chapter: &str) -> PathBuf {
        self.chapter_dir(chapter).join(MANIFEST_FILE)
    }

    /// Resolve a path stored relative to the output root.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Scratch directory for one (toolchain, unit) pair, created on demand.
    pub fn scratch_for(&self, toolchain: &str, unit_id: &str) -> Result<PathBuf> {
        let dir = self
            .scratch_dir
            .join(sanitize_component(toolchain))
            .join(unit_id);
        fs::create_dir_all(&dir).map_err(|e| Error::file_io("create", &dir, e))?;
        Ok(dir)
    }

    /// Remove all scratch state left by earlier runs.
    pub fn clean_scratch(&self) -> Result<()> {
        if self.scratch_dir.exists() {
            fs::remove_dir_all(&self.scratch_dir)
                .map_err(|e| Error::file_io("remove", &self.scratch_dir, e))?;
        }
        Ok(())
    }
}

/// File name of an extracted unit: the zero-padded block ordinal.
pub fn unit_file_name(sequence: usize, extension: &str) -> String {
    format!("{sequence:03}.{extension}")
}

/// Whether `name` looks like an extracted unit file for `extension`.
pub fn is_unit_file_name(name: &str, extension: &str) -> bool {
    name.strip_suffix(extension)
        .and_then(|stem| stem.strip_suffix('.'))
        .is_some_and(|stem| stem.len() >= 3 && stem.bytes().all(|b| b.is_ascii_digit()))
}

/// SHA-256 of `contents`, hex encoded.
pub fn content_hash(contents: &str) -> String {
    hex::encode(Sha256::digest(contents.as_bytes()))
}

/// Write `contents` unless the file already holds exactly those bytes.
///
/// Returns whether the file was written. Keeping unchanged files untouched
/// makes reruns byte- and mtime-stable.
pub fn write_if_changed(path: &Path, contents: &str) -> Result<bool> {
    if let Ok(existing) = fs::read(path) {
        if existing == contents.as_bytes() {
            return Ok(false);
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::file_io("create", parent, e))?;
    }
    fs::write(path, contents).map_err(|e| Error::file_io("write", path, e))?;
    Ok(true)
}

fn sanitize_component(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
