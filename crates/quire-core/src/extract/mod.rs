//! Unit extraction.
//!
//! Planning is pure and in-memory; writing is idempotent and content-hash
//! driven, so reruns over an unchanged corpus leave the output tree as is.

mod extractor;
mod index;
mod readme;

pub(crate) use extractor::unit_files_in;
pub use extractor::{DocumentSummary, ExtractPlan, Extractor, RoleCounts, WriteStats};
pub use readme::{README_FILE, chapter_readme};
pub use index::{ChapterIndex, EntryKind, ExtractIndex, ExtractedUnit, INDEX_VERSION};
