//! Dependency resolution.
//!
//! This module provides:
//! - Import partitioning into standard, sibling and stubbed modules
//! - Sibling import cycle detection
//! - Per-chapter resolution records (`resolution.json`)

mod graph;
mod resolver;
mod types;

pub use graph::ImportGraph;
pub use resolver::{ResolveStats, Resolver, write_resolutions};
pub use types::{
    ChapterError, ChapterResolution, DependencySymbol, ImportSource, ResolutionWarning,
    ResolvedImport, UnitResolution,
};
