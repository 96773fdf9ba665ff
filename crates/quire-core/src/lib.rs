//! Core engine for quire, a validator for the code examples of a book.
//!
//! This crate provides:
//! - Document scanning and block classification
//! - Idempotent unit extraction with a content-hash index
//! - Dependency resolution and stub synthesis per chapter
//! - Build manifests and a multi-toolchain validation matrix
//! - Drift detection and the run report

pub mod classify;
pub mod config;
pub mod dialect;
pub mod drift;
pub mod error;
pub mod extract;
pub mod manifest;
pub mod matrix;
pub mod paths;
pub mod pipeline;
pub mod report;
pub mod resolve;
pub mod scan;
pub mod stubs;
pub mod toolchain;

pub use classify::{Classifier, Role};
pub use config::QuireConfig;
pub use dialect::{Dialect, dialect_for};
pub use drift::{DriftFinding, DriftKind};
pub use error::{Error, Result};
pub use extract::{ExtractIndex, ExtractPlan, Extractor, WriteStats};
pub use matrix::{CancelToken, MatrixOptions, Outcome, ValidationResult};
pub use paths::OutputLayout;
pub use pipeline::{ResolveOutcome, ValidateRequest};
pub use report::{Report, Verdict};
pub use scan::Scanner;
