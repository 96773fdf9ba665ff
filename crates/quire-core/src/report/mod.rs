//! Run report (`<out>/report.json`).
//!
//! The aggregator merges every stage's findings with the matrix results and
//! computes the verdict. Warnings and drift are reported but never gate.

mod summary;

use serde::{Deserialize, Serialize};

use crate::classify::ClassificationWarning;
use crate::drift::DriftFinding;
use crate::error::{Error, Result};
use crate::extract::ExtractIndex;
use crate::matrix::{Outcome, ValidationResult};
use crate::paths::{OutputLayout, write_if_changed};
use crate::resolve::{ChapterError, ChapterResolution, ResolutionWarning};
use crate::scan::ScanError;

pub use summary::{ChapterSummary, Totals, render_summary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn is_pass(self) -> bool {
        self == Verdict::Pass
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Fail => write!(f, "FAIL"),
        }
    }
}

/// A resolution error with its chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterFailure {
    pub chapter: String,
    pub error: ChapterError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub verdict: Verdict,
    /// The run was interrupted; skipped pairs say which.
    pub cancelled: bool,
    pub toolchains: Vec<String>,
    pub totals: Totals,
    pub chapters: Vec<ChapterSummary>,
    pub scan_errors: Vec<ScanError>,
    pub classification_warnings: Vec<ClassificationWarning>,
    pub resolution_warnings: Vec<ResolutionWarning>,
    pub resolution_errors: Vec<ChapterFailure>,
    /// Sorted by chapter, unit, toolchain.
    pub results: Vec<ValidationResult>,
    #[serde(default)]
    pub drift: Vec<DriftFinding>,
}

impl Report {
    /// Persist as pretty JSON.
    pub fn save(&self, layout: &OutputLayout) -> Result<()> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        write_if_changed(&layout.report_path(), &json)?;
        Ok(())
    }

    pub fn load(layout: &OutputLayout) -> Result<Self> {
        let path = layout.report_path();
        let contents =
            std::fs::read_to_string(&path).map_err(|e| Error::file_io("read", &path, e))?;
        serde_json::from_str(&contents)
            .map_err(|e| Error::Index(format!("corrupt {}: {e}", path.display())))
    }

    /// Failures that decide the verdict.
    pub fn gating_failures(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| r.is_gating_failure())
    }
}

/// Collects findings from every stage into a [`Report`].
#[derive(Debug, Default)]
pub struct Aggregator {
    toolchains: Vec<String>,
    scan_errors: Vec<ScanError>,
    classification_warnings: Vec<ClassificationWarning>,
    resolution_warnings: Vec<ResolutionWarning>,
    resolution_errors: Vec<ChapterFailure>,
    results: Vec<ValidationResult>,
    drift: Vec<DriftFinding>,
    cancelled: bool,
}

impl Aggregator {
    /// Start from the extraction index: scan errors and classification
    /// warnings.
    pub fn new(index: &ExtractIndex, toolchains: Vec<String>) -> Self {
        Self {
            toolchains,
            scan_errors: index.scan_errors.clone(),
            classification_warnings: index.warnings.clone(),
            ..Self::default()
        }
    }

    pub fn add_resolution(&mut self, resolution: &ChapterResolution) {
        self.resolution_warnings
            .extend(resolution.warnings.iter().cloned());
        self.resolution_errors
            .extend(resolution.errors.iter().map(|error| ChapterFailure {
                chapter: resolution.chapter.clone(),
                error: error.clone(),
            }));
    }

    pub fn add_results(&mut self, results: impl IntoIterator<Item = ValidationResult>) {
        self.results.extend(results);
    }

    pub fn set_drift(&mut self, drift: Vec<DriftFinding>) {
        self.drift = drift;
    }

    pub fn set_cancelled(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
    }

    pub fn finish(mut self) -> Report {
        self.results.sort_by(|a, b| {
            a.chapter
                .cmp(&b.chapter)
                .then_with(|| a.unit.cmp(&b.unit))
                .then_with(|| a.toolchain.cmp(&b.toolchain))
        });
        self.resolution_errors
            .sort_by(|a, b| a.chapter.cmp(&b.chapter));

        let gating = self.results.iter().filter(|r| r.is_gating_failure()).count();
        let verdict = if self.scan_errors.is_empty() && self.resolution_errors.is_empty() && gating == 0
        {
            Verdict::Pass
        } else {
            Verdict::Fail
        };

        let totals = Totals::from_results(&self.results, self.drift.len());
        let chapters = ChapterSummary::from_results(&self.results);
        tracing::info!(
            "Verdict {}: {} passed, {} failed ({} gating), {} skipped",
            verdict,
            totals.passed,
            totals.failed,
            totals.gating_failures,
            totals.skipped
        );

        Report {
            verdict,
            cancelled: self.cancelled,
            toolchains: self.toolchains,
            totals,
            chapters,
            scan_errors: self.scan_errors,
            classification_warnings: self.classification_warnings,
            resolution_warnings: self.resolution_warnings,
            resolution_errors: self.resolution_errors,
            results: self.results,
            drift: self.drift,
        }
    }
}

fn is_skip(outcome: &Outcome) -> bool {
    matches!(outcome, Outcome::Skipped { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LanguageConfig;
    use crate::drift::DriftKind;
    use crate::manifest::TargetKind;
    use crate::matrix::{FailureKind, SkipReason};
    use tempfile::TempDir;

    fn result(unit: &str, toolchain: &str, outcome: Outcome, required: bool, advisory: bool) -> ValidationResult {
        ValidationResult {
            chapter: unit.split('/').next().unwrap_or_default().to_string(),
            unit: unit.to_string(),
            toolchain: toolchain.to_string(),
            target: TargetKind::Executable,
            outcome,
            required,
            advisory,
            exit_code: None,
            duration_ms: 1,
            attempts: 1,
            retried: false,
            diagnostics: Vec::new(),
            output: String::new(),
        }
    }

    fn fail() -> Outcome {
        Outcome::Fail {
            kind: FailureKind::Run,
        }
    }

    fn aggregator() -> Aggregator {
        let index = ExtractIndex::new(LanguageConfig::default());
        Aggregator::new(&index, vec!["a".to_string(), "b".to_string()])
    }

    #[test]
    fn test_results_are_sorted() {
        let mut agg = aggregator();
        agg.add_results(vec![
            result("ch2/001", "a", Outcome::Pass, true, false),
            result("ch1/002", "b", Outcome::Pass, true, false),
            result("ch1/002", "a", Outcome::Pass, true, false),
            result("ch1/001", "b", Outcome::Pass, true, false),
        ]);
        let report = agg.finish();
        let keys: Vec<(&str, &str)> = report
            .results
            .iter()
            .map(|r| (r.unit.as_str(), r.toolchain.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![("ch1/001", "b"), ("ch1/002", "a"), ("ch1/002", "b"), ("ch2/001", "a")]
        );
        assert_eq!(report.verdict, Verdict::Pass);
    }

    #[test]
    fn test_advisory_and_optional_failures_do_not_gate() {
        let mut agg = aggregator();
        agg.add_results(vec![
            result("ch/001", "a", Outcome::Pass, true, false),
            result("ch/001", "b", fail(), true, true),
            result("ch/002", "b", fail(), false, false),
        ]);
        let report = agg.finish();
        assert_eq!(report.verdict, Verdict::Pass);
        assert_eq!(report.totals.failed, 2);
        assert_eq!(report.totals.gating_failures, 0);
    }

    #[test]
    fn test_required_failure_gates() {
        let mut agg = aggregator();
        agg.add_results(vec![result("ch/001", "a", fail(), true, false)]);
        let report = agg.finish();
        assert_eq!(report.verdict, Verdict::Fail);
        assert_eq!(report.gating_failures().count(), 1);
    }

    #[test]
    fn test_resolution_errors_gate_and_drift_does_not() {
        let mut agg = aggregator();
        agg.add_resolution(&ChapterResolution {
            chapter: "ch".to_string(),
            units: Vec::new(),
            stubs: Vec::new(),
            warnings: Vec::new(),
            errors: vec![ChapterError::Cycle {
                units: vec!["ch/001".to_string(), "ch/002".to_string()],
            }],
        });
        agg.add_results(vec![result(
            "ch/001",
            "a",
            Outcome::Skipped {
                reason: SkipReason::ChapterUnresolved,
            },
            true,
            false,
        )]);
        let report = agg.finish();
        assert_eq!(report.verdict, Verdict::Fail);
        assert_eq!(report.resolution_errors[0].chapter, "ch");

        let mut agg = aggregator();
        agg.set_drift(vec![DriftFinding {
            unit: "ch/001".to_string(),
            chapter: "ch".to_string(),
            kind: DriftKind::Orphaned,
            document: None,
            line: None,
            expected_hash: None,
            actual_hash: None,
            diff: String::new(),
        }]);
        let report = agg.finish();
        assert_eq!(report.verdict, Verdict::Pass);
        assert_eq!(report.totals.drift, 1);
    }

    #[test]
    fn test_scan_errors_gate() {
        let mut index = ExtractIndex::new(LanguageConfig::default());
        index.scan_errors.push(ScanError {
            document: "ch".to_string(),
            path: "ch.md".into(),
            line: Some(3),
            message: "unterminated fence".to_string(),
        });
        let report = Aggregator::new(&index, Vec::new()).finish();
        assert_eq!(report.verdict, Verdict::Fail);
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let layout = OutputLayout::new(temp.path());
        let mut agg = aggregator();
        agg.add_results(vec![result("ch/001", "a", fail(), true, false)]);
        agg.set_cancelled(true);
        let report = agg.finish();

        report.save(&layout).unwrap();
        let loaded = Report::load(&layout).unwrap();
        assert_eq!(loaded, report);
        assert!(loaded.cancelled);
    }
}
