//! Counts and the human-readable summary table.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use super::{Report, is_skip};
use crate::matrix::ValidationResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub results: usize,
    pub passed: usize,
    pub failed: usize,
    pub gating_failures: usize,
    pub skipped: usize,
    pub retried: usize,
    pub drift: usize,
}

impl Totals {
    pub(super) fn from_results(results: &[ValidationResult], drift: usize) -> Self {
        let mut totals = Totals {
            results: results.len(),
            drift,
            ..Totals::default()
        };
        for result in results {
            if result.outcome.is_failure() {
                totals.failed += 1;
                if result.is_gating_failure() {
                    totals.gating_failures += 1;
                }
            } else if is_skip(&result.outcome) {
                totals.skipped += 1;
            } else {
                totals.passed += 1;
            }
            if result.retried {
                totals.retried += 1;
            }
        }
        totals
    }
}

/// One row of the per-chapter table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterSummary {
    pub chapter: String,
    pub units: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Failures on advisory or optional toolchains.
    pub advisory_failures: usize,
}

impl ChapterSummary {
    pub(super) fn from_results(results: &[ValidationResult]) -> Vec<Self> {
        let mut rows: BTreeMap<&str, (ChapterSummary, Vec<&str>)> = BTreeMap::new();
        for result in results {
            let (row, units) = rows.entry(result.chapter.as_str()).or_insert_with(|| {
                (
                    ChapterSummary {
                        chapter: result.chapter.clone(),
                        ..ChapterSummary::default()
                    },
                    Vec::new(),
                )
            });
            if !units.contains(&result.unit.as_str()) {
                units.push(result.unit.as_str());
            }
            if result.is_gating_failure() {
                row.failed += 1;
            } else if result.outcome.is_failure() {
                row.advisory_failures += 1;
            } else if is_skip(&result.outcome) {
                row.skipped += 1;
            } else {
                row.passed += 1;
            }
        }
        rows.into_values()
            .map(|(mut row, units)| {
                row.units = units.len();
                row
            })
            .collect()
    }
}

/// Plain-text summary: chapter table, totals, then every failure.
pub fn render_summary(report: &Report) -> String {
    let mut out = String::new();
    let width = report
        .chapters
        .iter()
        .map(|c| c.chapter.len())
        .max()
        .unwrap_or(0)
        .max("chapter".len());

    let _ = writeln!(
        out,
        "{:<width$}  {:>5}  {:>5}  {:>5}  {:>5}  {:>8}",
        "chapter", "units", "pass", "fail", "skip", "advisory"
    );
    for row in &report.chapters {
        let _ = writeln!(
            out,
            "{:<width$}  {:>5}  {:>5}  {:>5}  {:>5}  {:>8}",
            row.chapter, row.units, row.passed, row.failed, row.skipped, row.advisory_failures
        );
    }

    let totals = &report.totals;
    let _ = writeln!(
        out,
        "\n{} results: {} passed, {} failed ({} gating), {} skipped, {} retried",
        totals.results, totals.passed, totals.failed, totals.gating_failures, totals.skipped, totals.retried
    );
    if !report.scan_errors.is_empty() {
        let _ = writeln!(out, "{} scan errors", report.scan_errors.len());
    }
    if !report.resolution_errors.is_empty() {
        let _ = writeln!(out, "{} resolution errors", report.resolution_errors.len());
    }
    if totals.drift > 0 {
        let _ = writeln!(out, "{} drift findings", totals.drift);
    }

    let failures: Vec<&ValidationResult> = report
        .results
        .iter()
        .filter(|r| r.outcome.is_failure())
        .collect();
    if !failures.is_empty() {
        let _ = writeln!(out, "\nFailures:");
        for result in failures {
            let marker = if result.is_gating_failure() { "" } else { " [advisory]" };
            let _ = writeln!(
                out,
                "  {} @ {}: {}{}",
                result.unit, result.toolchain, result.outcome, marker
            );
            if let Some(diag) = result.diagnostics.first() {
                let _ = writeln!(out, "    {diag}");
            }
        }
    }
    out
}
