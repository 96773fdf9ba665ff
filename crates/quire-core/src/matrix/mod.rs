//! Version matrix execution.
//!
//! Every (build unit, toolchain version) pair becomes one [`MatrixJob`]:
//! an isolated subprocess with its own scratch directory, run on a bounded
//! pool with a timeout and cancellation. Every pair yields exactly one
//! [`ValidationResult`], skips included.

mod cancel;
mod diagnostics;
mod runner;

use serde::{Deserialize, Serialize};

use crate::dialect::{Dialect, Severity};
use crate::extract::ExtractedUnit;
use crate::manifest::TargetKind;
use crate::toolchain::ToolchainVersion;

pub use cancel::CancelToken;
pub use diagnostics::{DiagnosticMapper, MappedDiagnostic};
pub use runner::{Ending, MatrixJob, MatrixOptions, MatrixRunner, RunRecord, plan_jobs};

/// Why a pair failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The compiler reported errors.
    Compile,
    /// A test target built but its tests failed.
    Test,
    /// An executable target failed without compile errors.
    Run,
    Timeout,
    /// Terminated by a signal.
    Crash,
}

/// Why a pair was not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Cancelled,
    ChapterUnresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail { kind: FailureKind },
    Skipped { reason: SkipReason },
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Fail { .. })
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Pass => write!(f, "pass"),
            Outcome::Fail { kind } => write!(f, "fail ({})", failure_label(*kind)),
            Outcome::Skipped { reason } => match reason {
                SkipReason::Cancelled => write!(f, "skipped (cancelled)"),
                SkipReason::ChapterUnresolved => write!(f, "skipped (chapter unresolved)"),
            },
        }
    }
}

fn failure_label(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::Compile => "compile",
        FailureKind::Test => "test",
        FailureKind::Run => "run",
        FailureKind::Timeout => "timeout",
        FailureKind::Crash => "crash",
    }
}

/// Outcome of one (unit, toolchain) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub chapter: String,
    pub unit: String,
    pub toolchain: String,
    pub target: TargetKind,
    pub outcome: Outcome,
    /// The toolchain gates the verdict.
    pub required: bool,
    /// The chapter lists this toolchain as advisory.
    pub advisory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub attempts: u32,
    pub retried: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<MappedDiagnostic>,
    /// Captured output of failed pairs, truncated.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
}

impl ValidationResult {
    /// A failure that counts against the verdict.
    pub fn is_gating_failure(&self) -> bool {
        self.outcome.is_failure() && self.required && !self.advisory
    }
}

/// Turn a finished job into its result.
pub fn classify_record(
    job: &MatrixJob,
    toolchain: &ToolchainVersion,
    record: RunRecord,
    dialect: &dyn Dialect,
    mapper: &DiagnosticMapper<'_>,
    max_output: usize,
) -> ValidationResult {
    let diagnostics: Vec<MappedDiagnostic> = dialect
        .parse_diagnostics(&record.output)
        .into_iter()
        .map(|raw| mapper.map(raw))
        .collect();
    let compile_error = diagnostics.iter().any(|d| d.severity == Severity::Error);

    let (outcome, exit_code) = match record.ending {
        Ending::NotStarted | Ending::Cancelled => (
            Outcome::Skipped {
                reason: SkipReason::Cancelled,
            },
            None,
        ),
        Ending::TimedOut => (
            Outcome::Fail {
                kind: FailureKind::Timeout,
            },
            None,
        ),
        Ending::Exited { code: Some(0), .. } => (Outcome::Pass, Some(0)),
        Ending::Exited {
            signal: Some(_), ..
        } => (
            Outcome::Fail {
                kind: FailureKind::Crash,
            },
            None,
        ),
        Ending::Exited { code, .. } => {
            let kind = if compile_error {
                FailureKind::Compile
            } else {
                match job.target {
                    TargetKind::Test => FailureKind::Test,
                    TargetKind::Executable => FailureKind::Run,
                    TargetKind::BuildCheck => FailureKind::Compile,
                }
            };
            (Outcome::Fail { kind }, code)
        }
    };

    let output = if outcome.is_failure() {
        truncate_output(&record.output, max_output)
    } else {
        String::new()
    };

    ValidationResult {
        chapter: job.chapter.clone(),
        unit: job.unit.clone(),
        toolchain: toolchain.name.clone(),
        target: job.target,
        outcome,
        required: toolchain.required,
        advisory: job.advisory,
        exit_code,
        duration_ms: record.duration_ms,
        attempts: record.attempts,
        retried: record.attempts > 1,
        diagnostics: if outcome.is_failure() { diagnostics } else { Vec::new() },
        output,
    }
}

/// Explicit skip records for every (unit, toolchain) pair of a chapter.
pub fn skipped_results(
    units: &[ExtractedUnit],
    toolchains: &[ToolchainVersion],
    advisory: &[String],
    reason: SkipReason,
) -> Vec<ValidationResult> {
    units
        .iter()
        .flat_map(|unit| {
            toolchains.iter().map(move |toolchain| ValidationResult {
                chapter: unit.chapter.clone(),
                unit: unit.id.clone(),
                toolchain: toolchain.name.clone(),
                target: unit.entry.into(),
                outcome: Outcome::Skipped { reason },
                required: toolchain.required,
                advisory: advisory.contains(&toolchain.name),
                exit_code: None,
                duration_ms: 0,
                attempts: 0,
                retried: false,
                diagnostics: Vec::new(),
                output: String::new(),
            })
        })
        .collect()
}

/// Keep the head of long output, on a char boundary.
fn truncate_output(output: &str, max: usize) -> String {
    if output.len() <= max {
        return output.to_string();
    }
    let mut end = max;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}\n[... {} bytes truncated]",
        &output[..end],
        output.len() - end
    )
}
