//! End-to-end pipeline tests: extract, resolve, validate and drift over a
//! temporary corpus, with `sh` standing in for real toolchains.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use quire_core::matrix::{FailureKind, SkipReason};
use quire_core::resolve::ChapterError;
use quire_core::{
    CancelToken, DriftKind, Error, Extractor, MatrixOptions, Outcome, OutputLayout, QuireConfig,
    ValidateRequest, Verdict, drift, pipeline,
};
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// A corpus and an output directory.
struct Book {
    corpus: TempDir,
    out: TempDir,
}

impl Book {
    fn new() -> Self {
        Self {
            corpus: TempDir::new().expect("Failed to create corpus dir"),
            out: TempDir::new().expect("Failed to create output dir"),
        }
    }

    fn chapter(&self, name: &str, markdown: &str) -> &Self {
        fs::write(self.corpus.path().join(format!("{name}.md")), markdown)
            .expect("Failed to write chapter");
        self
    }

    fn corpus(&self) -> &Path {
        self.corpus.path()
    }

    fn layout(&self) -> OutputLayout {
        OutputLayout::new(self.out.path())
    }

    fn out_file(&self, relative: &str) -> PathBuf {
        self.out.path().join(relative)
    }

    fn extract(&self, config: &QuireConfig) {
        let extractor = Extractor::new(config);
        let plan = extractor.plan(self.corpus()).expect("plan failed");
        extractor.write(&plan, &self.layout()).expect("write failed");
    }
}

/// A zig block as it appears in a chapter.
fn block(body: &str) -> String {
    format!("```zig\n{body}```\n\n")
}

/// A `[[toolchains]]` entry running `script` through `sh` for every target
/// kind. The script sees the expanded `{modules}` words as `$@`.
fn toolchain(name: &str, script: &str, required: bool) -> String {
    let command = format!("{{bin}} -c '{script}' quire {{modules}}");
    format!(
        r#"
[[toolchains]]
name = "{name}"
bin = "sh"
required = {required}

[toolchains.templates]
executable = '''{command}'''
test = '''{command}'''
build_check = '''{command}'''
"#
    )
}

/// Fails unless every module path handed to the toolchain exists.
const CHECK_MODULES: &str =
    r#"for a in "$@"; do case "$a" in -M*) test -f "${a#*=}" || exit 1;; */*) test -f "$a" || exit 1;; esac; done"#;

fn config(toml: &str) -> QuireConfig {
    QuireConfig::parse(toml).expect("invalid test config")
}

fn request(config: &QuireConfig) -> ValidateRequest {
    ValidateRequest {
        toolchains: Vec::new(),
        options: MatrixOptions::from_config(&config.validate),
        corpus: None,
    }
}

const HELLO: &str = r#"const std = @import("std");

pub fn main() void {
    std.debug.print("hello\n", .{});
}
"#;

const USES_WIDGETS: &str = r#"const std = @import("std");
const widgets = @import("widgets");

pub fn main() void {
    widgets.render(1);
}
"#;

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_single_block_passes() {
    let book = Book::new();
    book.chapter("01_intro", &format!("# Intro\n\n{}", block(HELLO)));
    let config = config(&toolchain("0.15.2", CHECK_MODULES, true));

    book.extract(&config);
    assert_eq!(fs::read_to_string(book.out_file("01_intro/001.zig")).unwrap(), HELLO);

    let resolved = pipeline::resolve(&book.layout()).unwrap();
    assert!(!resolved.has_errors());
    assert!(resolved.resolutions[0].units[0].symbols.is_empty());
    assert!(resolved.resolutions[0].stubs.is_empty());

    let leftover = book.out_file(".quire/scratch/0.14.0/01_intro/001");
    fs::create_dir_all(&leftover).unwrap();

    let report = pipeline::validate(&config, &book.layout(), &request(&config), &CancelToken::new())
        .await
        .unwrap();
    assert!(!leftover.exists());
    assert!(book.out_file(".quire/scratch/0.15.2/01_intro/001").is_dir());
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].outcome, Outcome::Pass);
    assert_eq!(report.results[0].unit, "01_intro/001");
    assert_eq!(report.verdict, Verdict::Pass);
    assert!(book.out_file("report.json").exists());
    assert!(book.out_file("01_intro/manifest.json").exists());
}

#[tokio::test]
async fn test_missing_module_is_stubbed() {
    let book = Book::new();
    book.chapter("02_widgets", &block(USES_WIDGETS));
    let config = config(&toolchain("0.15.2", CHECK_MODULES, true));
    book.extract(&config);

    let resolved = pipeline::resolve(&book.layout()).unwrap();
    assert!(!resolved.has_errors());
    let stub = fs::read_to_string(book.out_file("02_widgets/stubs/widgets.zig")).unwrap();
    assert!(stub.starts_with("// quire:stub"));
    assert!(stub.contains("pub fn render(_: anytype) void {}"));

    let report = pipeline::validate(&config, &book.layout(), &request(&config), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(report.results[0].outcome, Outcome::Pass);
    assert_eq!(report.verdict, Verdict::Pass);
}

#[tokio::test]
async fn test_arity_conflict_fails_resolution() {
    let book = Book::new();
    book.chapter(
        "03_conflict",
        &format!(
            "{}{}",
            block("const widgets = @import(\"widgets\");\ntest \"one\" {\n    widgets.make(1);\n}\n"),
            block("const widgets = @import(\"widgets\");\ntest \"two\" {\n    widgets.make(1, 2);\n}\n"),
        ),
    );
    let config = config(&toolchain("0.15.2", "exit 0", true));
    book.extract(&config);

    let resolved = pipeline::resolve(&book.layout()).unwrap();
    assert!(resolved.has_errors());
    let errors = &resolved.resolutions[0].errors;
    let Some(ChapterError::Conflict(conflict)) = errors.first() else {
        panic!("expected an arity conflict, got {errors:?}");
    };
    assert_eq!(conflict.symbol, "make");
    assert_eq!(conflict.first_unit, "03_conflict/001");
    assert_eq!(conflict.second_unit, "03_conflict/002");
    assert!(!book.out_file("03_conflict/stubs/widgets.zig").exists());

    let report = pipeline::validate(&config, &book.layout(), &request(&config), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(report.results.len(), 2);
    assert!(report.results.iter().all(|r| r.outcome
        == Outcome::Skipped {
            reason: SkipReason::ChapterUnresolved
        }));
    assert_eq!(report.verdict, Verdict::Fail);
}

#[test]
fn test_edited_unit_is_reported_as_drift() {
    let book = Book::new();
    book.chapter("04_drift", &block(HELLO));
    let config = QuireConfig::default();
    book.extract(&config);
    assert!(drift::detect(&config, book.corpus(), &book.layout()).unwrap().is_empty());

    fs::write(book.out_file("04_drift/001.zig"), HELLO.replace("hello", "goodbye")).unwrap();
    let findings = drift::detect(&config, book.corpus(), &book.layout()).unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].kind, DriftKind::Modified);
    assert_eq!(findings[0].unit, "04_drift/001");
    assert!(!findings[0].diff.is_empty());

    // Re-extracting restores the tree.
    book.extract(&config);
    assert!(drift::detect(&config, book.corpus(), &book.layout()).unwrap().is_empty());
}

#[tokio::test]
async fn test_hanging_build_times_out_and_run_completes() {
    let book = Book::new();
    book.chapter("05_fine", &block(HELLO));
    book.chapter("06_hang", &block(HELLO));
    let config = config(&format!(
        "[validate]\ntimeout_secs = 1\ntimeout_retries = 1\n{}",
        toolchain("0.15.2", r#"case "$*" in *06_hang*) sleep 30;; esac"#, true)
    ));
    book.extract(&config);
    pipeline::resolve(&book.layout()).unwrap();

    let started = Instant::now();
    let report = pipeline::validate(&config, &book.layout(), &request(&config), &CancelToken::new())
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(20));

    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results[0].unit, "05_fine/001");
    assert_eq!(report.results[0].outcome, Outcome::Pass);
    let hung = &report.results[1];
    assert_eq!(
        hung.outcome,
        Outcome::Fail {
            kind: FailureKind::Timeout
        }
    );
    assert!(hung.retried);
    assert_eq!(hung.attempts, 2);
    assert_eq!(report.verdict, Verdict::Fail);
}

// =============================================================================
// Properties
// =============================================================================

#[tokio::test]
async fn test_results_are_total_over_units_and_toolchains() {
    let book = Book::new();
    book.chapter("01_a", &format!("{}{}", block(HELLO), block("test \"t\" {}\n")));
    book.chapter("02_b", &block(USES_WIDGETS));
    let config = config(&format!(
        "{}{}\n[chapters.02_b]\nadvisory = [\"old\"]\n",
        toolchain("new", CHECK_MODULES, true),
        toolchain("old", "exit 1", true),
    ));
    book.extract(&config);
    pipeline::resolve(&book.layout()).unwrap();

    let report = pipeline::validate(&config, &book.layout(), &request(&config), &CancelToken::new())
        .await
        .unwrap();

    let pairs: Vec<(&str, &str)> = report
        .results
        .iter()
        .map(|r| (r.unit.as_str(), r.toolchain.as_str()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("01_a/001", "new"),
            ("01_a/001", "old"),
            ("01_a/002", "new"),
            ("01_a/002", "old"),
            ("02_b/001", "new"),
            ("02_b/001", "old"),
        ]
    );
    let advisory = &report.results[5];
    assert!(advisory.advisory);
    assert!(advisory.outcome.is_failure());
    assert!(!advisory.is_gating_failure());
    // 01_a fails on a required, non-advisory toolchain.
    assert_eq!(report.verdict, Verdict::Fail);
    assert_eq!(report.totals.gating_failures, 2);
}

#[tokio::test]
async fn test_reruns_are_idempotent() {
    let book = Book::new();
    book.chapter("02_widgets", &block(USES_WIDGETS));
    let config = config(&toolchain("0.15.2", "exit 0", true));
    let extractor = Extractor::new(&config);

    let first = extractor
        .write(&extractor.plan(book.corpus()).unwrap(), &book.layout())
        .unwrap();
    assert_eq!(first.written, 1);
    pipeline::resolve(&book.layout()).unwrap();
    pipeline::validate(&config, &book.layout(), &request(&config), &CancelToken::new())
        .await
        .unwrap();

    let snapshot = |paths: &[&str]| -> Vec<Vec<u8>> {
        paths.iter().map(|p| fs::read(book.out_file(p)).unwrap()).collect()
    };
    let files = [
        "index.json",
        "02_widgets/001.zig",
        "02_widgets/resolution.json",
        "02_widgets/stubs/widgets.zig",
        "02_widgets/manifest.json",
        "02_widgets/build.zig",
    ];
    let before = snapshot(&files);

    let second = extractor
        .write(&extractor.plan(book.corpus()).unwrap(), &book.layout())
        .unwrap();
    assert_eq!(second.written, 0);
    let resolved = pipeline::resolve(&book.layout()).unwrap();
    assert_eq!(resolved.stats.stubs_written, 0);
    pipeline::validate(&config, &book.layout(), &request(&config), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(snapshot(&files), before);
}

#[tokio::test]
async fn test_missing_toolchain_binary_is_fatal() {
    let book = Book::new();
    book.chapter("01_intro", &block(HELLO));
    let config = config(
        r#"
[[toolchains]]
name = "0.13.0"
bin = "quire-test-missing-zig"
"#,
    );
    book.extract(&config);
    pipeline::resolve(&book.layout()).unwrap();

    let err = pipeline::validate(&config, &book.layout(), &request(&config), &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Toolchain(_)));
    assert!(!book.out_file("report.json").exists());
}

#[tokio::test]
async fn test_validate_requires_resolve() {
    let book = Book::new();
    book.chapter("01_intro", &block(HELLO));
    let config = config(&toolchain("0.15.2", "exit 0", true));
    book.extract(&config);

    let err = pipeline::validate(&config, &book.layout(), &request(&config), &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Index(_)));
}

#[tokio::test]
async fn test_validate_refuses_stale_resolution() {
    let book = Book::new();
    book.chapter("01_intro", &block(HELLO));
    let config = config(&toolchain("0.15.2", "exit 0", true));
    book.extract(&config);
    pipeline::resolve(&book.layout()).unwrap();

    // A new block after resolve: its imports were never resolved.
    book.chapter("01_intro", &format!("{}{}", block(HELLO), block(USES_WIDGETS)));
    book.extract(&config);

    let err = pipeline::validate(&config, &book.layout(), &request(&config), &CancelToken::new())
        .await
        .unwrap_err();
    match err {
        Error::Index(message) => {
            assert!(message.contains("01_intro"));
            assert!(message.contains("stale"));
        }
        other => panic!("expected a stale resolution error, got {other:?}"),
    }
    assert!(!book.out_file("01_intro/manifest.json").exists());

    pipeline::resolve(&book.layout()).unwrap();
    let report = pipeline::validate(&config, &book.layout(), &request(&config), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(report.results.len(), 2);
}

#[tokio::test]
async fn test_cancelled_run_skips_everything() {
    let book = Book::new();
    book.chapter("01_intro", &format!("{}{}", block(HELLO), block(HELLO)));
    let config = config(&toolchain("0.15.2", "exit 0", true));
    book.extract(&config);
    pipeline::resolve(&book.layout()).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let report = pipeline::validate(&config, &book.layout(), &request(&config), &cancel)
        .await
        .unwrap();
    assert!(report.cancelled);
    assert_eq!(report.results.len(), 2);
    assert!(report.results.iter().all(|r| r.outcome
        == Outcome::Skipped {
            reason: SkipReason::Cancelled
        }));
}
