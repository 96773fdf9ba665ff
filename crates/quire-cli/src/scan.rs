//! Scan command implementation.
//!
//! Prints per-document block counts; exits non-zero on structural errors.

use std::path::Path;
use std::process::ExitCode;

use quire_core::{Extractor, QuireConfig};

use crate::colors;

pub fn execute(corpus: &Path, config_path: Option<&Path>) -> anyhow::Result<ExitCode> {
    let config = QuireConfig::discover(config_path, &[corpus])?;
    let plan = Extractor::new(&config).plan(corpus)?;

    let width = plan
        .summaries
        .iter()
        .map(|s| s.chapter.len())
        .max()
        .unwrap_or(0)
        .max("chapter".len());

    println!(
        "{}{:<width$}  {:>5}  {:>8}  {:>4}  {:>10}  {:>6}  {:>7}{}",
        colors::BOLD,
        "chapter",
        "total",
        "runnable",
        "test",
        "transcript",
        "config",
        "ignored",
        colors::RESET
    );
    for summary in &plan.summaries {
        let c = summary.counts;
        println!(
            "{:<width$}  {:>5}  {:>8}  {:>4}  {:>10}  {:>6}  {:>7}",
            summary.chapter, c.total, c.runnable, c.test_only, c.transcript, c.config, c.ignored
        );
    }

    for warning in &plan.index.warnings {
        println!("{}warning:{} {}", colors::YELLOW, colors::RESET, warning);
    }
    for error in &plan.index.scan_errors {
        println!("{}error:{} {}", colors::RED, colors::RESET, error);
    }

    println!(
        "\n{}{} documents, {} units, {} scan errors{}",
        colors::status(!plan.has_scan_errors()),
        plan.summaries.len(),
        plan.index.units().count(),
        plan.index.scan_errors.len(),
        colors::RESET
    );

    Ok(if plan.has_scan_errors() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
