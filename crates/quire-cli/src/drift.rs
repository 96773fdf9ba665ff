//! Drift command implementation.

use std::path::Path;
use std::process::ExitCode;

use quire_core::{DriftKind, OutputLayout, QuireConfig, drift};

use crate::colors;

/// Report drift; exits non-zero iff any unit diverged.
pub fn execute(corpus: &Path, out: &Path, config_path: Option<&Path>) -> anyhow::Result<ExitCode> {
    let config = QuireConfig::discover(config_path, &[corpus, out])?;
    let findings = drift::detect(&config, corpus, &OutputLayout::new(out))?;

    if findings.is_empty() {
        println!("{}No drift{}", colors::GREEN, colors::RESET);
        return Ok(ExitCode::SUCCESS);
    }

    for finding in &findings {
        let color = match finding.kind {
            DriftKind::Modified => colors::YELLOW,
            DriftKind::Missing | DriftKind::Orphaned => colors::RED,
        };
        println!("{color}{finding}{}", colors::RESET);
        if !finding.diff.is_empty() {
            println!("{}", finding.diff);
        }
    }
    println!("\n{}{} units diverged{}", colors::RED, findings.len(), colors::RESET);
    Ok(ExitCode::FAILURE)
}
