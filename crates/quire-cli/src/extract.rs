//! Extract command implementation.

use std::path::Path;
use std::process::ExitCode;

use quire_core::{Extractor, OutputLayout, QuireConfig};

use crate::colors;

/// Extract units; the exit code reflects structural errors only.
pub fn execute(
    corpus: &Path,
    out: &Path,
    dry_run: bool,
    config_path: Option<&Path>,
) -> anyhow::Result<ExitCode> {
    let config = QuireConfig::discover(config_path, &[corpus, out])?;
    let extractor = Extractor::new(&config);
    let plan = extractor.plan(corpus)?;

    for error in &plan.index.scan_errors {
        println!("{}error:{} {}", colors::RED, colors::RESET, error);
    }
    for warning in &plan.index.warnings {
        println!("{}warning:{} {}", colors::YELLOW, colors::RESET, warning);
    }

    let units = plan.index.units().count();
    if dry_run {
        for unit in plan.index.units() {
            println!(
                "{}{}{}  {} {:?}  {}  ({})",
                colors::DIM,
                unit.path,
                colors::RESET,
                unit.role,
                unit.entry,
                unit.title.as_deref().unwrap_or("(untitled)"),
                unit.document.display()
            );
        }
        println!("\n{units} units would be written (dry run)");
    } else {
        let layout = OutputLayout::new(out);
        let stats = extractor.write(&plan, &layout)?;
        println!(
            "{}Extracted{} {} units: {} written, {} unchanged, {} pruned",
            colors::GREEN,
            colors::RESET,
            units,
            stats.written,
            stats.unchanged,
            stats.pruned
        );
    }

    Ok(if plan.has_scan_errors() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
