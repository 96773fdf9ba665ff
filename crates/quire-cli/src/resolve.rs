//! Resolve command implementation.

use std::path::Path;
use std::process::ExitCode;

use quire_core::{OutputLayout, pipeline};

use crate::colors;

/// Resolve imports; exits non-zero on conflicts or resolution errors.
pub fn execute(out: &Path) -> anyhow::Result<ExitCode> {
    let layout = OutputLayout::new(out);
    let outcome = pipeline::resolve(&layout)?;

    for resolution in &outcome.resolutions {
        let stubs: Vec<&str> = resolution.stubs.iter().map(|s| s.module.as_str()).collect();
        if resolution.is_ok() {
            print!("{}ok{}     {}", colors::GREEN, colors::RESET, resolution.chapter);
            if !stubs.is_empty() {
                print!("  {}stubs: {}{}", colors::DIM, stubs.join(", "), colors::RESET);
            }
            println!();
        } else {
            println!("{}failed{} {}", colors::RED, colors::RESET, resolution.chapter);
            for error in &resolution.errors {
                println!("  {}error:{} {}", colors::RED, colors::RESET, error);
            }
        }
        for warning in &resolution.warnings {
            println!("  {}warning:{} {}", colors::YELLOW, colors::RESET, warning);
        }
    }

    let stats = outcome.stats;
    println!(
        "\n{}{} chapters, {} failed, {} stubs written, {} pruned{}",
        colors::status(stats.failed_chapters == 0),
        stats.chapters,
        stats.failed_chapters,
        stats.stubs_written,
        stats.stubs_pruned,
        colors::RESET
    );

    Ok(if outcome.has_errors() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
