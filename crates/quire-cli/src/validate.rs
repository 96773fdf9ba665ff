//! Validate command implementation.
//!
//! Runs the version matrix over a resolved output tree and writes
//! `report.json`. Ctrl-C cancels the run; the partial report is still
//! written.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use quire_core::report::render_summary;
use quire_core::{CancelToken, Error, MatrixOptions, OutputLayout, QuireConfig, ValidateRequest, pipeline};

use crate::colors;

pub struct ValidateArgs {
    pub out: PathBuf,
    pub toolchains: Vec<String>,
    pub timeout: Option<Duration>,
    pub parallelism: Option<usize>,
    pub corpus: Option<PathBuf>,
}

pub async fn execute(args: ValidateArgs, config_path: Option<&Path>) -> anyhow::Result<ExitCode> {
    let start = Instant::now();
    let mut candidates: Vec<&Path> = Vec::new();
    if let Some(corpus) = &args.corpus {
        candidates.push(corpus);
    }
    candidates.push(&args.out);
    let config = QuireConfig::discover(config_path, &candidates)?;

    let mut options = MatrixOptions::from_config(&config.validate);
    if let Some(timeout) = args.timeout {
        options.timeout = timeout;
    }
    if let Some(parallelism) = args.parallelism {
        options.parallelism = parallelism;
    }

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}Cancelling...{}", colors::YELLOW, colors::RESET);
            on_signal.cancel();
        }
    });

    let request = ValidateRequest {
        toolchains: args.toolchains,
        options,
        corpus: args.corpus,
    };
    let layout = OutputLayout::new(&args.out);
    let report = pipeline::validate(&config, &layout, &request, &cancel).await?;

    println!("{}", render_summary(&report));
    if report.cancelled {
        println!("{}{}{}: partial report written", colors::YELLOW, Error::Cancelled, colors::RESET);
    }
    println!(
        "{}{}Verdict: {}{} ({:.2}s, report: {})",
        colors::BOLD,
        colors::status(report.verdict.is_pass()),
        report.verdict,
        colors::RESET,
        start.elapsed().as_secs_f64(),
        layout.report_path().display()
    );

    Ok(if report.verdict.is_pass() && !report.cancelled {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Parse `N` (seconds), `Ns`, `Nms` or `Nm`.
pub fn parse_timeout(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let (digits, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(split) => value.split_at(split),
        None => (value, "s"),
    };
    let amount: u64 = digits
        .parse()
        .map_err(|_| format!("invalid timeout `{value}`: expected N, Ns, Nms or Nm"))?;
    let duration = match unit {
        "s" => Duration::from_secs(amount),
        "ms" => Duration::from_millis(amount),
        "m" => Duration::from_secs(amount * 60),
        _ => return Err(format!("invalid timeout unit `{unit}`: expected s, ms or m")),
    };
    if duration.is_zero() {
        return Err("timeout must be greater than zero".to_string());
    }
    Ok(duration)
}
