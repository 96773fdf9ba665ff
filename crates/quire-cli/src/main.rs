//! Quire CLI - extract and validate the code examples of a book.

mod colors;
mod drift;
mod extract;
mod resolve;
mod scan;
mod validate;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "quire")]
#[command(about = "Extract, stub and validate the code examples of a book")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to quire.toml (default: looked up next to the corpus or output)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize the code blocks of every document
    Scan {
        /// Corpus root directory
        corpus: PathBuf,
    },

    /// Write runnable blocks as standalone unit files
    Extract {
        /// Corpus root directory
        corpus: PathBuf,

        /// Output directory
        out: PathBuf,

        /// Plan only; do not touch the output directory
        #[arg(long)]
        dry_run: bool,
    },

    /// Resolve imports and synthesize stub modules
    Resolve {
        /// Output directory of a previous extract
        out: PathBuf,
    },

    /// Build and run every unit against every toolchain version
    Validate {
        /// Output directory of a previous resolve
        out: PathBuf,

        /// Toolchain versions, comma separated (default: all configured)
        #[arg(long, value_delimiter = ',')]
        toolchains: Vec<String>,

        /// Per-invocation timeout: N, Ns, Nms or Nm
        #[arg(long, value_parser = validate::parse_timeout)]
        timeout: Option<Duration>,

        /// Maximum concurrent invocations
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        parallelism: Option<u64>,

        /// Also report drift against this corpus
        #[arg(long)]
        corpus: Option<PathBuf>,
    },

    /// Compare documents against the extracted units
    Drift {
        /// Corpus root directory
        corpus: PathBuf,

        /// Output directory of a previous extract
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    // Core errors carry recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(quire_err) = err.downcast_ref::<quire_core::Error>() {
            anyhow::anyhow!("{}", quire_err.with_hint())
        } else {
            err
        }
    };

    let config = cli.config.as_deref();
    let code = match cli.command {
        Commands::Scan { corpus } => scan::execute(&corpus, config).map_err(format_error)?,

        Commands::Extract {
            corpus,
            out,
            dry_run,
        } => extract::execute(&corpus, &out, dry_run, config).map_err(format_error)?,

        Commands::Resolve { out } => resolve::execute(&out).map_err(format_error)?,

        Commands::Validate {
            out,
            toolchains,
            timeout,
            parallelism,
            corpus,
        } => {
            let args = validate::ValidateArgs {
                out,
                toolchains,
                timeout,
                parallelism: parallelism.map(|p| p as usize),
                corpus,
            };
            validate::execute(args, config).await.map_err(format_error)?
        }

        Commands::Drift { corpus, out } => {
            drift::execute(&corpus, &out, config).map_err(format_error)?
        }
    };

    Ok(code)
}
