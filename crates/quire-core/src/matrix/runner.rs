//! Subprocess pool for the version matrix.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};

use super::CancelToken;
use crate::config::ValidateConfig;
use crate::dialect::{Dialect, ModuleArg};
use crate::error::{Error, Result};
use crate::manifest::{ChapterManifest, TargetKind};
use crate::paths::OutputLayout;
use crate::toolchain::{TemplateVars, ToolchainVersion, expand};

/// Captured output kept per failed pair.
const DEFAULT_MAX_OUTPUT: usize = 64 * 1024;

/// Knobs for one matrix run.
#[derive(Debug, Clone)]
pub struct MatrixOptions {
    pub parallelism: usize,
    /// Per invocation.
    pub timeout: Duration,
    /// Extra attempts after a timeout.
    pub timeout_retries: u32,
    /// How long a killed process gets to be reaped.
    pub grace: Duration,
    pub max_output: usize,
}

impl MatrixOptions {
    pub fn from_config(config: &ValidateConfig) -> Self {
        let parallelism = config.parallelism.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        Self {
            parallelism: parallelism.max(1),
            timeout: Duration::from_secs(config.timeout_secs),
            timeout_retries: config.timeout_retries,
            grace: Duration::from_millis(config.grace_ms),
            max_output: DEFAULT_MAX_OUTPUT,
        }
    }
}

impl Default for MatrixOptions {
    fn default() -> Self {
        Self::from_config(&ValidateConfig::default())
    }
}

/// One (unit, toolchain) invocation, fully expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixJob {
    pub chapter: String,
    pub unit: String,
    pub target: TargetKind,
    /// Index into the toolchain list the jobs were planned with.
    pub toolchain: usize,
    pub advisory: bool,
    pub argv: Vec<String>,
    /// Working directory, private to this pair.
    pub scratch: PathBuf,
}

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
    },
    TimedOut,
    /// Killed because the run was cancelled.
    Cancelled,
    /// Never dispatched.
    NotStarted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub ending: Ending,
    /// Stdout followed by stderr of the last attempt.
    pub output: String,
    pub duration_ms: u64,
    pub attempts: u32,
}

impl RunRecord {
    fn not_started() -> Self {
        Self {
            ending: Ending::NotStarted,
            output: String::new(),
            duration_ms: 0,
            attempts: 0,
        }
    }
}

/// Expand every (unit, toolchain) pair of the given chapters into a job.
///
/// Jobs come out chapter by chapter, unit by unit, toolchain by toolchain.
pub fn plan_jobs(
    manifests: &[ChapterManifest],
    toolchains: &[ToolchainVersion],
    layout: &OutputLayout,
    dialect: &dyn Dialect,
) -> Result<Vec<MatrixJob>> {
    let mut jobs = Vec::new();
    for manifest in manifests {
        let chapter_dir = layout.chapter_dir(&manifest.chapter);
        for unit in &manifest.units {
            let unit_path = layout.resolve(&unit.path);
            let name = unit.file.trim_end_matches(&format!(".{}", manifest.extension));

            let closure: Vec<ModuleArg> = manifest
                .module_closure(unit)
                .into_iter()
                .map(|module| ModuleArg {
                    name: module.name.clone(),
                    path: chapter_dir.join(&module.path),
                    deps: module.deps.clone(),
                })
                .collect();
            let mut root_deps: Vec<String> = unit
                .imports
                .iter()
                .filter(|i| !i.source.is_std() && unit.module.as_deref() != Some(i.module.as_str()))
                .map(|i| i.module.clone())
                .collect();
            root_deps.sort();
            root_deps.dedup();
            let modules = dialect.module_args(&unit_path, &root_deps, &closure);

            for (index, toolchain) in toolchains.iter().enumerate() {
                let scratch = layout.scratch_for(&toolchain.name, &unit.id)?;
                let bin = toolchain.program_str();
                let vars = TemplateVars {
                    bin: &bin,
                    unit: &unit_path,
                    name,
                    chapter_dir: &chapter_dir,
                    scratch: &scratch,
                    version: &toolchain.name,
                    modules: &modules,
                };
                let argv = expand(toolchain.templates.for_kind(unit.target), &vars);
                if argv.is_empty() {
                    return Err(Error::Toolchain(format!(
                        "empty {} template for toolchain {}",
                        unit.target, toolchain.name
                    )));
                }
                jobs.push(MatrixJob {
                    chapter: manifest.chapter.clone(),
                    unit: unit.id.clone(),
                    target: unit.target,
                    toolchain: index,
                    advisory: manifest.is_advisory(&toolchain.name),
                    argv,
                    scratch,
                });
            }
        }
    }
    Ok(jobs)
}

/// Runs jobs on a bounded pool.
pub struct MatrixRunner {
    options: MatrixOptions,
}

impl MatrixRunner {
    pub fn new(options: MatrixOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &MatrixOptions {
        &self.options
    }

    /// Run every job and return one record per job, in job order.
    ///
    /// Cancellation stops dispatch and kills running subprocesses; their
    /// records say so. Only a failure to launch a subprocess is an error,
    /// and it aborts the remaining jobs.
    pub async fn run(
        &self,
        jobs: Vec<MatrixJob>,
        cancel: &CancelToken,
    ) -> Result<Vec<(MatrixJob, RunRecord)>> {
        let total = jobs.len();
        let semaphore = Arc::new(Semaphore::new(self.options.parallelism.max(1)));
        let mut set = JoinSet::new();

        for (slot, job) in jobs.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let options = self.options.clone();
            set.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let record = match permit {
                    Some(_permit) if !cancel.is_cancelled() => {
                        run_job(&job, &options, &cancel).await
                    }
                    _ => Ok(RunRecord::not_started()),
                };
                (slot, job, record)
            });
        }

        let mut finished = Vec::with_capacity(total);
        while let Some(joined) = set.join_next().await {
            let (slot, job, record) =
                joined.map_err(|e| Error::Toolchain(format!("matrix worker failed: {e}")))?;
            match record {
                Ok(record) => finished.push((slot, job, record)),
                Err(e) => {
                    set.abort_all();
                    return Err(e);
                }
            }
        }

        finished.sort_by_key(|(slot, _, _)| *slot);
        Ok(finished
            .into_iter()
            .map(|(_, job, record)| (job, record))
            .collect())
    }
}

async fn run_job(job: &MatrixJob, options: &MatrixOptions, cancel: &CancelToken) -> Result<RunRecord> {
    let start = Instant::now();
    let mut attempts = 0;
    loop {
        attempts += 1;
        let (ending, output) = run_attempt(job, options, cancel).await?;
        if ending == Ending::TimedOut && attempts <= options.timeout_retries && !cancel.is_cancelled() {
            tracing::info!(
                "{} timed out after {:?}, retrying ({}/{})",
                job.unit,
                options.timeout,
                attempts,
                options.timeout_retries
            );
            continue;
        }
        return Ok(RunRecord {
            ending,
            output,
            duration_ms: start.elapsed().as_millis() as u64,
            attempts,
        });
    }
}

enum Race {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

async fn run_attempt(
    job: &MatrixJob,
    options: &MatrixOptions,
    cancel: &CancelToken,
) -> Result<(Ending, String)> {
    let (program, args) = job
        .argv
        .split_first()
        .ok_or_else(|| Error::Toolchain(format!("empty command for {}", job.unit)))?;

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(&job.scratch)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own process group so a kill reaches everything the toolchain spawns.
    #[cfg(unix)]
    command.process_group(0);

    tracing::debug!("Running {}: {}", job.unit, job.argv.join(" "));
    let mut child = command
        .spawn()
        .map_err(|e| Error::Toolchain(format!("failed to launch `{program}` for {}: {e}", job.unit)))?;

    let limit = options.max_output;
    let stdout = child
        .stdout
        .take()
        .map(|pipe| tokio::spawn(read_pipe(pipe, limit, "stdout")));
    let stderr = child
        .stderr
        .take()
        .map(|pipe| tokio::spawn(read_pipe(pipe, limit, "stderr")));

    let race = tokio::select! {
        status = child.wait() => Race::Exited(status),
        _ = tokio::time::sleep(options.timeout) => Race::TimedOut,
        _ = cancel.cancelled() => Race::Cancelled,
    };

    let ending = match race {
        Race::Exited(status) => exit_ending(status?),
        Race::TimedOut => {
            terminate(&mut child, options.grace).await;
            Ending::TimedOut
        }
        Race::Cancelled => {
            terminate(&mut child, options.grace).await;
            Ending::Cancelled
        }
    };

    let mut output = collect(stdout, options.grace).await;
    output.extend(collect(stderr, options.grace).await);
    Ok((ending, String::from_utf8_lossy(&output).into_owned()))
}

/// Keep the first `limit` bytes of a pipe and drain the rest, so a chatty
/// child never blocks on a full pipe.
async fn read_pipe<R: AsyncRead + Unpin>(pipe: R, limit: usize, stream: &'static str) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut head = pipe.take(limit as u64);
    if let Err(e) = head.read_to_end(&mut buf).await {
        tracing::warn!("Failed to read child {}: {}", stream, e);
        return buf;
    }

    let mut rest = head.into_inner();
    match tokio::io::copy(&mut rest, &mut tokio::io::sink()).await {
        Ok(0) => {}
        Ok(dropped) => {
            buf.extend_from_slice(format!("\n[... {dropped} bytes of {stream} dropped]\n").as_bytes());
        }
        Err(e) => tracing::warn!("Failed to drain child {}: {}", stream, e),
    }
    buf
}

/// Pipes held open by stray descendants must not hang the pool.
async fn collect(handle: Option<JoinHandle<Vec<u8>>>, grace: Duration) -> Vec<u8> {
    let Some(mut handle) = handle else {
        return Vec::new();
    };
    match tokio::time::timeout(grace, &mut handle).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(_)) => Vec::new(),
        Err(_) => {
            handle.abort();
            Vec::new()
        }
    }
}

/// Kill the process group, then reap within the grace period.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // Negative pid addresses the group.
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
        }
    }
    let _ = child.start_kill();
    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        tracing::warn!("Process {:?} was not reaped within {:?}", child.id(), grace);
    }
}

fn exit_ending(status: ExitStatus) -> Ending {
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;
    Ending::Exited {
        code: status.code(),
        signal,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::dialect::ZigDialect;
    use crate::manifest::{BuildUnit, ManifestModule, ModuleProvenance};
    use crate::resolve::{ImportSource, ResolvedImport};
    use crate::toolchain::Templates;
    use tempfile::TempDir;

    fn options(timeout_ms: u64, retries: u32) -> MatrixOptions {
        MatrixOptions {
            parallelism: 2,
            timeout: Duration::from_millis(timeout_ms),
            timeout_retries: retries,
            grace: Duration::from_secs(2),
            max_output: 1024,
        }
    }

    fn job(scratch: &TempDir, argv: &[&str]) -> MatrixJob {
        MatrixJob {
            chapter: "ch".to_string(),
            unit: format!("ch/{}", argv.join("_")),
            target: TargetKind::Executable,
            toolchain: 0,
            advisory: false,
            argv: argv.iter().map(|a| a.to_string()).collect(),
            scratch: scratch.path().to_path_buf(),
        }
    }

    #[tokio::test]
    async fn test_exit_codes_and_output() {
        let scratch = TempDir::new().unwrap();
        let runner = MatrixRunner::new(options(10_000, 0));
        let jobs = vec![
            job(&scratch, &["true"]),
            job(&scratch, &["false"]),
            job(&scratch, &["sh", "-c", "echo out; echo err >&2; exit 3"]),
        ];

        let records = runner.run(jobs, &CancelToken::new()).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].1.ending, Ending::Exited { code: Some(0), signal: None });
        assert_eq!(records[1].1.ending, Ending::Exited { code: Some(1), signal: None });
        assert_eq!(records[2].1.ending, Ending::Exited { code: Some(3), signal: None });
        assert_eq!(records[2].1.output, "out\nerr\n");
        assert_eq!(records[2].0.argv[0], "sh");
    }

    #[tokio::test]
    async fn test_output_is_capped_while_reading() {
        let scratch = TempDir::new().unwrap();
        let runner = MatrixRunner::new(options(10_000, 0));
        let records = runner
            .run(
                vec![job(&scratch, &["sh", "-c", "yes x | head -c 100000; exit 1"])],
                &CancelToken::new(),
            )
            .await
            .unwrap();

        let record = &records[0].1;
        assert_eq!(record.ending, Ending::Exited { code: Some(1), signal: None });
        assert!(record.output.starts_with("x\nx\n"));
        assert!(record.output.contains("[... 98976 bytes of stdout dropped]"));
        assert!(record.output.len() < 2048);
    }

    #[tokio::test]
    async fn test_signal_is_reported() {
        let scratch = TempDir::new().unwrap();
        let runner = MatrixRunner::new(options(10_000, 0));
        let records = runner
            .run(vec![job(&scratch, &["sh", "-c", "kill -9 $$"])], &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(
            records[0].1.ending,
            Ending::Exited { code: None, signal: Some(9) }
        );
    }

    #[tokio::test]
    async fn test_timeout_is_retried() {
        let scratch = TempDir::new().unwrap();
        let runner = MatrixRunner::new(options(100, 1));
        let started = Instant::now();
        let records = runner
            .run(vec![job(&scratch, &["sleep", "30"])], &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(records[0].1.ending, Ending::TimedOut);
        assert_eq!(records[0].1.attempts, 2);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancel_before_dispatch() {
        let scratch = TempDir::new().unwrap();
        let runner = MatrixRunner::new(options(10_000, 0));
        let cancel = CancelToken::new();
        cancel.cancel();

        let records = runner
            .run(vec![job(&scratch, &["true"]), job(&scratch, &["false"])], &cancel)
            .await
            .unwrap();
        assert!(records.iter().all(|(_, r)| r.ending == Ending::NotStarted));
    }

    #[tokio::test]
    async fn test_cancel_kills_running_jobs() {
        let scratch = TempDir::new().unwrap();
        let runner = MatrixRunner::new(MatrixOptions {
            parallelism: 1,
            ..options(30_000, 0)
        });
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let records = runner
            .run(
                vec![job(&scratch, &["sleep", "30"]), job(&scratch, &["sleep", "31"])],
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(records[0].1.ending, Ending::Cancelled);
        assert_eq!(records[1].1.ending, Ending::NotStarted);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_binary_is_fatal() {
        let scratch = TempDir::new().unwrap();
        let runner = MatrixRunner::new(options(10_000, 0));
        let err = runner
            .run(
                vec![job(&scratch, &["quire-test-no-such-binary"])],
                &CancelToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Toolchain(_)));
    }

    #[tokio::test]
    async fn test_failing_executable_is_a_run_failure() {
        use crate::config::LanguageConfig;
        use crate::extract::ExtractIndex;
        use crate::matrix::{DiagnosticMapper, FailureKind, Outcome, classify_record};

        let temp = TempDir::new().unwrap();
        let layout = OutputLayout::new(temp.path());
        let dialect = ZigDialect::new().unwrap();
        let manifest = ChapterManifest {
            chapter: "ch".to_string(),
            extension: "zig".to_string(),
            units: vec![BuildUnit {
                id: "ch/001".to_string(),
                path: "ch/001.zig".to_string(),
                file: "001.zig".to_string(),
                target: TargetKind::Executable,
                module: None,
                imports: Vec::new(),
            }],
            modules: Vec::new(),
            advisory: Vec::new(),
        };
        // Default templates; `false` builds nothing and fails like a panicking main.
        let toolchain = ToolchainVersion {
            name: "0.15.2".to_string(),
            bin: "false".to_string(),
            program: None,
            required: true,
            templates: Templates {
                executable: dialect.default_template(TargetKind::Executable).to_string(),
                test: dialect.default_template(TargetKind::Test).to_string(),
                build_check: dialect.default_template(TargetKind::BuildCheck).to_string(),
            },
        };

        let jobs = plan_jobs(&[manifest], std::slice::from_ref(&toolchain), &layout, &dialect)
            .unwrap();
        assert_eq!(jobs[0].argv[..2], ["false".to_string(), "run".to_string()]);

        let runner = MatrixRunner::new(options(10_000, 0));
        let mut records = runner.run(jobs, &CancelToken::new()).await.unwrap();
        let (job, record) = records.remove(0);
        assert_eq!(record.ending, Ending::Exited { code: Some(1), signal: None });

        let index = ExtractIndex::new(LanguageConfig::default());
        let mapper = DiagnosticMapper::new(&layout, &index);
        let result = classify_record(&job, &toolchain, record, &dialect, &mapper, 1024);
        assert_eq!(result.outcome, Outcome::Fail { kind: FailureKind::Run });
        assert!(result.is_gating_failure());
    }

    #[test]
    fn test_plan_jobs_expands_templates() {
        let temp = TempDir::new().unwrap();
        let layout = OutputLayout::new(temp.path());
        let dialect = ZigDialect::new().unwrap();
        let manifest = ChapterManifest {
            chapter: "ch".to_string(),
            extension: "zig".to_string(),
            units: vec![BuildUnit {
                id: "ch/001".to_string(),
                path: "ch/001.zig".to_string(),
                file: "001.zig".to_string(),
                target: TargetKind::Test,
                module: None,
                imports: vec![ResolvedImport {
                    module: "widgets".to_string(),
                    source: ImportSource::Stub,
                }],
            }],
            modules: vec![ManifestModule {
                name: "widgets".to_string(),
                path: "stubs/widgets.zig".to_string(),
                provenance: ModuleProvenance::Stub,
                deps: Vec::new(),
            }],
            advisory: vec!["old".to_string()],
        };
        let toolchain = |name: &str| ToolchainVersion {
            name: name.to_string(),
            bin: "zig".to_string(),
            program: None,
            required: true,
            templates: Templates {
                executable: "{bin} run {unit}".to_string(),
                test: "{bin} test {modules} # {name}".to_string(),
                build_check: "{bin} check".to_string(),
            },
        };

        let jobs = plan_jobs(&[manifest], &[toolchain("new"), toolchain("old")], &layout, &dialect)
            .unwrap();
        assert_eq!(jobs.len(), 2);
        let chapter_dir = layout.chapter_dir("ch");
        assert_eq!(
            jobs[0].argv,
            vec![
                "zig".to_string(),
                "test".to_string(),
                "--dep".to_string(),
                "widgets".to_string(),
                format!("-Mroot={}", chapter_dir.join("001.zig").display()),
                format!("-Mwidgets={}", chapter_dir.join("stubs/widgets.zig").display()),
                "#".to_string(),
                "001".to_string(),
            ]
        );
        assert!(!jobs[0].advisory);
        assert!(jobs[1].advisory);
        assert_eq!(jobs[1].toolchain, 1);
        assert_ne!(jobs[0].scratch, jobs[1].scratch);
        assert!(jobs[0].scratch.is_dir());
    }
}
