//! Stage drivers over a persisted output tree.
//!
//! Each stage reads what the previous one wrote, so `resolve` and
//! `validate` can run in separate processes after `extract`.

use std::path::PathBuf;

use crate::config::QuireConfig;
use crate::dialect::dialect_for;
use crate::drift;
use crate::error::{Error, Result};
use crate::extract::ExtractIndex;
use crate::manifest::{synthesize, write_manifest};
use crate::matrix::{
    CancelToken, DiagnosticMapper, MatrixOptions, MatrixRunner, SkipReason, classify_record,
    plan_jobs, skipped_results,
};
use crate::paths::OutputLayout;
use crate::report::{Aggregator, Report};
use crate::resolve::{ChapterResolution, ResolveStats, Resolver, write_resolutions};
use crate::toolchain::select_toolchains;

/// What a resolve pass produced.
#[derive(Debug, Clone)]
pub struct ResolveOutcome {
    pub resolutions: Vec<ChapterResolution>,
    pub stats: ResolveStats,
}

impl ResolveOutcome {
    pub fn has_errors(&self) -> bool {
        self.resolutions.iter().any(|r| !r.is_ok())
    }
}

/// Resolve every chapter of an extracted tree and write stubs.
pub fn resolve(layout: &OutputLayout) -> Result<ResolveOutcome> {
    let index = ExtractIndex::load(layout)?;
    let language = &index.language;
    let dialect = dialect_for(&language.dialect)?;

    let resolver = Resolver::new(dialect.as_ref(), &language.stdlib, &language.extension);
    let resolutions = resolver.resolve_index(&index, layout)?;
    let stats = write_resolutions(&resolutions, layout, dialect.as_ref(), &language.extension)?;
    Ok(ResolveOutcome { resolutions, stats })
}

/// Inputs of a validate run beyond the configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidateRequest {
    /// Toolchain names; empty means every configured toolchain.
    pub toolchains: Vec<String>,
    pub options: MatrixOptions,
    /// Include drift findings against this corpus.
    pub corpus: Option<PathBuf>,
}

/// Synthesize manifests, run the version matrix and write `report.json`.
///
/// Every toolchain binary is located before anything runs. Chapters whose
/// resolution failed contribute skip records instead of jobs.
pub async fn validate(
    config: &QuireConfig,
    layout: &OutputLayout,
    request: &ValidateRequest,
    cancel: &CancelToken,
) -> Result<Report> {
    let index = ExtractIndex::load(layout)?;
    let dialect = dialect_for(&index.language.dialect)?;

    let mut toolchains = select_toolchains(config, &request.toolchains, dialect.as_ref())?;
    for toolchain in &mut toolchains {
        toolchain.locate()?;
    }

    let mut aggregator = Aggregator::new(&index, toolchains.iter().map(|t| t.name.clone()).collect());
    let mut manifests = Vec::new();
    let mut skipped = Vec::new();

    for (chapter, entry) in &index.chapters {
        let resolution = ChapterResolution::load(layout, chapter)?.ok_or_else(|| {
            Error::Index(format!(
                "no resolution for chapter {chapter}; run `quire resolve` first"
            ))
        })?;
        if !resolution.is_current(&entry.units) {
            return Err(Error::Index(format!(
                "resolution for chapter {chapter} is stale; run `quire resolve`"
            )));
        }
        aggregator.add_resolution(&resolution);

        let advisory = config.advisory_for(chapter);
        if resolution.is_ok() {
            let manifest = synthesize(entry, &resolution, &index.language.extension, advisory);
            write_manifest(layout, &manifest, dialect.as_ref())?;
            manifests.push(manifest);
        } else {
            tracing::warn!("Skipping unresolved chapter {}", chapter);
            skipped.extend(skipped_results(
                &entry.units,
                &toolchains,
                &advisory,
                SkipReason::ChapterUnresolved,
            ));
        }
    }

    layout.clean_scratch()?;
    let jobs = plan_jobs(&manifests, &toolchains, layout, dialect.as_ref())?;
    tracing::info!(
        "Running {} jobs across {} toolchains",
        jobs.len(),
        toolchains.len()
    );
    let runner = MatrixRunner::new(request.options.clone());
    let records = runner.run(jobs, cancel).await?;

    let mapper = DiagnosticMapper::new(layout, &index);
    let max_output = runner.options().max_output;
    aggregator.add_results(records.into_iter().map(|(job, record)| {
        classify_record(
            &job,
            &toolchains[job.toolchain],
            record,
            dialect.as_ref(),
            &mapper,
            max_output,
        )
    }));
    aggregator.add_results(skipped);

    if let Some(corpus) = &request.corpus {
        aggregator.set_drift(drift::detect(config, corpus, layout)?);
    }
    aggregator.set_cancelled(cancel.is_cancelled());

    let report = aggregator.finish();
    report.save(layout)?;
    Ok(report)
}
