//! Source-to-PNG preview pipeline.
//!
//! One call to [`PreviewService::render`] is one job: validate the source, allocate a
//! workspace, compile once, rasterize page 1, and tear the workspace down again whatever
//! happened on the way.

mod compiler;
mod raster;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{info, warn};

pub use compiler::{CompileOutcome, LatexCompiler};
pub use raster::{ConversionError, PNG_SIGNATURE, PageRasterizer, RasterImage};

use crate::{
    config::Settings,
    domain::{
        error::DomainError,
        job::{CompilationJob, JobId, JobStatus},
        source::{InputError, SourceText},
    },
    infra::{
        error::InfraError,
        process::ProcessError,
        workspace::{Workspace, WorkspaceError, WorkspaceManager},
    },
};

pub const METRIC_JOBS_TOTAL: &str = "texpreview_jobs_total";
pub const METRIC_JOB_MS: &str = "texpreview_job_ms";
pub const METRIC_COMPILE_MS: &str = "texpreview_compile_ms";
pub const METRIC_REJECTED_TOTAL: &str = "texpreview_rejected_total";

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("compilation failed")]
    Compile { diagnostics: String },
    #[error("compiler reported success but no document was written")]
    OutputMissing { diagnostics: String },
    #[error("compilation timed out after {limit:?}")]
    TimedOut { limit: Duration },
    #[error("conversion failed: {0}")]
    Conversion(ConversionError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl PreviewError {
    fn unexpected(error: impl std::fmt::Display) -> Self {
        Self::Unexpected(error.to_string())
    }
}

impl From<WorkspaceError> for PreviewError {
    fn from(error: WorkspaceError) -> Self {
        Self::unexpected(error)
    }
}

impl From<ProcessError> for PreviewError {
    fn from(error: ProcessError) -> Self {
        Self::unexpected(error)
    }
}

impl From<DomainError> for PreviewError {
    fn from(error: DomainError) -> Self {
        Self::unexpected(error)
    }
}

/// Knobs of the pipeline that come from configuration.
#[derive(Debug, Clone, Copy)]
pub struct PreviewLimits {
    pub compile_timeout: Duration,
    pub dpi: u32,
    pub max_source_bytes: usize,
}

/// Result of a successful job.
#[derive(Debug, Clone)]
pub struct Preview {
    pub job_id: JobId,
    pub image: RasterImage,
}

pub struct PreviewService {
    workspaces: WorkspaceManager,
    compiler: LatexCompiler,
    rasterizer: PageRasterizer,
    limits: PreviewLimits,
}

impl PreviewService {
    pub fn new(
        workspaces: WorkspaceManager,
        compiler: LatexCompiler,
        rasterizer: PageRasterizer,
        limits: PreviewLimits,
    ) -> Self {
        Self {
            workspaces,
            compiler,
            rasterizer,
            limits,
        }
    }

    /// Build the pipeline from resolved settings, creating the scratch root if needed.
    pub fn from_settings(settings: &Settings) -> Result<Arc<Self>, InfraError> {
        let workspaces = WorkspaceManager::new(settings.workspace.scratch_dir.clone())?;
        let compiler = LatexCompiler::new(settings.compiler.program.clone());
        let rasterizer = PageRasterizer::new(
            settings.rasterizer.program.clone(),
            settings.rasterizer.timeout,
        );
        let limits = PreviewLimits {
            compile_timeout: settings.compiler.timeout,
            dpi: settings.rasterizer.dpi,
            max_source_bytes: usize::try_from(settings.compiler.max_source_bytes.get())
                .unwrap_or(usize::MAX),
        };
        Ok(Arc::new(Self::new(workspaces, compiler, rasterizer, limits)))
    }

    pub fn limits(&self) -> PreviewLimits {
        self.limits
    }

    /// Run one job for `source`.
    ///
    /// Input errors are returned before any workspace exists. Every other path releases
    /// the workspace before returning; if the future is dropped mid-way the workspace
    /// handle's destructor does the same.
    pub async fn render(&self, source: String) -> Result<Preview, PreviewError> {
        let source = match SourceText::parse(source, self.limits.max_source_bytes) {
            Ok(source) => source,
            Err(err) => {
                counter!(METRIC_REJECTED_TOTAL, "reason" => rejection_reason(&err)).increment(1);
                info!(
                    target = "application::preview",
                    op = "preview::render",
                    result = "rejected",
                    reason = %err,
                    "Source rejected before allocating a workspace"
                );
                return Err(err.into());
            }
        };

        let started_at = Instant::now();
        let workspace = match self.workspaces.allocate().await {
            Ok(workspace) => workspace,
            Err(err) => {
                record_outcome(JobStatus::UnexpectedError, started_at);
                warn!(
                    target = "application::preview",
                    op = "preview::render",
                    result = "error",
                    error_code = "workspace_allocate",
                    error = %err,
                    "Failed to allocate a workspace"
                );
                return Err(err.into());
            }
        };

        let mut job = CompilationJob::new(workspace.id(), source);
        let result = self.run(&mut job, &workspace).await;

        if let Err(err) = &result {
            if !job.status().is_terminal() {
                if let Err(invariant) = job.fail(JobStatus::UnexpectedError, err.to_string()) {
                    warn!(
                        target = "application::preview",
                        job_id = %job.id(),
                        error = %invariant,
                        "Could not record unexpected failure on job"
                    );
                }
            }
        }

        let cleanup = workspace.release().await;
        let status = job.status();
        record_outcome(status, started_at);

        info!(
            target = "application::preview",
            op = "preview::render",
            job_id = %job.id(),
            result = status.as_str(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            files_removed = cleanup.removed,
            cleanup_failures = cleanup.failed,
            diagnostics_bytes = job.diagnostics().map(str::len).unwrap_or(0),
            "Job finished"
        );

        result.map(|image| Preview {
            job_id: job.id(),
            image,
        })
    }

    async fn run(
        &self,
        job: &mut CompilationJob,
        workspace: &Workspace,
    ) -> Result<RasterImage, PreviewError> {
        let paths = workspace.paths();
        workspace.write_source(job.source()).await?;

        job.advance(JobStatus::Compiling)?;
        let compile_started_at = Instant::now();
        let outcome = self
            .compiler
            .compile(paths.source(), paths.dir(), self.limits.compile_timeout)
            .await;
        histogram!(METRIC_COMPILE_MS).record(compile_started_at.elapsed().as_secs_f64() * 1000.0);

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                if err.is_not_found() {
                    warn!(
                        target = "application::preview",
                        op = "preview::run",
                        job_id = %job.id(),
                        error_code = "compiler_missing",
                        program = %self.compiler.program().display(),
                        "Compiler binary not found"
                    );
                }
                return Err(err.into());
            }
        };

        let document = match outcome {
            CompileOutcome::Succeeded { document } => document,
            CompileOutcome::Failed { diagnostics, .. } => {
                job.fail(JobStatus::CompileFailed, diagnostics.clone())?;
                return Err(PreviewError::Compile { diagnostics });
            }
            CompileOutcome::OutputMissing { diagnostics } => {
                job.fail(JobStatus::OutputMissing, diagnostics.clone())?;
                return Err(PreviewError::OutputMissing { diagnostics });
            }
            CompileOutcome::TimedOut { limit } => {
                job.fail(JobStatus::TimedOut, format!("killed after {limit:?}"))?;
                return Err(PreviewError::TimedOut { limit });
            }
        };

        job.advance(JobStatus::Converting)?;
        match self
            .rasterizer
            .render_first_page(&document, self.limits.dpi)
            .await
        {
            Ok(image) => {
                job.advance(JobStatus::Succeeded)?;
                Ok(image)
            }
            Err(ConversionError::Process(err)) => Err(err.into()),
            Err(err) => {
                job.fail(JobStatus::ConversionFailed, err.to_string())?;
                Err(PreviewError::Conversion(err))
            }
        }
    }
}

fn record_outcome(status: JobStatus, started_at: Instant) {
    counter!(METRIC_JOBS_TOTAL, "outcome" => status.as_str()).increment(1);
    histogram!(METRIC_JOB_MS, "outcome" => status.as_str())
        .record(started_at.elapsed().as_secs_f64() * 1000.0);
}

fn rejection_reason(error: &InputError) -> &'static str {
    match error {
        InputError::Empty => "empty",
        InputError::TooLarge { .. } => "too_large",
        InputError::ContainsNul => "contains_nul",
    }
}
