use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use tokio::process::Command;
use tracing::{info, warn};

use crate::infra::process::{ProcessError, ProcessOutcome, run_bounded};

/// Classified result of one compiler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    Succeeded { document: PathBuf },
    Failed {
        exit_code: Option<i32>,
        diagnostics: String,
    },
    /// The compiler reported success but the document is not on disk.
    OutputMissing { diagnostics: String },
    TimedOut { limit: Duration },
}

/// Runs a `pdflatex`-compatible compiler inside a job workspace.
#[derive(Debug, Clone)]
pub struct LatexCompiler {
    program: PathBuf,
}

impl LatexCompiler {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Compile `source` once, writing every artifact into `output_dir`.
    ///
    /// The expected document is `<output_dir>/<source stem>.pdf`.
    pub async fn compile(
        &self,
        source: &Path,
        output_dir: &Path,
        time_limit: Duration,
    ) -> Result<CompileOutcome, ProcessError> {
        let started_at = Instant::now();
        let document = expected_document(source, output_dir);

        let mut command = Command::new(&self.program);
        command
            .arg("-interaction=nonstopmode")
            .arg("-halt-on-error")
            .arg("-no-shell-escape")
            .arg("-output-directory")
            .arg(output_dir)
            .arg(source)
            .current_dir(output_dir);

        let output = match run_bounded(command, time_limit).await? {
            ProcessOutcome::Exited(output) => output,
            ProcessOutcome::TimedOut { elapsed } => {
                warn!(
                    target = "application::preview::compiler",
                    op = "compiler::compile",
                    result = "timed_out",
                    limit_ms = time_limit.as_millis() as u64,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Compiler exceeded its time limit"
                );
                return Ok(CompileOutcome::TimedOut { limit: time_limit });
            }
        };

        if !output.success() {
            let exit_code = output.exit_code();
            info!(
                target = "application::preview::compiler",
                op = "compiler::compile",
                result = "failed",
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "Compiler rejected the document"
            );
            return Ok(CompileOutcome::Failed {
                exit_code,
                diagnostics: output.combined_output(),
            });
        }

        if !tokio::fs::try_exists(&document).await.unwrap_or(false) {
            warn!(
                target = "application::preview::compiler",
                op = "compiler::compile",
                result = "output_missing",
                document = %document.display(),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "Compiler exited cleanly without producing a document"
            );
            return Ok(CompileOutcome::OutputMissing {
                diagnostics: output.combined_output(),
            });
        }

        info!(
            target = "application::preview::compiler",
            op = "compiler::compile",
            result = "succeeded",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            document = %document.display(),
            "Document compiled"
        );
        Ok(CompileOutcome::Succeeded { document })
    }
}

fn expected_document(source: &Path, output_dir: &Path) -> PathBuf {
    let mut name = source
        .file_stem()
        .unwrap_or(source.as_os_str())
        .to_os_string();
    name.push(".pdf");
    output_dir.join(name)
}
