//! Compilation jobs and their lifecycle.

use std::fmt;

use uuid::Uuid;

use super::{error::DomainError, source::SourceText};

/// Opaque, randomly generated job identifier.
///
/// Rendered as 32 lowercase hex digits so it can be embedded in file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    Compiling,
    Converting,
    Succeeded,
    CompileFailed,
    OutputMissing,
    ConversionFailed,
    TimedOut,
    UnexpectedError,
}

impl JobStatus {
    pub const TERMINAL: [JobStatus; 6] = [
        JobStatus::Succeeded,
        JobStatus::CompileFailed,
        JobStatus::OutputMissing,
        JobStatus::ConversionFailed,
        JobStatus::TimedOut,
        JobStatus::UnexpectedError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Compiling => "compiling",
            JobStatus::Converting => "converting",
            JobStatus::Succeeded => "succeeded",
            JobStatus::CompileFailed => "compile_failed",
            JobStatus::OutputMissing => "output_missing",
            JobStatus::ConversionFailed => "conversion_failed",
            JobStatus::TimedOut => "timed_out",
            JobStatus::UnexpectedError => "unexpected_error",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            JobStatus::Pending | JobStatus::Compiling | JobStatus::Converting
        )
    }

    fn can_advance_to(self, next: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, next),
            (Pending, Compiling | UnexpectedError)
                | (
                    Compiling,
                    Converting | CompileFailed | OutputMissing | TimedOut | UnexpectedError
                )
                | (Converting, Succeeded | ConversionFailed | UnexpectedError)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request's unit of work. Lives only as long as the request that created it.
#[derive(Debug)]
pub struct CompilationJob {
    id: JobId,
    source: SourceText,
    status: JobStatus,
    diagnostics: Option<String>,
}

impl CompilationJob {
    pub fn new(id: JobId, source: SourceText) -> Self {
        Self {
            id,
            source,
            status: JobStatus::Pending,
            diagnostics: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn source(&self) -> &SourceText {
        &self.source
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn diagnostics(&self) -> Option<&str> {
        self.diagnostics.as_deref()
    }

    /// Move the job along one edge of the lifecycle.
    pub fn advance(&mut self, next: JobStatus) -> Result<(), DomainError> {
        if !self.status.can_advance_to(next) {
            return Err(DomainError::invariant(format!(
                "job {} cannot move from `{}` to `{}`",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Move into a failure state, keeping the external tool's output for reporting.
    pub fn fail(
        &mut self,
        next: JobStatus,
        diagnostics: impl Into<String>,
    ) -> Result<(), DomainError> {
        self.advance(next)?;
        self.diagnostics = Some(diagnostics.into());
        Ok(())
    }
}
