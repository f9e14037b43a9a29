//! Request and response shapes shared by the texpreview server and its CLI client.

use serde::{Deserialize, Serialize};

/// Body of `POST /compile`.
///
/// A missing `source` field deserializes to an empty string so the server can answer it
/// with the same "no source provided" error as an explicitly empty one. `latex_code` is
/// accepted as an alias for older clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileRequest {
    #[serde(default, alias = "latex_code")]
    pub source: String,
}

impl CompileRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

/// Successful compile: the first page as a base64-encoded PNG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileResponse {
    pub image: String,
}

/// Error envelope returned with every non-2xx status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// Public error messages. Clients may match on these strings.
pub mod messages {
    pub const NO_SOURCE: &str = "no source provided";
    pub const SOURCE_TOO_LARGE: &str = "source too large";
    pub const SOURCE_HAS_NUL: &str = "source contains NUL characters";
    pub const INVALID_BODY: &str = "invalid request body";
    pub const COMPILATION_FAILED: &str = "compilation failed";
    pub const COMPILATION_TIMED_OUT: &str = "compilation timed out";
    pub const OUTPUT_MISSING: &str = "output document missing";
    pub const CONVERSION_FAILED: &str = "conversion failed";
    pub const UNEXPECTED: &str = "unexpected server error";
}

/// Body served by the liveness probe.
pub const HEALTH_MESSAGE: &str = "texpreview is running";
