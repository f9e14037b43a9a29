use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use texpreview_api_types::{ErrorResponse, messages};

use crate::{
    application::{error::ErrorReport, preview::PreviewError},
    domain::source::InputError,
};

const REPORT_SOURCE: &str = "infra::http::compile";

/// Error returned by the compile endpoints, rendered as an [`ErrorResponse`] body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: &'static str,
    details: Option<String>,
    report: ErrorReport,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        message: &'static str,
        details: Option<String>,
        diagnostic: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(
            REPORT_SOURCE,
            status,
            format!("{message}: {}", diagnostic.into()),
        );
        Self {
            status,
            message,
            details,
            report,
        }
    }

    pub fn unexpected(diagnostic: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            messages::UNEXPECTED,
            None,
            diagnostic,
        )
    }
}

impl From<PreviewError> for ApiError {
    fn from(error: PreviewError) -> Self {
        let (status, message, details) = match &error {
            PreviewError::Input(InputError::Empty) => {
                (StatusCode::BAD_REQUEST, messages::NO_SOURCE, None)
            }
            PreviewError::Input(InputError::TooLarge { .. }) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                messages::SOURCE_TOO_LARGE,
                None,
            ),
            PreviewError::Input(InputError::ContainsNul) => {
                (StatusCode::BAD_REQUEST, messages::SOURCE_HAS_NUL, None)
            }
            PreviewError::Compile { diagnostics } => (
                StatusCode::BAD_REQUEST,
                messages::COMPILATION_FAILED,
                Some(diagnostics.clone()),
            ),
            PreviewError::OutputMissing { diagnostics } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                messages::OUTPUT_MISSING,
                Some(diagnostics.clone()),
            ),
            PreviewError::TimedOut { .. } => (
                StatusCode::REQUEST_TIMEOUT,
                messages::COMPILATION_TIMED_OUT,
                None,
            ),
            PreviewError::Conversion(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                messages::CONVERSION_FAILED,
                Some(err.to_string()),
            ),
            // Internal detail stays in the logs.
            PreviewError::Unexpected(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, messages::UNEXPECTED, None)
            }
        };
        Self {
            status,
            message,
            details,
            report: ErrorReport::from_error(REPORT_SOURCE, status, &error),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let text = rejection.body_text();
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return Self::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                messages::SOURCE_TOO_LARGE,
                None,
                text,
            );
        }
        Self::new(
            StatusCode::BAD_REQUEST,
            messages::INVALID_BODY,
            Some(text.clone()),
            text,
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.details {
            Some(details) => ErrorResponse::with_details(self.message, details),
            None => ErrorResponse::new(self.message),
        };
        let mut response = (self.status, Json(body)).into_response();
        self.report.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::preview::ConversionError;
    use std::time::Duration;

    fn status_and_message(error: PreviewError) -> (StatusCode, &'static str) {
        let api = ApiError::from(error);
        (api.status, api.message)
    }

    #[test]
    fn preview_errors_map_to_documented_statuses() {
        assert_eq!(
            status_and_message(InputError::Empty.into()),
            (StatusCode::BAD_REQUEST, messages::NO_SOURCE)
        );
        assert_eq!(
            status_and_message(
                InputError::TooLarge {
                    limit: 1,
                    actual: 2
                }
                .into()
            ),
            (StatusCode::PAYLOAD_TOO_LARGE, messages::SOURCE_TOO_LARGE)
        );
        assert_eq!(
            status_and_message(PreviewError::Compile {
                diagnostics: "! Undefined control sequence.".to_string()
            }),
            (StatusCode::BAD_REQUEST, messages::COMPILATION_FAILED)
        );
        assert_eq!(
            status_and_message(PreviewError::OutputMissing {
                diagnostics: String::new()
            }),
            (StatusCode::INTERNAL_SERVER_ERROR, messages::OUTPUT_MISSING)
        );
        assert_eq!(
            status_and_message(PreviewError::TimedOut {
                limit: Duration::from_secs(1)
            }),
            (StatusCode::REQUEST_TIMEOUT, messages::COMPILATION_TIMED_OUT)
        );
        assert_eq!(
            status_and_message(PreviewError::Conversion(ConversionError::MissingOutput)),
            (StatusCode::INTERNAL_SERVER_ERROR, messages::CONVERSION_FAILED)
        );
    }

    #[test]
    fn unexpected_errors_hide_internal_detail() {
        let api = ApiError::from(PreviewError::Unexpected("disk full at /tmp".to_string()));
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.message, messages::UNEXPECTED);
        assert!(api.details.is_none());
    }

    #[test]
    fn report_keeps_the_error_chain() {
        let api = ApiError::from(PreviewError::Conversion(ConversionError::Rasterizer {
            exit_code: Some(99),
            stderr: "Syntax Error: Couldn't read xref table".to_string(),
        }));
        let response = api.into_response();
        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("report attached");

        assert_eq!(report.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(report.messages[0].contains("xref table"));
    }

    #[test]
    fn unexpected_detail_reaches_the_report_only() {
        let response =
            ApiError::from(PreviewError::Unexpected("disk full at /tmp".to_string())).into_response();
        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("report attached");
        assert_eq!(
            report.messages,
            vec!["unexpected error: disk full at /tmp".to_string()]
        );
    }

    #[test]
    fn response_carries_an_error_report() {
        let response = ApiError::from(PreviewError::Compile {
            diagnostics: "boom".to_string(),
        })
        .into_response();
        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("report attached");
        assert_eq!(report.status, StatusCode::BAD_REQUEST);
    }
}
