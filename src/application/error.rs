use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    cache::{ManagerError, StorageError},
    config::LoadError,
    infra::error::InfraError,
};

/// Diagnostic detail carried in response extensions for the logging middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// An error response with a fixed public message and a private report.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            status,
            public_message,
            report: ErrorReport::from_message(source, status, detail),
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        Self {
            status,
            public_message,
            report: ErrorReport::from_error(source, status, error),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

impl From<ManagerError> for HttpError {
    fn from(error: ManagerError) -> Self {
        match error {
            ManagerError::Fetch(err) => HttpError::from_error(
                "infra::http::manager_error_to_http_error",
                StatusCode::BAD_GATEWAY,
                "Origin unreachable",
                &err,
            ),
            other => HttpError::from_error(
                "infra::http::manager_error_to_http_error",
                StatusCode::SERVICE_UNAVAILABLE,
                "Cache unavailable",
                &other,
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Cache(#[from] ManagerError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use crate::cache::FetchError;

    use super::*;

    #[test]
    fn report_walks_source_chain() {
        let error = crate::cache::InstallError::Network {
            path: "/".to_string(),
            source: FetchError::new("https://m0rtyn.cc/", "connection refused"),
        };
        let report = ErrorReport::from_error("test", StatusCode::BAD_GATEWAY, &error);

        assert_eq!(report.messages.len(), 2);
        assert!(report.messages[1].contains("connection refused"));
    }

    #[test]
    fn network_failures_map_to_bad_gateway() {
        let error = ManagerError::Fetch(FetchError::new("https://m0rtyn.cc/a.js", "reset"));
        let response = HttpError::from(error).into_response();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(response.extensions().get::<ErrorReport>().is_some());
    }

    #[test]
    fn lifecycle_errors_map_to_service_unavailable() {
        let error = ManagerError::InvalidState {
            op: "handle_fetch",
            state: crate::cache::WorkerState::Installing,
        };
        assert_eq!(
            HttpError::from(error).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
