//! Error handling.

use axum::{
    extract::rejection::QueryRejection,
    http::header,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::error::Error;
use thiserror::Error;
use tokio::sync::AcquireError;
use tracing::{event, Level};

use crate::store::StoreError;

/// Sea level server error type
///
/// This type encapsulates the various errors that may occur while serving a request.
/// Each variant may result in a different API error response.
#[derive(Debug, Error)]
pub enum SeaLevelError {
    /// Error deserialising the query string
    #[error("request query is not valid")]
    RequestQueryRejection(#[from] QueryRejection),

    /// Error validating the query (single error)
    #[error("request query is not valid")]
    RequestQueryValidationSingle(#[from] validator::ValidationError),

    /// Error validating the query (multiple errors)
    #[error("request query is not valid")]
    RequestQueryValidation(#[from] validator::ValidationErrors),

    /// A date parameter could not be parsed
    #[error("invalid date {value}, expected YYYY-MM-DD")]
    InvalidDate { value: String },

    /// The start date is after the end date
    #[error("start date {start} is after end date {end}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },

    /// The requested date range is longer than allowed
    #[error("date range of {days} days exceeds the maximum of {max} days")]
    RangeTooLong { days: i64, max: i64 },

    /// A batch request named no stations
    #[error("no stations requested")]
    NoStations,

    /// The store could not be queried
    #[error("data unavailable")]
    DataUnavailable(#[from] StoreError),

    /// The query succeeded but matched no records
    #[error("no data found")]
    NoData,

    /// The pipeline did not finish within the request budget
    #[error("processing exceeded the time budget of {seconds} seconds")]
    ProcessingTimeout { seconds: u64 },

    /// Error acquiring a semaphore
    #[error("error acquiring resources")]
    SemaphoreAcquireError(#[from] AcquireError),

    /// A processing task panicked or was cancelled
    #[error("processing task failed")]
    TaskJoin(#[from] tokio::task::JoinError),

    /// Error serialising the response body
    #[error("failed to serialise response")]
    Serialisation(#[from] serde_json::Error),
}

impl IntoResponse for SeaLevelError {
    /// Convert from a `SeaLevelError` into an [axum::response::Response].
    fn into_response(self) -> Response {
        ErrorResponse::from(self).into_response()
    }
}

/// Body of error response
///
/// Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
struct ErrorBody {
    /// Main error message
    message: String,

    /// Optional list of causes
    #[serde(skip_serializing_if = "Option::is_none")]
    caused_by: Option<Vec<String>>,
}

impl ErrorBody {
    /// Return a new ErrorBody
    ///
    /// # Arguments
    ///
    /// * `error`: The error that occurred
    fn new<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        let message = error.to_string();
        let mut caused_by = None;
        let mut current = error.source();
        while let Some(source) = current {
            let mut causes: Vec<String> = caused_by.unwrap_or_default();
            causes.push(source.to_string());
            caused_by = Some(causes);
            current = source.source();
        }
        // Remove duplicate entries.
        if let Some(caused_by) = caused_by.as_mut() {
            caused_by.dedup()
        }
        ErrorBody { message, caused_by }
    }
}

/// A response to send in error cases
///
/// Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
struct ErrorResponse {
    /// HTTP status of the response
    #[serde(skip)]
    status: StatusCode,

    /// Response body
    error: ErrorBody,
}

impl ErrorResponse {
    /// Return a new ErrorResponse
    ///
    /// # Arguments
    ///
    /// * `status`: HTTP status of the response
    /// * `error`: The error that occurred. This will be formatted into a suitable `ErrorBody`
    fn new<E>(status: StatusCode, error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        ErrorResponse {
            status,
            error: ErrorBody::new(error),
        }
    }

    /// Return a 400 bad request ErrorResponse
    fn bad_request<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    /// Return a 404 not found ErrorResponse
    fn not_found<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::NOT_FOUND, error)
    }

    /// Return a 408 request timeout ErrorResponse
    fn request_timeout<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::REQUEST_TIMEOUT, error)
    }

    /// Return a 500 internal server error ErrorResponse
    fn internal_server_error<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }
}

impl From<SeaLevelError> for ErrorResponse {
    /// Convert from a `SeaLevelError` into an `ErrorResponse`.
    fn from(error: SeaLevelError) -> Self {
        let response = match &error {
            // Bad request
            SeaLevelError::RequestQueryRejection(_)
            | SeaLevelError::RequestQueryValidationSingle(_)
            | SeaLevelError::RequestQueryValidation(_)
            | SeaLevelError::InvalidDate { value: _ }
            | SeaLevelError::InvertedRange { start: _, end: _ }
            | SeaLevelError::RangeTooLong { days: _, max: _ }
            | SeaLevelError::NoStations => Self::bad_request(&error),

            // Not found
            SeaLevelError::DataUnavailable(_) | SeaLevelError::NoData => Self::not_found(&error),

            // Request timeout
            SeaLevelError::ProcessingTimeout { seconds: _ } => Self::request_timeout(&error),

            // Internal server error
            SeaLevelError::SemaphoreAcquireError(_)
            | SeaLevelError::TaskJoin(_)
            | SeaLevelError::Serialisation(_) => Self::internal_server_error(&error),
        };

        // Log server errors, and store failures which are reported to clients as 404.
        if response.status.is_server_error() || matches!(error, SeaLevelError::DataUnavailable(_))
        {
            event!(Level::ERROR, "{}", error.to_string());
            let mut current = error.source();
            while let Some(source) = current {
                event!(Level::ERROR, "Caused by: {}", source.to_string());
                current = source.source();
            }
        }

        response
    }
}

impl IntoResponse for ErrorResponse {
    /// Convert from an `ErrorResponse` into an `axum::response::Response`.
    ///
    /// Renders the response as JSON.
    fn into_response(self) -> Response {
        let json_body = serde_json::to_string_pretty(&self);
        match json_body {
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to serialise error response: {}", err),
            )
                .into_response(),
            Ok(json_body) => (
                self.status,
                [(&header::CONTENT_TYPE, mime::APPLICATION_JSON.to_string())],
                json_body,
            )
                .into_response(),
        }
    }
}
