//! Error types for labflow-sub
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation. Domain failures keep their own variants so the API layer can
//! map them to distinct status codes instead of a generic failure.

use crate::domain::request::RequestState;
use serde::Serialize;
use thiserror::Error;

/// A single structured validation failure, as a field/message pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Accumulated validation failures from a submission build or guard check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    pub errors: Vec<ValidationError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError::new(field, message));
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Return Err(Error::Validation) if any errors have accumulated
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(self))
        }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for e in &self.errors {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", e.field, e.message)?;
            first = false;
        }
        Ok(())
    }
}

/// Main error type for labflow-sub
#[derive(Error, Debug)]
pub enum Error {
    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Recoverable validation failures, reported as field/message pairs
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// Illegal request state transition; the request is left unchanged
    #[error("Invalid transition: cannot {action} request {request_id} in state {state}")]
    InvalidTransition {
        request_id: i64,
        state: RequestState,
        action: &'static str,
    },

    /// Downstream resolution called with a request from another submission
    #[error("Request {request_id} is not part of submission {submission_id}")]
    ForeignRequest {
        request_id: i64,
        submission_id: i64,
    },

    /// Orders disagree on the divergence ratio for a stage transition
    #[error("Mismatched multiplier information for submission {submission_id}")]
    MismatchedMultiplier { submission_id: i64 },

    /// Destruction guard: submissions are only destroyable while building
    #[error("Submission {submission_id} can only be destroyed when in the 'building' stage; later submissions should be cancelled")]
    NotBuilding { submission_id: i64 },

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using labflow-sub Error
pub type Result<T> = std::result::Result<T, Error>;
