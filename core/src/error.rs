//! Error types for the CouchDB client.
//!
//! # Design
//! Every server-side failure maps to exactly one variant, chosen from the
//! response status by `CouchError::from_response`. The status-carrying
//! variants keep the status code and a message built from the response body
//! plus the method and URL that produced it, so a bare `Display` is enough to
//! find the failing call in a log.
//!
//! Callers that want to recover from a specific status match on the variant
//! (`Database::get_document_by_id` does this for `NotFound`).

use thiserror::Error;

use crate::http::{HttpMethod, HttpResponse};

pub type Result<T> = std::result::Result<T, CouchError>;

/// Errors returned by `Client`, `Server` and `Database` operations.
#[derive(Debug, Error)]
pub enum CouchError {
    /// An argument was rejected before any request was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The document is not in a state that allows the operation.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("unauthorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("forbidden ({status}): {message}")]
    Forbidden { status: u16, message: String },

    #[error("not found ({status}): {message}")]
    NotFound { status: u16, message: String },

    #[error("conflict ({status}): {message}")]
    Conflict { status: u16, message: String },

    #[error("expectation failed ({status}): {message}")]
    Expectation { status: u16, message: String },

    /// Any unexpected status without a dedicated variant.
    #[error("HTTP {status}: {message}")]
    Generic { status: u16, message: String },

    /// The transport produced no response at all.
    #[error("no response from server - {message}")]
    NoResponse { message: String },

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The response body could not be deserialized into the expected type.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// `POST /_session` succeeded but did not hand out an `AuthSession` cookie.
    #[error("no AuthSession cookie in response to {0}")]
    MissingSessionCookie(String),
}

impl CouchError {
    /// Build the error for a call whose response did not carry an expected
    /// status. `None` means the transport never produced a response.
    pub fn from_response(response: Option<&HttpResponse>, method: HttpMethod, url: &str) -> Self {
        let Some(response) = response else {
            return CouchError::NoResponse {
                message: format!("{method} {url}"),
            };
        };

        let message = if response.body.trim().is_empty() {
            format!("{method} {url}")
        } else {
            format!("{} ({method} {url})", response.body.trim_end())
        };
        let status = response.status;

        match status {
            401 => CouchError::Unauthorized { status, message },
            403 => CouchError::Forbidden { status, message },
            404 => CouchError::NotFound { status, message },
            409 => CouchError::Conflict { status, message },
            417 => CouchError::Expectation { status, message },
            _ => CouchError::Generic { status, message },
        }
    }

    /// HTTP status behind this error, if it came from a server response.
    pub fn status(&self) -> Option<u16> {
        match self {
            CouchError::Unauthorized { status, .. }
            | CouchError::Forbidden { status, .. }
            | CouchError::NotFound { status, .. }
            | CouchError::Conflict { status, .. }
            | CouchError::Expectation { status, .. }
            | CouchError::Generic { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CouchError::NotFound { .. })
    }
}
