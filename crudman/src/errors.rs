//! # Error Handling
//!
//! Two kinds of failure flow through the engine:
//!
//! - **Collected errors** ([`ErrorEntry`]): validation, uniqueness and upload problems. They are
//!   gathered into a list and always resolve to a `success: false` envelope with an HTTP success
//!   status.
//! - **Raised errors** ([`CrudError`]): configuration problems (missing repository, missing storage
//!   backend, unknown section), database failures and other internal faults. They propagate with
//!   `?` and render as a sanitized failure envelope.
//!
//! Internal details (database messages, I/O errors) are logged through `tracing` and never sent to
//! clients.
//!
//! ```rust,ignore
//! use crudman::CrudError;
//!
//! let record = adapter
//!     .details(&id, &descriptor)
//!     .await?
//!     .ok_or_else(|| CrudError::not_found("Company", Some(id.to_string())))?;
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::response::Envelope;

/// A single collected error, as it appears in the `errors` array of an envelope.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorEntry {
    /// Offending request field, when the error is tied to one.
    pub field: Option<String>,
    /// Machine-readable error kind (`unique`, `fileExtension`, `required`, ...).
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub message: String,
}

impl ErrorEntry {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            field: None,
            kind: None,
            message: message.into(),
        }
    }

    pub fn for_field(
        field: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: Some(field.into()),
            kind: Some(kind.into()),
            message: message.into(),
        }
    }
}

/// Failures raised by upload storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("could not decode payload: {0}")]
    Decode(String),

    #[error("storage backend does not support {0}")]
    Unsupported(&'static str),
}

/// Raised error type for every engine operation.
///
/// `Display` yields the sanitized, user-facing message.
#[derive(Debug, thiserror::Error)]
pub enum CrudError {
    /// No repository or connection was supplied for a section.
    #[error("Repository not provided")]
    RepositoryUnavailable { section: String },

    /// The requested section is not registered.
    #[error("Invalid section")]
    SectionNotFound { section: String },

    /// The action exists but was not enabled for this section.
    #[error("Action '{action}' is not enabled for '{section}'")]
    ActionDisabled { section: String, action: String },

    /// An upload entry names a storage backend that was never registered.
    #[error("Storage backend '{name}' is not configured")]
    MissingStorageBackend { name: String },

    #[error("{}", not_found_message(.resource, .id.as_deref()))]
    NotFound { resource: String, id: Option<String> },

    #[error("{message}")]
    BadRequest { message: String },

    #[error("{message}")]
    Unauthorized { message: String },

    #[error("{message}")]
    Forbidden { message: String },

    #[error("{message}")]
    Conflict { message: String },

    /// Details logged, generic message returned.
    #[error("A database error occurred")]
    Database(DbErr),

    #[error("A storage error occurred")]
    Storage(#[from] StorageError),

    /// Export capability missing or failing. Rendered with an HTTP success status.
    #[error("{message}")]
    Export { message: String },

    #[error("{message}")]
    Internal {
        message: String,
        internal: Option<String>,
    },

    #[error("{message}")]
    Custom {
        status: StatusCode,
        message: String,
        internal: Option<String>,
    },
}

fn not_found_message(resource: &str, id: Option<&str>) -> String {
    match id {
        Some(id) => format!("{resource} with ID '{id}' not found"),
        None => format!("{resource} not found"),
    }
}

impl CrudError {
    // ============================================================================
    // Constructors
    // ============================================================================

    pub fn repository_unavailable(section: impl Into<String>) -> Self {
        Self::RepositoryUnavailable {
            section: section.into(),
        }
    }

    pub fn section_not_found(section: impl Into<String>) -> Self {
        Self::SectionNotFound {
            section: section.into(),
        }
    }

    pub fn missing_storage(name: impl Into<String>) -> Self {
        Self::MissingStorageBackend { name: name.into() }
    }

    pub fn not_found(resource: impl Into<String>, id: Option<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Wrap a database error. The error itself is logged, never shown.
    pub fn database(err: DbErr) -> Self {
        Self::Database(err)
    }

    pub fn export(message: impl Into<String>) -> Self {
        Self::Export {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>, internal: Option<String>) -> Self {
        Self::Internal {
            message: message.into(),
            internal,
        }
    }

    pub fn custom(status: StatusCode, message: impl Into<String>, internal: Option<String>) -> Self {
        Self::Custom {
            status,
            message: message.into(),
            internal,
        }
    }

    // ============================================================================
    // Classification
    // ============================================================================

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RepositoryUnavailable { .. }
            | Self::SectionNotFound { .. }
            | Self::MissingStorageBackend { .. }
            | Self::Database(_)
            | Self::Storage(_)
            | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ActionDisabled { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Export { .. } => StatusCode::OK,
            Self::Custom { status, .. } => *status,
        }
    }

    /// Configuration errors are fatal and never retried.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::RepositoryUnavailable { .. }
                | Self::SectionNotFound { .. }
                | Self::MissingStorageBackend { .. }
        )
    }

    /// Sanitized message for clients.
    #[must_use]
    pub fn user_message(&self) -> String {
        self.to_string()
    }

    /// Failure envelope carrying the sanitized message.
    #[must_use]
    pub fn to_envelope(&self) -> Envelope {
        Envelope::failure(vec![ErrorEntry::message(self.user_message())])
    }

    /// Log internal details server-side. Nothing is printed unless tracing is configured.
    pub fn log_internal(&self) {
        match self {
            Self::Database(internal) => {
                tracing::error!(error = ?internal, "Database error occurred");
            }
            Self::Storage(internal) => {
                tracing::error!(error = %internal, "Storage backend error occurred");
            }
            Self::RepositoryUnavailable { section } => {
                tracing::error!(section = %section, "No repository configured for section");
            }
            Self::MissingStorageBackend { name } => {
                tracing::error!(backend = %name, "Upload storage backend is not registered");
            }
            Self::Internal {
                internal: Some(details),
                ..
            } => {
                tracing::error!(details = %details, "Internal error occurred");
            }
            Self::Custom {
                internal: Some(details),
                status,
                ..
            } => {
                tracing::error!(status = %status, details = %details, "Custom error occurred");
            }
            _ => {
                tracing::debug!(
                    error = %self.user_message(),
                    status = %self.status_code(),
                    "CRUD error"
                );
            }
        }
    }
}

impl IntoResponse for CrudError {
    fn into_response(self) -> Response {
        self.log_internal();
        (self.status_code(), Json(self.to_envelope())).into_response()
    }
}

/// `RecordNotFound` becomes a 404, every other database error a sanitized 500.
impl From<DbErr> for CrudError {
    fn from(err: DbErr) -> Self {
        match &err {
            DbErr::RecordNotFound(msg) => {
                let resource = msg.split_whitespace().next().unwrap_or("Resource");
                Self::NotFound {
                    resource: resource.to_string(),
                    id: None,
                }
            }
            _ => Self::Database(err),
        }
    }
}

impl From<serde_json::Error> for CrudError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal("Failed to serialize response", Some(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_500() {
        let cases = vec![
            CrudError::repository_unavailable("companies"),
            CrudError::section_not_found("nope"),
            CrudError::missing_storage("s3"),
        ];
        for err in cases {
            assert!(err.is_configuration());
            assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[test]
    fn test_invalid_section_message() {
        let err = CrudError::section_not_found("ghosts");
        assert_eq!(err.user_message(), "Invalid section");
    }

    #[test]
    fn test_not_found_with_and_without_id() {
        let err = CrudError::not_found("Company", Some("7".to_string()));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.user_message(), "Company with ID '7' not found");
        assert_eq!(CrudError::not_found("Company", None).user_message(), "Company not found");
    }

    #[test]
    fn test_database_error_is_sanitized() {
        let err = CrudError::database(DbErr::Custom("secret table layout".to_string()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.user_message(), "A database error occurred");
        assert!(!err.user_message().contains("secret"));
    }

    #[test]
    fn test_dberr_record_not_found_conversion() {
        let err: CrudError = DbErr::RecordNotFound("Company not found".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_export_error_keeps_success_status() {
        let err = CrudError::export("Spreadsheet export needs the `xlsx` feature");
        assert_eq!(err.status_code(), StatusCode::OK);
        let envelope = err.to_envelope();
        assert!(!envelope.success);
        assert!(envelope.errors[0].message.contains("xlsx"));
    }

    #[test]
    fn test_storage_error_conversion() {
        let err: CrudError = StorageError::InvalidKey("../etc".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.user_message(), "A storage error occurred");
    }

    #[test]
    fn test_error_entry_serialization_skips_empty_fields() {
        let entry = ErrorEntry::message("boom");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json, serde_json::json!({ "message": "boom" }));

        let entry = ErrorEntry::for_field("email", "unique", "email already exists");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "unique");
        assert_eq!(json["field"], "email");
    }
}
