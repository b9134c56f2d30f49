use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

/// Per-field validation messages, keyed by form field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<&'static str, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn field(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `Ok(value)` when nothing was recorded, otherwise the collected errors.
    pub fn into_result<T>(self, value: T) -> Result<T, AppError> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(AppError::Validation(self))
        }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for m in messages {
                if !first {
                    write!(f, "; ")?;
                }
                write!(f, "{field}: {m}")?;
                first = false;
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Bad field values; the client re-submits.
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("{0} not found")]
    NotFound(String),

    /// Uniqueness or foreign-key conflict, reported against a form field.
    #[error("{field}: {message}")]
    Integrity {
        field: &'static str,
        message: String,
    },

    /// The uploaded backup archive is unusable; the whole import is aborted.
    #[error("invalid backup archive: {0}")]
    ImportFormat(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("admin privileges required")]
    Forbidden,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(field, message);
        Self::Validation(errors)
    }

    pub fn import(message: impl Into<String>) -> Self {
        Self::ImportFormat(message.into())
    }

    /// Turns a unique-constraint violation into a field conflict; other
    /// database errors pass through unchanged.
    pub fn conflict_on<'a>(
        field: &'static str,
        message: &'a str,
    ) -> impl FnOnce(sqlx::Error) -> Self + 'a {
        move |e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return Self::Integrity {
                        field,
                        message: message.to_string(),
                    };
                }
            }
            Self::Database(e)
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Integrity { .. } => StatusCode::CONFLICT,
            Self::ImportFormat(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<ValidationErrors>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            AppError::Validation(fields) => ErrorBody {
                error: "validation failed".into(),
                fields: Some(fields),
            },
            AppError::Integrity { field, message } => {
                let mut fields = ValidationErrors::new();
                fields.add(field, message.clone());
                ErrorBody {
                    error: message,
                    fields: Some(fields),
                }
            }
            AppError::Database(e) => {
                error!(error = %e, "database error");
                ErrorBody {
                    error: "internal error".into(),
                    fields: None,
                }
            }
            AppError::Internal(e) => {
                error!(error = %e, "internal error");
                ErrorBody {
                    error: "internal error".into(),
                    fields: None,
                }
            }
            other => ErrorBody {
                error: other.to_string(),
                fields: None,
            },
        };
        (status, Json(body)).into_response()
    }
}
