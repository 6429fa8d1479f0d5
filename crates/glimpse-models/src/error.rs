//! Model validation errors.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while validating or parsing model values.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Invalid source name: {0}")]
    InvalidName(String),

    #[error("Invalid source field {field}: {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid frame name: {0}")]
    InvalidFrameName(String),
}

impl ModelError {
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<validator::ValidationErrors> for ModelError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let (field, message) = errors
            .field_errors()
            .into_iter()
            .next()
            .map(|(field, errs)| {
                let message = errs
                    .first()
                    .map(|e| e.code.to_string())
                    .unwrap_or_else(|| "invalid".to_string());
                (field.to_string(), message)
            })
            .unwrap_or_else(|| ("source".to_string(), errors.to_string()));
        Self::InvalidField { field, message }
    }
}
