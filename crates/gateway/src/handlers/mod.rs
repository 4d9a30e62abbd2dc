//! API handlers module

pub mod chat;
pub mod health;
pub mod ingest;
pub mod sessions;

use askforge_common::errors::AppError;
use validator::ValidationErrors;

/// Turn validator output into a 400 naming the first offending field
pub(crate) fn validation_error(errors: ValidationErrors) -> AppError {
    let field = errors.field_errors().keys().next().map(|k| k.to_string());
    AppError::Validation {
        message: errors.to_string(),
        field,
    }
}
