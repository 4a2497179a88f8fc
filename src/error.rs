//! Error types shared by the wizard, its collaborators and the HTTP layer.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, WizardError>;

/// A single field-scoped validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Field name, or `list[index].field` for multi-row entries
    pub field: String,

    /// Human readable message shown next to the field
    pub message: String,
}

/// Every field that failed validation for one step, in rule order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure unless the field already has one; only the first
    /// message per field is kept.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        let field = field.into();
        if self.0.iter().any(|e| e.field == field) {
            return;
        }
        self.0.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    /// Message recorded for `field`, if any
    pub fn message_for(&self, field: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }

    /// `Ok(())` when nothing failed, otherwise a [`WizardError::Validation`]
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(WizardError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.first() {
            Some(first) if self.0.len() > 1 => {
                write!(f, "{} (and {} more)", first.message, self.0.len() - 1)
            }
            Some(first) => f.write_str(&first.message),
            None => f.write_str("no validation errors"),
        }
    }
}

/// Main error type for the wizard
#[derive(Debug, thiserror::Error)]
pub enum WizardError {
    /// Local field validation failed; nothing was sent anywhere
    #[error("{0}")]
    Validation(ValidationErrors),

    /// A file with the requested output name already exists in the folder
    #[error("a file named '{name}' already exists in the destination folder")]
    DuplicateName { name: String },

    /// The spreadsheet service rejected a row write
    #[error("failed to write to sheet: {0}")]
    SheetWrite(String),

    /// The Drive service rejected a request
    #[error("drive request failed: {0}")]
    Drive(String),

    /// The remote call did not complete in time
    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The backend could not be reached at all
    #[error("network error: {0}")]
    Network(String),

    /// A tab write was attempted before the spreadsheet was provisioned
    #[error("the output spreadsheet has not been created yet")]
    NoSpreadsheet,

    /// A previous submission for this session has not resolved yet
    #[error("a previous submission is still in progress")]
    Busy,

    /// A proxy request was malformed
    #[error("invalid request: {0}")]
    BadRequest(String),

    /// Startup configuration could not be read
    #[error("configuration error: {0}")]
    Config(String),
}

impl WizardError {
    /// Field-level failures, if this is a validation error
    pub fn validation(&self) -> Option<&ValidationErrors> {
        match self {
            WizardError::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_first_message_per_field() {
        let mut errors = ValidationErrors::new();
        errors.add("clientEmail", "Client email is required");
        errors.add("clientEmail", "Invalid email address");
        errors.add("clientPhone", "Invalid phone number");

        assert_eq!(errors.len(), 2);
        assert_eq!(
            errors.message_for("clientEmail"),
            Some("Client email is required")
        );
        assert_eq!(
            errors.to_string(),
            "Client email is required (and 1 more)"
        );
    }

    #[test]
    fn empty_errors_are_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }

    #[test]
    fn timeout_message_names_the_limit() {
        assert_eq!(
            WizardError::Timeout(Duration::from_secs(30)).to_string(),
            "request timed out after 30s"
        );
    }
}
