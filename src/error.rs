use std::fmt;

use thiserror::Error;

use crate::logging::ResolutionFailure;

/// Patch-syntax error raised while parsing or validating a patch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidateError {
    pub line: Option<usize>,
    pub message: String,
}

impl ValidateError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            line: None,
            message: message.into(),
        }
    }

    /// Attach a line number unless an inner step already recorded one.
    pub fn at_line(mut self, line: usize) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }
}

impl fmt::Display for ValidateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {line}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ValidateError {}

/// Errors surfaced by patch resolution and application.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("invalid patch: {0}")]
    Validate(#[from] ValidateError),
    #[error("{0}")]
    Resolution(Box<ResolutionFailure>),
    #[error("internal error: {0}")]
    Internal(String),
}

impl PatchError {
    pub(crate) fn internal(message: impl Into<String>) -> Self {
        PatchError::Internal(message.into())
    }
}

impl From<ResolutionFailure> for PatchError {
    fn from(failure: ResolutionFailure) -> Self {
        PatchError::Resolution(Box::new(failure))
    }
}

pub type Result<T> = std::result::Result<T, PatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_number_is_kept_from_innermost_step() {
        let error = ValidateError::new("Unexpected Q").at_line(4).at_line(9);

        assert_eq!(error.line, Some(4));
        assert_eq!(error.to_string(), "line 4: Unexpected Q");
    }

    #[test]
    fn validate_error_converts_into_patch_error() {
        let error: PatchError = ValidateError::new("bad").into();

        assert!(matches!(error, PatchError::Validate(_)));
        assert_eq!(error.to_string(), "invalid patch: bad");
    }
}
