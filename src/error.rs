//! Centralized error handling for tabwatch.
//!
//! A run either completes all of its stages or fails with one of the terminal
//! variants below. The four structural failures a caller has to tell apart
//! are:
//!
//! - [`PipelineError::UnsupportedFormat`]: the upload's extension is not one of
//!   `csv`, `xlsx`, `xls`. Raised at the boundary, before any parsing.
//! - [`PipelineError::UnreadableInput`]: the bytes do not parse as the
//!   declared format.
//! - [`PipelineError::EmptyInput`]: the parsed table has no rows.
//! - [`PipelineError::PersistenceFailure`]: the run summary could not be
//!   written.
//!
//! Anything else that goes wrong inside a run (a timestamp that does not
//! parse, a chart that cannot be prepared) is a local degradation and never
//! surfaces here.
//!
//! ```
//! use tabwatch::error::PipelineError;
//!
//! fn status_for(err: &PipelineError) -> u16 {
//!     match err {
//!         PipelineError::UnsupportedFormat(_)
//!         | PipelineError::UnreadableInput(_)
//!         | PipelineError::EmptyInput => 400,
//!         _ => 500,
//!     }
//! }
//!
//! assert_eq!(status_for(&PipelineError::EmptyInput), 400);
//! ```

use std::fmt;

/// Main error type for tabwatch operations.
#[derive(Debug)]
pub enum PipelineError {
    /// Upload extension outside the accepted set
    UnsupportedFormat(String),

    /// Bytes could not be parsed as the declared format
    UnreadableInput(String),

    /// The loaded dataset has zero rows
    EmptyInput,

    /// The run summary could not be persisted
    PersistenceFailure(String),

    /// I/O errors outside of summary persistence
    Io(std::io::Error),

    /// Data processing errors (table shape, column lookups)
    DataProcessing(String),

    /// Configuration errors
    Config(String),

    /// Generic error with context
    Other(String),
}

impl PipelineError {
    /// Stable machine-readable identifier for the error category.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::UnreadableInput(_) => "unreadable_input",
            Self::EmptyInput => "empty_input",
            Self::PersistenceFailure(_) => "persistence_failure",
            Self::Io(_) => "io",
            Self::DataProcessing(_) => "data_processing",
            Self::Config(_) => "config",
            Self::Other(_) => "other",
        }
    }

    /// True when the failure was caused by the uploaded payload itself.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFormat(_) | Self::UnreadableInput(_) | Self::EmptyInput
        )
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedFormat(ext) => write!(
                f,
                "Unsupported file format '{ext}'. Only CSV, XLSX, and XLS are allowed."
            ),
            Self::UnreadableInput(msg) => write!(f, "Failed to read file: {msg}"),
            Self::EmptyInput => write!(f, "Uploaded file is empty"),
            Self::PersistenceFailure(msg) => write!(f, "Failed to persist run summary: {msg}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::DataProcessing(msg) => write!(f, "Data processing error: {msg}"),
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        // Keep the full context chain, not just the outermost message.
        Self::Other(format!("{err:#}"))
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(format!("JSON error: {err}"))
    }
}

impl From<polars::error::PolarsError> for PipelineError {
    fn from(err: polars::error::PolarsError) -> Self {
        Self::UnreadableInput(err.to_string())
    }
}

impl From<calamine::Error> for PipelineError {
    fn from(err: calamine::Error) -> Self {
        Self::UnreadableInput(err.to_string())
    }
}

impl From<PipelineError> for String {
    fn from(err: PipelineError) -> Self {
        err.to_string()
    }
}

/// Result type alias for tabwatch operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Extension trait to add context to results.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, msg: impl Into<String>) -> Result<T>;

    /// Add context using a closure (lazy evaluation).
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<PipelineError>,
{
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err: PipelineError = e.into();
            PipelineError::Other(format!("{}: {}", msg.into(), err))
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err: PipelineError = e.into();
            PipelineError::Other(format!("{}: {}", f(), err))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::UnsupportedFormat("txt".to_owned());
        assert_eq!(
            err.to_string(),
            "Unsupported file format 'txt'. Only CSV, XLSX, and XLS are allowed."
        );
        assert_eq!(PipelineError::EmptyInput.to_string(), "Uploaded file is empty");
    }

    #[test]
    fn test_terminal_errors_have_distinct_codes() {
        let codes = [
            PipelineError::UnsupportedFormat(String::new()).code(),
            PipelineError::UnreadableInput(String::new()).code(),
            PipelineError::EmptyInput.code(),
            PipelineError::PersistenceFailure(String::new()).code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in codes.iter().skip(i + 1) {
                assert_ne!(a, b, "error codes must not collide");
            }
        }
    }

    #[test]
    fn test_input_errors() {
        assert!(PipelineError::EmptyInput.is_input_error());
        assert!(PipelineError::UnreadableInput("bad quote".to_owned()).is_input_error());
        assert!(!PipelineError::PersistenceFailure("disk full".to_owned()).is_input_error());
    }

    #[test]
    fn test_error_conversion_to_string() {
        let err = PipelineError::EmptyInput;
        let s: String = err.into();
        assert_eq!(s, "Uploaded file is empty");
    }

    #[test]
    fn test_result_context() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file.csv",
        ));

        let result: Result<()> = result.context("Failed to read upload");
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read upload")
        );
    }
}
