//! Error handling for the record sorter

use std::io;
use thiserror::Error;

/// Custom error type for sort operations
#[derive(Error, Debug)]
pub enum SortError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("No such file or directory: {file}")]
    FileNotFound { file: String },

    #[error("Permission denied: {file}")]
    PermissionDenied { file: String },

    #[error("Field '{field}' not found in schema '{schema}'")]
    UnknownField { field: String, schema: String },

    #[error("Can't compare: keys have different number of fields ({left} vs {right})")]
    IncompatibleKey { left: usize, right: usize },

    #[error("Invalid key specification: {spec}")]
    InvalidKeySpec { spec: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Unknown locale: {locale}")]
    UnknownLocale { locale: String },

    #[error(
        "Out of memory in internal sorter while allocating {requested} record slots; \
         increase buffer capacity or heap, or decrease the sorter buffer capacity"
    )]
    OutOfMemory { requested: usize },

    #[error("Serialized record of {size} bytes exceeds the limit of {limit} bytes")]
    RecordTooLarge { size: usize, limit: usize },

    #[error("Corrupt run data: {message}")]
    CorruptRun { message: String },

    #[error("Record schema '{found}' does not match expected schema '{expected}'")]
    SchemaMismatch { expected: String, found: String },

    #[error("Field '{field}' expects {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    #[error("Invalid sorter state: {message}")]
    InvalidState { message: String },

    #[error("Sort was cancelled")]
    Cancelled,

    #[error("UTF-8 encoding error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),

    #[error("Parse error: {message}")]
    ParseError { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SortError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            SortError::PermissionDenied { .. }
            | SortError::FileNotFound { .. }
            | SortError::Io(_) => crate::SORT_FAILURE,

            _ => crate::EXIT_FAILURE,
        }
    }

    /// Create a file not found error
    pub fn file_not_found(file: &str) -> Self {
        SortError::FileNotFound {
            file: file.to_string(),
        }
    }

    /// Create a permission denied error
    pub fn permission_denied(file: &str) -> Self {
        SortError::PermissionDenied {
            file: file.to_string(),
        }
    }

    /// Create an unknown field error
    pub fn unknown_field(field: &str, schema: &str) -> Self {
        SortError::UnknownField {
            field: field.to_string(),
            schema: schema.to_string(),
        }
    }

    /// Create an invalid key spec error
    pub fn invalid_key_spec(spec: &str) -> Self {
        SortError::InvalidKeySpec {
            spec: spec.to_string(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(message: &str) -> Self {
        SortError::InvalidConfig {
            message: message.to_string(),
        }
    }

    /// Create a corrupt run error
    pub fn corrupt_run(message: &str) -> Self {
        SortError::CorruptRun {
            message: message.to_string(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: &str) -> Self {
        SortError::InvalidState {
            message: message.to_string(),
        }
    }

    /// Create a parse error
    pub fn parse_error(message: &str) -> Self {
        SortError::ParseError {
            message: message.to_string(),
        }
    }

    /// Create an internal error
    pub fn internal(message: &str) -> Self {
        SortError::Internal {
            message: message.to_string(),
        }
    }

    /// Whether this error came from the cooperative cancellation checkpoint
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SortError::Cancelled)
    }
}

/// Result type for sort operations
pub type SortResult<T> = Result<T, SortError>;

/// Context trait for adding context to errors
pub trait SortContext<T> {
    fn with_context<F>(self, f: F) -> SortResult<T>
    where
        F: FnOnce() -> String;

    fn with_file_context(self, filename: &str) -> SortResult<T>;
}

impl<T> SortContext<T> for Result<T, io::Error> {
    fn with_context<F>(self, f: F) -> SortResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|io_err| {
            SortError::Io(io::Error::new(
                io_err.kind(),
                format!("{}: {}", f(), io_err),
            ))
        })
    }

    fn with_file_context(self, filename: &str) -> SortResult<T> {
        self.map_err(|io_err| match io_err.kind() {
            io::ErrorKind::PermissionDenied => SortError::permission_denied(filename),
            io::ErrorKind::NotFound => SortError::file_not_found(filename),
            _ => SortError::Io(io::Error::new(
                io_err.kind(),
                format!("{}: {}", filename, io_err),
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let io_err = SortError::Io(io::Error::new(io::ErrorKind::Other, "disk full"));
        assert_eq!(io_err.exit_code(), crate::SORT_FAILURE);
        assert_eq!(SortError::Cancelled.exit_code(), crate::EXIT_FAILURE);
        assert_eq!(
            SortError::unknown_field("age", "people").exit_code(),
            crate::EXIT_FAILURE
        );
    }

    #[test]
    fn test_io_context_is_prefixed() {
        let result: Result<(), io::Error> =
            Err(io::Error::new(io::ErrorKind::Other, "short write"));
        let err = result
            .with_context(|| "writing run 3".to_string())
            .expect_err("context should keep the error");
        assert!(err.to_string().contains("writing run 3: short write"));
    }

    #[test]
    fn test_file_context_maps_not_found() {
        let result: Result<(), io::Error> =
            Err(io::Error::new(io::ErrorKind::NotFound, "gone"));
        let err = result.with_file_context("input.csv").expect_err("error expected");
        assert!(matches!(err, SortError::FileNotFound { ref file } if file == "input.csv"));
    }

    #[test]
    fn test_out_of_memory_message_has_hint() {
        let err = SortError::OutOfMemory { requested: 1024 };
        assert!(err.to_string().contains("increase buffer capacity or heap"));
    }
}
