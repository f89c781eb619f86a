//! Error types for flatdir operations
//!
//! All flatdir errors are represented by the DirError enum, which carries
//! enough context (paths, keys, offsets) to decide between retry and abort.

use std::fmt;
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

/// flatdir error types with detailed context
#[derive(Debug, Clone)]
pub enum DirError {
    /// I/O operation failed
    Io {
        /// The file path where the error occurred
        path: Option<PathBuf>,
        /// The underlying I/O error kind
        kind: std::io::ErrorKind,
        /// Human-readable description
        message: String,
    },

    /// Persisted file exists but cannot be decoded into user records.
    /// Fatal to store construction.
    Decode {
        /// File that failed to decode
        path: PathBuf,
        /// 1-based line of the first offending token (0 if unknown)
        line: usize,
        /// 1-based column of the first offending token (0 if unknown)
        column: usize,
        /// Decoder description
        message: String,
    },

    /// Record set could not be serialized
    Encode {
        /// Encoder description
        message: String,
    },

    /// Flush did not complete within the configured bound
    FlushTimeout {
        /// Target file of the flush
        path: PathBuf,
        /// Configured bound
        timeout: Duration,
    },

    /// Insert or re-key would collide with an existing key
    DuplicateKey {
        /// The colliding key
        key: String,
    },

    /// Operation requires a record that is not in the store
    NotFound {
        /// The missing key
        key: String,
    },

    /// A key change was attempted while the key change policy forbids it
    KeyChangeRejected {
        /// Key the record is indexed under
        current: String,
        /// Key that was requested
        requested: String,
    },

    /// Transaction was driven from a state that does not allow the call
    InvalidTransactionState {
        /// State the transaction was in
        state: &'static str,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Configuration failed validation
    InvalidConfig {
        /// Which setting and why
        reason: String,
    },
}

impl DirError {
    /// Whether retrying the same operation can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DirError::Io { .. } | DirError::FlushTimeout { .. })
    }
}

impl fmt::Display for DirError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirError::Io { path, kind, message } => {
                if let Some(path) = path {
                    write!(f, "I/O error in {}: {} ({})", path.display(), message, kind)
                } else {
                    write!(f, "I/O error: {} ({})", message, kind)
                }
            }

            DirError::Decode { path, line, column, message } => {
                write!(f, "Cannot decode user records in {} at line {} column {}: {}",
                       path.display(), line, column, message)
            }

            DirError::Encode { message } => {
                write!(f, "Cannot encode user records: {}", message)
            }

            DirError::FlushTimeout { path, timeout } => {
                write!(f, "Flush of {} did not finish within {:?}", path.display(), timeout)
            }

            DirError::DuplicateKey { key } => {
                write!(f, "User key already exists: {}", key)
            }

            DirError::NotFound { key } => {
                write!(f, "No such user: {}", key)
            }

            DirError::KeyChangeRejected { current, requested } => {
                write!(f, "Key change from {} to {} rejected by policy", current, requested)
            }

            DirError::InvalidTransactionState { state, operation } => {
                write!(f, "Cannot {} a transaction in state {}", operation, state)
            }

            DirError::InvalidConfig { reason } => {
                write!(f, "Invalid configuration: {}", reason)
            }
        }
    }
}

impl Error for DirError {}

/// Convert std::io::Error to DirError::Io
impl From<std::io::Error> for DirError {
    fn from(err: std::io::Error) -> Self {
        DirError::Io {
            path: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for flatdir operations
pub type DirResult<T> = Result<T, DirError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DirError::Decode {
            path: PathBuf::from("/tmp/userDB.json"),
            line: 3,
            column: 14,
            message: "expected `,`".to_string(),
        };

        let display = format!("{}", err);
        assert!(display.contains("userDB.json"));
        assert!(display.contains("line 3"));
        assert!(display.contains("column 14"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let dir_err: DirError = io_err.into();

        match dir_err {
            DirError::Io { kind, .. } => assert_eq!(kind, std::io::ErrorKind::PermissionDenied),
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_retryable_classification() {
        let timeout = DirError::FlushTimeout {
            path: PathBuf::from("/tmp/x"),
            timeout: Duration::from_millis(5),
        };
        assert!(timeout.is_retryable());
        assert!(!DirError::DuplicateKey { key: "a".into() }.is_retryable());
        assert!(!DirError::Decode {
            path: PathBuf::from("/tmp/x"), line: 1, column: 1, message: String::new(),
        }.is_retryable());
    }
}
