//! Error types for the storage layer.
//!
//! Every backend and index reports failures through [`StorageError`], so the
//! orchestrator can propagate them untouched apart from operation context.

use std::fmt;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage errors with structured context.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StorageError {
    /// Missing or empty file, unsafe filename. Raised before any side effect.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Unknown token, missing blob, or missing remote object.
    #[error("not found: {0}")]
    NotFound(String),

    /// Blob or index write failed.
    #[error("write failed for {target}{}: {reason}", status_suffix(.status))]
    WriteFailed {
        target: String,
        status: Option<u16>,
        reason: String,
    },

    /// Blob or index read failed for a reason other than absence.
    #[error("read failed for {target}{}: {reason}", status_suffix(.status))]
    ReadFailed {
        target: String,
        status: Option<u16>,
        reason: String,
    },

    /// Blob or index removal failed for a reason other than absence.
    #[error("delete failed for {target}{}: {reason}", status_suffix(.status))]
    DeleteFailed {
        target: String,
        status: Option<u16>,
        reason: String,
    },

    /// A descriptor already exists for this token. Should be unreachable.
    #[error("duplicate token: {0}")]
    DuplicateToken(String),
}

/// Renders ` (status 503)` when a remote status is attached.
#[allow(clippy::ref_option)]
fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" (status {code})")).unwrap_or_default()
}

impl StorageError {
    /// Create a write failure without a remote status.
    pub fn write_failed(target: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::WriteFailed {
            target: target.into(),
            status: None,
            reason: reason.to_string(),
        }
    }

    /// Create a read failure without a remote status.
    pub fn read_failed(target: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::ReadFailed {
            target: target.into(),
            status: None,
            reason: reason.to_string(),
        }
    }

    /// Create a delete failure without a remote status.
    pub fn delete_failed(target: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::DeleteFailed {
            target: target.into(),
            status: None,
            reason: reason.to_string(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create an invalid-input error.
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput(reason.into())
    }

    /// Prefix the error's subject with the operation name and token.
    ///
    /// The variant is preserved so callers can still match on the kind.
    #[must_use]
    pub fn in_operation(self, operation: &str, token: &str) -> Self {
        let prefix = |subject: String| format!("{operation} {token}: {subject}");
        match self {
            Self::NotFound(what) => Self::NotFound(prefix(what)),
            Self::WriteFailed {
                target,
                status,
                reason,
            } => Self::WriteFailed {
                target: prefix(target),
                status,
                reason,
            },
            Self::ReadFailed {
                target,
                status,
                reason,
            } => Self::ReadFailed {
                target: prefix(target),
                status,
                reason,
            },
            Self::DeleteFailed {
                target,
                status,
                reason,
            } => Self::DeleteFailed {
                target: prefix(target),
                status,
                reason,
            },
            other @ (Self::InvalidInput(_) | Self::DuplicateToken(_)) => other,
        }
    }

    /// Whether a caller may reasonably retry the operation.
    ///
    /// Transport failures (no status) and 408/429/5xx responses are retriable.
    /// The storage layer itself never retries.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::WriteFailed { status, .. }
            | Self::ReadFailed { status, .. }
            | Self::DeleteFailed { status, .. } => match status {
                None => true,
                Some(code) => *code == 408 || *code == 429 || *code >= 500,
            },
            Self::InvalidInput(_) | Self::NotFound(_) | Self::DuplicateToken(_) => false,
        }
    }

    /// Whether this is a [`StorageError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Get the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::NotFound(_) => 404,
            Self::WriteFailed {
                status: Some(_), ..
            }
            | Self::ReadFailed {
                status: Some(_), ..
            }
            | Self::DeleteFailed {
                status: Some(_), ..
            } => 502,
            Self::WriteFailed { .. }
            | Self::ReadFailed { .. }
            | Self::DeleteFailed { .. }
            | Self::DuplicateToken(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_status() {
        let err = StorageError::WriteFailed {
            target: "blob abc_notes.txt".to_string(),
            status: Some(413),
            reason: "Payload too large".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "write failed for blob abc_notes.txt (status 413): Payload too large"
        );

        let err = StorageError::read_failed("blob k", "connection reset");
        assert_eq!(err.to_string(), "read failed for blob k: connection reset");
    }

    #[test]
    fn test_in_operation_preserves_kind() {
        let err = StorageError::not_found("blob k").in_operation("download", "t1");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "not found: download t1: blob k");

        let err = StorageError::delete_failed("blob k", "busy").in_operation("delete", "t1");
        assert!(matches!(
            err,
            StorageError::DeleteFailed { ref target, .. } if target == "delete t1: blob k"
        ));

        let err = StorageError::invalid_input("empty").in_operation("upload", "t1");
        assert_eq!(err.to_string(), "invalid input: empty");
    }

    #[test]
    fn test_retriable_classification() {
        assert!(StorageError::write_failed("k", "timed out").is_retriable());

        let server_error = StorageError::ReadFailed {
            target: "k".to_string(),
            status: Some(503),
            reason: String::new(),
        };
        assert!(server_error.is_retriable());

        let rejected = StorageError::WriteFailed {
            target: "k".to_string(),
            status: Some(400),
            reason: String::new(),
        };
        assert!(!rejected.is_retriable());
        assert!(!StorageError::not_found("k").is_retriable());
        assert!(!StorageError::invalid_input("bad").is_retriable());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(StorageError::invalid_input("x").status_code(), 400);
        assert_eq!(StorageError::not_found("x").status_code(), 404);
        assert_eq!(StorageError::write_failed("x", "io").status_code(), 500);
        let remote = StorageError::DeleteFailed {
            target: "x".to_string(),
            status: Some(500),
            reason: String::new(),
        };
        assert_eq!(remote.status_code(), 502);
        assert_eq!(
            StorageError::DuplicateToken("t".to_string()).status_code(),
            500
        );
    }
}
