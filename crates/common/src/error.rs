//! Error types for scoutreg.

use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    // === Client Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Group not found: {0}")]
    GroupNotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("No approver reachable for group: {0}")]
    UnreachableApproval(String),

    // === Server Errors ===
    #[error("Cycle detected in group tree at: {0}")]
    CycleDetected(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Mail error: {0}")]
    Mail(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::UserNotFound(_) => "USER_NOT_FOUND",
            Self::GroupNotFound(_) => "GROUP_NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::UnreachableApproval(_) => "UNREACHABLE_APPROVAL",
            Self::CycleDetected(_) => "CYCLE_DETECTED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Mail(_) => "MAIL_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns whether this error should be logged at error level.
    ///
    /// A detected cycle counts as a server error: it signals corrupted
    /// group data, not a bad request.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::CycleDetected(_)
                | Self::Database(_)
                | Self::Mail(_)
                | Self::Config(_)
                | Self::Internal(_)
        )
    }
}

// === From implementations ===

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::GroupNotFound("bdp".to_string()).error_code(),
            "GROUP_NOT_FOUND"
        );
        assert_eq!(AppError::Unauthorized.error_code(), "UNAUTHORIZED");
        assert_eq!(
            AppError::CycleDetected("g1".to_string()).error_code(),
            "CYCLE_DETECTED"
        );
    }

    #[test]
    fn test_server_error_classification() {
        assert!(AppError::CycleDetected("g1".to_string()).is_server_error());
        assert!(AppError::Database("boom".to_string()).is_server_error());
        assert!(!AppError::Unauthorized.is_server_error());
        assert!(!AppError::UnreachableApproval("g1".to_string()).is_server_error());
        assert!(!AppError::Conflict("dup".to_string()).is_server_error());
    }
}
