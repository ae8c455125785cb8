use thiserror::Error;

/// Errors from repository operations (used by trait definitions in
/// mailloom-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors from the balance gate.
///
/// `InsufficientBalance` is translated to HTTP 403 by any transport layer
/// that initiated the call synchronously.
#[derive(Debug, Error)]
pub enum BalanceError {
    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("user not found")]
    UserNotFound,

    #[error("storage error: {0}")]
    Storage(String),
}

/// Errors from the tool transport.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("server '{0}' is not available")]
    ServerUnavailable(String),

    #[error("tool '{tool}' failed on server '{server}': {reason}")]
    CallFailed {
        server: String,
        tool: String,
        reason: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),
}

/// Errors from IMAP operations.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("could not resolve folder for attribute '{0}'")]
    FolderNotFound(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_error_display() {
        let err = ToolError::CallFailed {
            server: "imap".to_string(),
            tool: "search".to_string(),
            reason: "timeout".to_string(),
        };
        assert!(err.to_string().contains("imap"));
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn mail_error_display() {
        let err = MailError::FolderNotFound("\\All".to_string());
        assert_eq!(err.to_string(), "could not resolve folder for attribute '\\All'");
    }
}
