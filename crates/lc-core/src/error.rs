//! Unified error type for livecast.
//!
//! Every crate in the workspace funnels its failures into [`Error`]. The
//! variants follow the failure taxonomy of the stream lifecycle (validation,
//! conflict, not-found, process, IO, upstream) plus the infrastructure errors
//! the collaborators can raise. API handlers derive an HTTP status through
//! [`Error::http_status`] and a machine-readable code through [`Error::code`].

use std::fmt;

/// Unified error type covering all failure modes in livecast.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "stream", "video").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// The caller is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The operation conflicts with the current state of the resource.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A transcoding worker could not be spawned or died unexpectedly.
    #[error("Process error [{key}]: {message}")]
    Process {
        /// Stream key the worker belonged to.
        key: String,
        /// Diagnostic captured from the worker.
        message: String,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external collaborator (object storage, metadata store) failed.
    #[error("Upstream error [{service}]: {message}")]
    Upstream {
        /// Name of the collaborator that failed.
        service: String,
        /// Human-readable error description.
        message: String,
    },

    /// A database operation failed.
    #[error("Database error: {source}")]
    Database {
        /// The underlying database error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A one-shot external tool invocation (ffmpeg remux, version probe) failed.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::Unauthorized(_) => 401,
            Error::Validation(_) => 400,
            Error::Conflict(_) => 409,
            Error::Process { .. } => 500,
            Error::Io { .. } => 500,
            Error::Upstream { .. } => 502,
            Error::Database { .. } => 500,
            Error::Tool { .. } => 502,
            Error::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::Unauthorized(_) => "unauthorized",
            Error::Validation(_) => "validation_error",
            Error::Conflict(_) => "conflict",
            Error::Process { .. } => "process_error",
            Error::Io { .. } => "io_error",
            Error::Upstream { .. } => "upstream_error",
            Error::Database { .. } => "database_error",
            Error::Tool { .. } => "tool_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Process`].
    pub fn process(key: impl fmt::Display, message: impl Into<String>) -> Self {
        Error::Process {
            key: key.to_string(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Upstream`].
    pub fn upstream(service: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Upstream {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Database`].
    pub fn database(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Database {
            source: source.into(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = Error::not_found("stream", "abc123");
        assert_eq!(err.to_string(), "stream not found: abc123");
        assert_eq!(err.http_status(), 404);
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn conflict_display() {
        let err = Error::Conflict("stream abc123 is already live".into());
        assert_eq!(err.to_string(), "Conflict: stream abc123 is already live");
        assert_eq!(err.http_status(), 409);
    }

    #[test]
    fn process_display() {
        let err = Error::process("abc123", "exited with status 1");
        assert_eq!(err.to_string(), "Process error [abc123]: exited with status 1");
        assert_eq!(err.http_status(), 500);
        assert_eq!(err.code(), "process_error");
    }

    #[test]
    fn upstream_display() {
        let err = Error::upstream("object-storage", "connection reset");
        assert_eq!(
            err.to_string(),
            "Upstream error [object-storage]: connection reset"
        );
        assert_eq!(err.http_status(), 502);
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(err.http_status(), 500);
        assert_eq!(err.code(), "io_error");
    }

    #[test]
    fn database_display() {
        let err = Error::database("disk full");
        assert!(err.to_string().contains("disk full"));
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn tool_display() {
        let err = Error::tool("ffmpeg", "exit code 1");
        assert_eq!(err.to_string(), "Tool error [ffmpeg]: exit code 1");
        assert_eq!(err.http_status(), 502);
    }

    #[test]
    fn validation_and_unauthorized() {
        assert_eq!(Error::Validation("x".into()).http_status(), 400);
        assert_eq!(Error::Unauthorized("x".into()).http_status(), 401);
        assert_eq!(Error::Internal("x".into()).code(), "internal_error");
    }
}
