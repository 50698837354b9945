// Error types shared across the engine

use thiserror::Error;
use uuid::Uuid;

use crate::machine::{Cursor, WorkflowState};

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur across the provisioning engine
#[derive(Debug, Error)]
pub enum Error {
    /// Template YAML failed structural parsing or validation
    #[error("invalid template: {field}: {reason}")]
    Parse { field: String, reason: String },

    /// Template failed to render against a hardware record
    #[error("template {template_id} failed to render: {reason}")]
    Render { template_id: Uuid, reason: String },

    /// Requested entity does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// Entity with the same identity already exists
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Request was structurally valid but semantically wrong
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Report cursor does not match the workflow's current cursor
    #[error("out-of-order report: expected cursor {expected}, got {got}")]
    OutOfOrder { expected: Cursor, got: Cursor },

    /// Workflow is in a terminal state and accepts no further mutation
    #[error("workflow is already terminal ({0})")]
    AlreadyTerminal(WorkflowState),

    /// Optimistic concurrency check on the workflow data blob failed
    #[error("data version conflict: expected {expected}, actual {actual}")]
    VersionConflict { expected: i64, actual: i64 },

    /// Underlying database failure
    #[error("database error: {0}")]
    Database(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Create a parse error naming the offending field
    pub fn parse(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Parse {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a render error attributed to a template
    pub fn render(template_id: Uuid, reason: impl Into<String>) -> Self {
        Error::Render {
            template_id,
            reason: reason.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    /// Create an already-exists error
    pub fn already_exists(what: impl Into<String>) -> Self {
        Error::AlreadyExists(what.into())
    }

    /// Create an invalid-argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Error::Database(msg.into())
    }
}
