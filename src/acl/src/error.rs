//! Error types for the ACL engine

use thiserror::Error;

/// ACL engine errors
#[derive(Debug, Error)]
pub enum AclError {
    /// A role produced authorizations for an identity other than its own
    #[error("Invalid role '{kind}': authorization targets identity '{found}', role belongs to '{expected}'")]
    InvalidRole {
        /// Role kind reported by its rules
        kind: String,
        /// Identity the role is bound to
        expected: String,
        /// Identity found on the offending authorization
        found: String,
    },

    /// Child authorization inserted before its parent was assigned an id
    #[error("Ordering error: {0}")]
    Ordering(String),

    /// Derived authorization already exists for this (parent, resource) pair
    #[error("Duplicate cascade: parent {parent} already has a derived authorization on {resource}")]
    DuplicateCascade {
        /// Parent authorization id
        parent: i64,
        /// Resource of the would-be duplicate
        resource: String,
    },

    /// Parent authorization id is not known to the store
    #[error("Unknown parent authorization: {0}")]
    UnknownParent(i64),

    /// Resource descriptor is missing a required component
    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Security identity not found
    #[error("Identity not found: {0}")]
    IdentityNotFound(String),

    /// Role not found
    #[error("Role not found: {0}")]
    RoleNotFound(String),

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AclError {
    /// True for errors the engine absorbs to keep cascades idempotent
    pub fn is_duplicate_cascade(&self) -> bool {
        matches!(self, Self::DuplicateCascade { .. })
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for AclError {
    fn from(err: sqlx::Error) -> Self {
        AclError::DatabaseError(err.to_string())
    }
}

/// Result type for ACL operations
pub type Result<T> = std::result::Result<T, AclError>;
