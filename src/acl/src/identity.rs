//! Security identities (principals)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity identifier (e.g., "user:alice@example.com")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(String);

impl IdentityId {
    /// Create an identity id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for IdentityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for IdentityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Principal that authorizations are granted to.
///
/// The identity owns its roles: deleting it deletes every role and, through
/// them, every authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityIdentity {
    /// Identity identifier
    pub id: IdentityId,

    /// Optional human-readable name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl SecurityIdentity {
    /// Create a new identity
    pub fn new(id: impl Into<IdentityId>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            created_at: Utc::now(),
        }
    }

    /// Set the display name
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}
