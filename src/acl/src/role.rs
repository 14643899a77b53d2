//! Roles and the rule sets that turn them into authorizations
//!
//! A role is a data record bound to one identity plus a [`RoleRules`]
//! implementation. The rules are a pure function from the record to the
//! `(resource, actions)` pairs it authorizes; the engine calls it exactly
//! once, when the role is granted.
//!
//! # Example
//!
//! ```rust
//! use cretoai_acl::{Actions, Grant, IdentityId, Resource, Role, RoleRules};
//!
//! #[derive(Debug)]
//! struct ArticleEditor {
//!     article: String,
//! }
//!
//! impl RoleRules for ArticleEditor {
//!     fn kind(&self) -> &str {
//!         "article_editor"
//!     }
//!
//!     fn authorizations(&self, identity: &IdentityId) -> Vec<Grant> {
//!         let resource = Resource::entity("Article", self.article.as_str()).unwrap();
//!         vec![Grant::new(identity.clone(), resource, Actions::VIEW | Actions::EDIT)]
//!     }
//! }
//!
//! let role = Role::new("user:alice", ArticleEditor { article: "42".into() });
//! assert_eq!(role.kind(), "article_editor");
//! ```

use crate::actions::Actions;
use crate::identity::IdentityId;
use crate::resource::Resource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Unique role identifier
pub type RoleId = Uuid;

/// One `(resource, actions)` pair emitted by a role's rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Identity the authorization is for; must be the role's own identity
    pub identity: IdentityId,

    /// Resource being authorized
    pub resource: Resource,

    /// Authorized actions
    pub actions: Actions,
}

impl Grant {
    /// Create a grant
    pub fn new(identity: IdentityId, resource: Resource, actions: Actions) -> Self {
        Self {
            identity,
            resource,
            actions,
        }
    }
}

/// Rule set of a concrete role type.
///
/// Implementations must be deterministic and side-effect free.
pub trait RoleRules: fmt::Debug + Send + Sync {
    /// Stable discriminator persisted with the role
    fn kind(&self) -> &str;

    /// Authorizations this role yields for `identity`
    fn authorizations(&self, identity: &IdentityId) -> Vec<Grant>;

    /// Role state for stores that persist the record
    fn payload(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// A role bound to an identity, not yet granted
#[derive(Debug, Clone)]
pub struct Role {
    id: RoleId,
    identity: IdentityId,
    rules: Arc<dyn RoleRules>,
}

impl Role {
    /// Bind a rule set to an identity
    pub fn new(identity: impl Into<IdentityId>, rules: impl RoleRules + 'static) -> Self {
        Self::from_shared(identity, Arc::new(rules))
    }

    /// Bind a shared rule set to an identity
    pub fn from_shared(identity: impl Into<IdentityId>, rules: Arc<dyn RoleRules>) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity: identity.into(),
            rules,
        }
    }

    /// Role identifier
    pub fn id(&self) -> RoleId {
        self.id
    }

    /// Identity the role belongs to
    pub fn identity(&self) -> &IdentityId {
        &self.identity
    }

    /// Role kind from the rule set
    pub fn kind(&self) -> &str {
        self.rules.kind()
    }

    /// Evaluate the rule set
    pub fn create_authorizations(&self) -> Vec<Grant> {
        self.rules.authorizations(&self.identity)
    }

    /// Persistable record of this role
    pub fn record(&self) -> RoleRecord {
        RoleRecord {
            id: self.id,
            identity: self.identity.clone(),
            kind: self.rules.kind().to_string(),
            payload: self.rules.payload(),
            created_at: Utc::now(),
        }
    }
}

/// Persisted role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleRecord {
    /// Role identifier
    pub id: RoleId,

    /// Owning identity
    pub identity: IdentityId,

    /// Role kind
    pub kind: String,

    /// Rule-set state
    pub payload: serde_json::Value,

    /// Grant timestamp
    pub created_at: DateTime<Utc>,
}

/// Authorizes one action set on one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRole {
    kind: String,
    resource: Resource,
    actions: Actions,
}

impl ResourceRole {
    /// Create a single-resource rule set
    pub fn new(kind: impl Into<String>, resource: Resource, actions: Actions) -> Self {
        Self {
            kind: kind.into(),
            resource,
            actions,
        }
    }
}

impl RoleRules for ResourceRole {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn authorizations(&self, identity: &IdentityId) -> Vec<Grant> {
        vec![Grant::new(identity.clone(), self.resource.clone(), self.actions)]
    }

    fn payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Authorizes a fixed list of `(resource, actions)` pairs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRole {
    kind: String,
    grants: Vec<(Resource, Actions)>,
}

impl StaticRole {
    /// Create an empty rule set of the given kind
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            grants: Vec::new(),
        }
    }

    /// Add a `(resource, actions)` pair
    pub fn allow(mut self, resource: Resource, actions: Actions) -> Self {
        self.grants.push((resource, actions));
        self
    }
}

impl RoleRules for StaticRole {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn authorizations(&self, identity: &IdentityId) -> Vec<Grant> {
        self.grants
            .iter()
            .map(|(resource, actions)| Grant::new(identity.clone(), resource.clone(), *actions))
            .collect()
    }

    fn payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_role_binds_identity() {
        let article = Resource::entity("Article", "42").unwrap();
        let role = Role::new(
            "user:alice",
            ResourceRole::new("article_editor", article.clone(), Actions::VIEW | Actions::EDIT),
        );

        let grants = role.create_authorizations();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].identity, IdentityId::new("user:alice"));
        assert_eq!(grants[0].resource, article);
        assert_eq!(grants[0].actions, Actions::VIEW | Actions::EDIT);
    }

    #[test]
    fn test_static_role_is_deterministic() {
        let rules = StaticRole::new("moderator")
            .allow(Resource::class("Comment").unwrap(), Actions::VIEW | Actions::DELETE)
            .allow(Resource::class_field("Article", "title").unwrap(), Actions::EDIT);
        let role = Role::new("user:mod", rules);

        assert_eq!(role.create_authorizations(), role.create_authorizations());
        assert_eq!(role.create_authorizations().len(), 2);
    }

    #[test]
    fn test_record_captures_payload() {
        let role = Role::new(
            "user:alice",
            ResourceRole::new("viewer", Resource::class("Article").unwrap(), Actions::VIEW),
        );
        let record = role.record();

        assert_eq!(record.id, role.id());
        assert_eq!(record.kind, "viewer");
        assert_eq!(record.payload["kind"], "viewer");
    }

    #[test]
    fn test_roles_have_distinct_ids() {
        let rules = Arc::new(StaticRole::new("empty"));
        let a = Role::from_shared("user:a", rules.clone());
        let b = Role::from_shared("user:a", rules);
        assert_ne!(a.id(), b.id());
    }
}
