//! Storage collaborators of the ACL engine
//!
//! The engine only talks to these traits. [`InMemoryAclStore`] implements all
//! of them; [`PostgresAclStore`] (feature `postgres`) implements the three
//! persistent ones. Resource enumeration belongs to the embedding
//! application and is expressed by [`ResourceEnumerator`].

use crate::authorization::{Authorization, AuthorizationId, NewAuthorization};
use crate::error::Result;
use crate::identity::{IdentityId, SecurityIdentity};
use crate::resource::{EntityId, Resource};
use crate::role::{RoleId, RoleRecord};
use async_trait::async_trait;
use serde::Deserialize;

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryAclStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresAclStore;

/// Default number of authorizations written per batch
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Store configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Authorizations per write batch (one transaction / lock hold each)
    pub batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Column selector for nullable resource components
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector<T> {
    /// Any value, including absent
    Any,
    /// Component must be absent
    Null,
    /// Component must equal the value
    Exact(T),
}

impl<T: PartialEq> Selector<T> {
    /// Whether `value` satisfies this selector
    pub fn accepts(&self, value: Option<&T>) -> bool {
        match self {
            Self::Any => true,
            Self::Null => value.is_none(),
            Self::Exact(expected) => value == Some(expected),
        }
    }
}

impl<T> From<Option<T>> for Selector<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Self::Exact(v),
            None => Self::Null,
        }
    }
}

/// General authorization query: `(identity?, class, id?, field?)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationQuery {
    /// Restrict to one identity
    pub identity: Option<IdentityId>,
    /// Entity class
    pub entity_class: String,
    /// Entity id selector
    pub entity_id: Selector<EntityId>,
    /// Field selector
    pub entity_field: Selector<String>,
    /// Only authorizations without a parent
    pub roots_only: bool,
}

impl AuthorizationQuery {
    /// Authorizations exactly on `resource`, optionally for one identity
    pub fn for_resource(identity: Option<&IdentityId>, resource: &Resource) -> Self {
        Self {
            identity: identity.cloned(),
            entity_class: resource.entity_class().to_string(),
            entity_id: resource.entity_id().cloned().into(),
            entity_field: resource.field().map(str::to_string).into(),
            roots_only: false,
        }
    }

    /// Root authorizations exactly on `resource`
    pub fn roots_for(resource: &Resource) -> Self {
        Self {
            roots_only: true,
            ..Self::for_resource(None, resource)
        }
    }

    /// Root authorizations on the class or any class field of `entity_class`
    pub fn broad_roots(entity_class: impl Into<String>) -> Self {
        Self {
            identity: None,
            entity_class: entity_class.into(),
            entity_id: Selector::Null,
            entity_field: Selector::Any,
            roots_only: true,
        }
    }

    /// Non-field authorizations of one identity on a class and its entities
    pub fn record_scopes(identity: &IdentityId, entity_class: impl Into<String>) -> Self {
        Self {
            identity: Some(identity.clone()),
            entity_class: entity_class.into(),
            entity_id: Selector::Any,
            entity_field: Selector::Null,
            roots_only: false,
        }
    }

    /// Whether `authorization` satisfies the query
    pub fn matches(&self, authorization: &Authorization) -> bool {
        let resource = &authorization.resource;
        let field = resource.field().map(str::to_string);

        self.identity
            .as_ref()
            .map_or(true, |identity| identity == &authorization.identity)
            && resource.entity_class() == self.entity_class
            && self.entity_id.accepts(resource.entity_id())
            && self.entity_field.accepts(field.as_ref())
            && (!self.roots_only || authorization.is_root())
    }
}

/// Identity persistence
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Insert or replace an identity
    async fn save_identity(&self, identity: SecurityIdentity) -> Result<()>;

    /// Load an identity by id
    async fn load_identity(&self, id: &IdentityId) -> Result<Option<SecurityIdentity>>;

    /// Delete an identity with all its roles and authorizations.
    ///
    /// Returns false if the identity did not exist.
    async fn delete_identity(&self, id: &IdentityId) -> Result<bool>;
}

/// Role persistence
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Persist a role; its identity must exist
    async fn save_role(&self, role: RoleRecord) -> Result<()>;

    /// Load a role by id
    async fn load_role(&self, id: RoleId) -> Result<Option<RoleRecord>>;

    /// Roles owned by an identity
    async fn roles_for(&self, identity: &IdentityId) -> Result<Vec<RoleRecord>>;

    /// Delete a role and every authorization it produced, root and derived.
    ///
    /// Returns the number of authorizations removed.
    async fn delete_role(&self, id: RoleId) -> Result<usize>;
}

/// Authorization persistence
#[async_trait]
pub trait AuthorizationStore: Send + Sync {
    /// Persist drafts in sequence order, assigning ids.
    ///
    /// Every draft parent must appear earlier in `drafts`; otherwise the
    /// batch fails with [`crate::AclError::Ordering`]. Writes are split in
    /// transactions of bounded size, committed in order, so a failure never
    /// leaves a child committed without its parent.
    async fn bulk_insert(&self, drafts: Vec<NewAuthorization>) -> Result<Vec<Authorization>>;

    /// General query primitive
    async fn find(&self, query: &AuthorizationQuery) -> Result<Vec<Authorization>>;

    /// Direct children of the given authorizations
    async fn find_children(&self, parents: &[AuthorizationId]) -> Result<Vec<Authorization>>;

    /// Delete authorizations together with their cascaded subtrees
    async fn delete_subtrees(&self, ids: &[AuthorizationId]) -> Result<usize>;

    /// Delete every authorization on a resource contained by `resource`,
    /// with their cascaded subtrees
    async fn delete_for_resource(&self, resource: &Resource) -> Result<usize>;

    /// Root authorizations whose resource exactly matches `resource`
    async fn find_root_authorizations_for_resource(
        &self,
        resource: &Resource,
    ) -> Result<Vec<Authorization>> {
        self.find(&AuthorizationQuery::roots_for(resource)).await
    }
}

/// Enumeration of existing entity instances, provided by the embedding system
#[async_trait]
pub trait ResourceEnumerator: Send + Sync {
    /// Ids of all existing instances of `entity_class`
    async fn enumerate_instances(&self, entity_class: &str) -> Result<Vec<EntityId>>;
}

/// Enumerator for systems that only cascade reactively
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInstances;

#[async_trait]
impl ResourceEnumerator for NoInstances {
    async fn enumerate_instances(&self, _entity_class: &str) -> Result<Vec<EntityId>> {
        Ok(Vec::new())
    }
}
