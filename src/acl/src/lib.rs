//! CretoAI ACL Engine
//!
//! Role-based access control over persisted authorizations, with
//! hierarchical cascading from classes and class fields onto concrete
//! entities and entity fields.
//!
//! # Features
//!
//! - **Roles**: rule sets that expand into `(resource, actions)` pairs once, at grant time
//! - **Cascading**: broad grants materialized on every instance they generalize, idempotently
//! - **Ordered persistence**: parents always written before their cascaded children
//! - **Access checks**: most-specific-first lookup over four resource scopes
//! - **Caching**: BLAKE3-keyed resolved-actions cache, cleared on every write
//! - **Storage**: in-memory store, PostgreSQL store behind the `postgres` feature
//!
//! # Example
//!
//! ```rust,no_run
//! use cretoai_acl::{
//!     Actions, AclEngine, AclStores, EngineConfig, IdentityId, InMemoryAclStore, Resource,
//!     Role, SecurityIdentity, StaticRole,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> cretoai_acl::Result<()> {
//!     let store = Arc::new(InMemoryAclStore::new());
//!     let engine = AclEngine::new(EngineConfig::default(), AclStores::shared(store.clone()))?;
//!
//!     let alice = IdentityId::new("user:alice");
//!     engine.register_identity(SecurityIdentity::new(alice.clone())).await?;
//!
//!     let role = Role::new(
//!         alice.clone(),
//!         StaticRole::new("article_reader").allow(Resource::class("Article")?, Actions::VIEW),
//!     );
//!     engine.grant(&alice, &role).await?;
//!
//!     // New articles inherit the class-level grant once announced
//!     store.register_instance("Article", "42").await;
//!     let article = Resource::entity("Article", "42")?;
//!     engine.resource_created(&article).await?;
//!
//!     assert!(engine.is_allowed(&alice, Actions::VIEW, &article).await?);
//!     assert!(!engine.is_allowed(&alice, Actions::EDIT, &article).await?);
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod authorization;
pub mod engine;
pub mod error;
pub mod identity;
pub mod ordering;
pub mod resource;
pub mod role;
pub mod store;

pub use actions::Actions;
pub use authorization::{
    Authorization, AuthorizationId, AuthorizationPlan, DraftId, NewAuthorization, ParentRef,
};
pub use engine::{
    AccessFilter, AclEngine, AclStores, CacheConfig, CacheStats, CascadeStats, EngineConfig,
    EngineMetrics, GrantOutcome,
};
pub use error::{AclError, Result};
pub use identity::{IdentityId, SecurityIdentity};
pub use ordering::{is_topological, topological_order};
pub use resource::{EntityId, Resource, ResourceKind};
pub use role::{Grant, ResourceRole, Role, RoleId, RoleRecord, RoleRules, StaticRole};
pub use store::{
    AuthorizationQuery, AuthorizationStore, IdentityStore, InMemoryAclStore, NoInstances,
    ResourceEnumerator, RoleStore, Selector, StoreConfig, DEFAULT_BATCH_SIZE,
};

#[cfg(feature = "postgres")]
pub use store::PostgresAclStore;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
