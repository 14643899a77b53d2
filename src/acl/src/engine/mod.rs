//! ACL engine
//!
//! Orchestrates role grants and revocations, cascades class-level
//! authorizations onto instances, and answers access checks against the
//! persisted authorization table.
//!
//! # Architecture
//!
//! ```text
//! grant ─→ RoleRules ─→ AuthorizationPlan ─→ cascade ─→ topological_order ─→ bulk_insert
//!                                                │
//!                                    ResourceEnumerator (eager)
//!
//! resource_created ─→ broad roots ─→ cascade ─→ bulk_insert
//!
//! is_allowed ─→ [Cache] ─→ lookup chain (EntityField → ClassField → Entity → Class)
//!                              ↓
//!                          [Metrics]
//! ```
//!
//! Every mutating operation validates before its first write and removes
//! its own partial writes on failure, so a failed call leaves neither a
//! root without its cascade set nor a derived authorization without its
//! root.

pub mod cache;
pub mod cascade;
pub mod metrics;

pub use cache::{CacheConfig, CacheStats, DecisionCache};
pub use cascade::CascadeStats;
pub use metrics::{EngineMetrics, MetricsCollector};

use crate::actions::Actions;
use crate::authorization::{
    Authorization, AuthorizationId, AuthorizationPlan, DraftId, NewAuthorization, ParentRef,
};
use crate::error::{AclError, Result};
use crate::identity::{IdentityId, SecurityIdentity};
use crate::ordering::topological_order;
use crate::resource::{EntityId, Resource};
use crate::role::{Role, RoleId, RoleRecord};
use crate::store::{
    AuthorizationQuery, AuthorizationStore, IdentityStore, ResourceEnumerator, RoleStore,
};

use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Attempts at writing cascades when a concurrent writer races them
const MAX_CASCADE_ATTEMPTS: usize = 3;

/// Engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cache resolved actions per (identity, resource)
    pub enable_cache: bool,

    /// Cache configuration
    pub cache: CacheConfig,

    /// Enable metrics collection
    pub enable_metrics: bool,

    /// Cascade broad grants onto existing instances at grant time
    pub eager_cascade: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_cache: true,
            cache: CacheConfig::default(),
            enable_metrics: true,
            eager_cascade: true,
        }
    }
}

impl EngineConfig {
    /// Reject unusable settings
    pub fn validate(&self) -> Result<()> {
        if self.enable_cache && self.cache.capacity == 0 {
            return Err(AclError::InvalidInput(
                "Cache capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Storage collaborators used by the engine
#[derive(Clone)]
pub struct AclStores {
    /// Identity persistence
    pub identities: Arc<dyn IdentityStore>,
    /// Role persistence
    pub roles: Arc<dyn RoleStore>,
    /// Authorization persistence
    pub authorizations: Arc<dyn AuthorizationStore>,
    /// Instance enumeration for eager cascading
    pub enumerator: Arc<dyn ResourceEnumerator>,
}

impl AclStores {
    /// One store backing every persistent trait, plus an enumerator
    pub fn persistent<S>(store: Arc<S>, enumerator: Arc<dyn ResourceEnumerator>) -> Self
    where
        S: IdentityStore + RoleStore + AuthorizationStore + 'static,
    {
        Self {
            identities: store.clone(),
            roles: store.clone(),
            authorizations: store,
            enumerator,
        }
    }

    /// One store backing every trait, enumeration included
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: IdentityStore + RoleStore + AuthorizationStore + ResourceEnumerator + 'static,
    {
        let enumerator: Arc<dyn ResourceEnumerator> = store.clone();
        Self::persistent(store, enumerator)
    }
}

/// Result of a successful grant
#[derive(Debug, Clone)]
pub struct GrantOutcome {
    /// Persisted role
    pub role: RoleRecord,
    /// Persisted authorizations, roots before their children
    pub authorizations: Vec<Authorization>,
}

impl GrantOutcome {
    /// Authorizations produced directly by the role
    pub fn roots(&self) -> impl Iterator<Item = &Authorization> {
        self.authorizations.iter().filter(|a| a.is_root())
    }

    /// Authorizations produced by cascading
    pub fn derived(&self) -> impl Iterator<Item = &Authorization> {
        self.authorizations.iter().filter(|a| a.is_derived())
    }
}

/// Entity-level access filter for one `(identity, class, action)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessFilter {
    /// Every instance of the class
    All,
    /// Only these instances (possibly none)
    Only(BTreeSet<EntityId>),
}

impl AccessFilter {
    /// Whether the filter admits `entity_id`
    pub fn permits(&self, entity_id: &EntityId) -> bool {
        match self {
            Self::All => true,
            Self::Only(ids) => ids.contains(entity_id),
        }
    }

    /// Whether the filter admits nothing
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Only(ids) if ids.is_empty())
    }
}

/// Main ACL engine
pub struct AclEngine {
    stores: AclStores,

    /// Resolved-actions cache
    cache: Option<DecisionCache>,

    /// Metrics collector
    metrics: Option<Arc<MetricsCollector>>,

    config: EngineConfig,
}

impl AclEngine {
    /// Create an engine over the given stores
    pub fn new(config: EngineConfig, stores: AclStores) -> Result<Self> {
        config.validate()?;

        let cache = config
            .enable_cache
            .then(|| DecisionCache::new(config.cache.clone()));
        let metrics = config
            .enable_metrics
            .then(|| Arc::new(MetricsCollector::new()));

        info!(
            "AclEngine initialized with cache={}, metrics={}, eager_cascade={}",
            config.enable_cache, config.enable_metrics, config.eager_cascade
        );

        Ok(Self {
            stores,
            cache,
            metrics,
            config,
        })
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Identities
    // ------------------------------------------------------------------

    /// Save a security identity
    pub async fn register_identity(&self, identity: SecurityIdentity) -> Result<()> {
        debug!("Registering identity {}", identity.id);
        self.stores.identities.save_identity(identity).await
    }

    /// Delete an identity with all its roles and authorizations
    pub async fn delete_identity(&self, identity: &IdentityId) -> Result<bool> {
        let result = self.stores.identities.delete_identity(identity).await;
        self.invalidate();
        let deleted = self.track(result).await?;

        info!("Deleted identity {} (existed={})", identity, deleted);
        Ok(deleted)
    }

    /// Roles currently granted to an identity
    pub async fn roles_of(&self, identity: &IdentityId) -> Result<Vec<RoleRecord>> {
        self.stores.roles.roles_for(identity).await
    }

    // ------------------------------------------------------------------
    // Role lifecycle
    // ------------------------------------------------------------------

    /// Grant a role to its identity.
    ///
    /// Persists the role, its root authorizations and, with eager
    /// cascading, one derived authorization per existing instance under
    /// each broad root.
    ///
    /// # Errors
    ///
    /// - [`AclError::InvalidRole`] if the role's rules target another identity
    /// - [`AclError::IdentityNotFound`] if the identity is not registered
    /// - [`AclError::InvalidInput`] if the role is bound elsewhere or already granted
    pub async fn grant(&self, identity: &IdentityId, role: &Role) -> Result<GrantOutcome> {
        let result = self.grant_inner(identity, role).await;
        self.track(result).await
    }

    async fn grant_inner(&self, identity: &IdentityId, role: &Role) -> Result<GrantOutcome> {
        info!("Granting role {} ({}) to {}", role.id(), role.kind(), identity);

        if role.identity() != identity {
            return Err(AclError::InvalidInput(format!(
                "Role {} is bound to {}, not {}",
                role.id(),
                role.identity(),
                identity
            )));
        }
        self.require_identity(identity).await?;
        if self.stores.roles.load_role(role.id()).await?.is_some() {
            return Err(AclError::InvalidInput(format!(
                "Role {} is already granted",
                role.id()
            )));
        }

        let grants = role.create_authorizations();
        if let Some(foreign) = grants.iter().find(|grant| &grant.identity != identity) {
            return Err(AclError::InvalidRole {
                kind: role.kind().to_string(),
                expected: identity.to_string(),
                found: foreign.identity.to_string(),
            });
        }

        let mut plan = AuthorizationPlan::new();
        let mut instances: HashMap<String, Vec<EntityId>> = HashMap::new();

        for grant in grants {
            let resource = grant.resource.clone();
            let root = plan.add_root(role.id(), grant);

            if !(resource.is_broad() && self.config.eager_cascade) {
                continue;
            }

            let class = resource.entity_class();
            if !instances.contains_key(class) {
                let ids = self.stores.enumerator.enumerate_instances(class).await?;
                debug!("Enumerated {} instances of {}", ids.len(), class);
                instances.insert(class.to_string(), ids);
            }

            let ids = instances.get(class).map(Vec::as_slice).unwrap_or_default();
            cascade::cascade_draft_root(&mut plan, root, &resource, ids)?;
        }

        let drafts = topological_order(plan.into_drafts())?;
        let record = role.record();
        self.stores.roles.save_role(record.clone()).await?;

        let authorizations = match self.persist_grant(drafts).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!("Grant of role {} failed, rolling back: {}", record.id, err);
                if let Err(cleanup) = self.stores.roles.delete_role(record.id).await {
                    warn!("Rollback of role {} failed: {}", record.id, cleanup);
                }
                self.invalidate();
                return Err(err);
            }
        };

        self.invalidate();
        let cascaded = authorizations.iter().filter(|a| a.is_derived()).count();
        if let Some(metrics) = &self.metrics {
            metrics.record_grant(cascaded).await;
        }

        info!(
            "Granted role {} to {}: {} authorizations ({} cascaded)",
            record.id,
            identity,
            authorizations.len(),
            cascaded
        );

        Ok(GrantOutcome {
            role: record,
            authorizations,
        })
    }

    /// Write a grant's roots, then their cascades.
    ///
    /// Cascades reference committed roots by id. Once the roots are visible
    /// a concurrent `resource_created` may materialize some of the same
    /// pairs; those are re-read and skipped.
    async fn persist_grant(&self, drafts: Vec<NewAuthorization>) -> Result<Vec<Authorization>> {
        let (root_drafts, derived): (Vec<_>, Vec<_>) =
            drafts.into_iter().partition(NewAuthorization::is_root);
        let labels: Vec<DraftId> = root_drafts.iter().map(|draft| draft.draft).collect();

        let roots = self.stores.authorizations.bulk_insert(root_drafts).await?;
        let root_ids: Vec<AuthorizationId> = roots.iter().map(|root| root.id).collect();
        let by_label: HashMap<DraftId, &Authorization> =
            labels.into_iter().zip(roots.iter()).collect();

        let mut targets = Vec::with_capacity(derived.len());
        for draft in derived {
            let root = match draft.parent {
                Some(ParentRef::Draft(label)) => by_label.get(&label).copied(),
                _ => None,
            }
            .ok_or_else(|| AclError::Internal(format!("{} has no root in this grant", draft.draft)))?;
            targets.push((root, draft.resource));
        }

        let mut children: Vec<Authorization> = Vec::new();
        let mut attempt = 0;
        loop {
            attempt += 1;

            let mut plan = AuthorizationPlan::new();
            let stats = cascade::cascade_stored_roots(&mut plan, &targets, &children)?;
            if plan.is_empty() {
                break;
            }
            if stats.skipped > 0 {
                debug!("{} cascades already materialized by another writer", stats.skipped);
            }

            match self.stores.authorizations.bulk_insert(plan.into_drafts()).await {
                Ok(rows) => {
                    children.extend(rows);
                    break;
                }
                Err(err) if err.is_duplicate_cascade() && attempt < MAX_CASCADE_ATTEMPTS => {
                    debug!("Concurrent cascade during grant: {}", err);
                    children = self.stores.authorizations.find_children(&root_ids).await?;
                }
                Err(err) => return Err(err),
            }
        }

        let mut authorizations = roots;
        authorizations.extend(children);
        Ok(authorizations)
    }

    /// Revoke a role, deleting every authorization it produced.
    ///
    /// Returns the number of authorizations removed.
    pub async fn revoke(&self, identity: &IdentityId, role: RoleId) -> Result<usize> {
        let result = self.revoke_inner(identity, role).await;
        self.track(result).await
    }

    async fn revoke_inner(&self, identity: &IdentityId, role: RoleId) -> Result<usize> {
        info!("Revoking role {} from {}", role, identity);

        let record = self
            .stores
            .roles
            .load_role(role)
            .await?
            .ok_or_else(|| AclError::RoleNotFound(role.to_string()))?;

        if &record.identity != identity {
            return Err(AclError::InvalidInput(format!(
                "Role {} belongs to {}, not {}",
                role, record.identity, identity
            )));
        }

        let result = self.stores.roles.delete_role(role).await;
        self.invalidate();
        let removed = result?;

        if let Some(metrics) = &self.metrics {
            metrics.record_revoke().await;
        }

        info!("Revoked role {}: {} authorizations removed", role, removed);
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Resource hooks
    // ------------------------------------------------------------------

    /// Materialize broad authorizations on a newly created resource.
    ///
    /// Must be called by the embedding application after creating an
    /// entity (or an entity field). Idempotent: calling it again for the
    /// same resource creates nothing.
    pub async fn resource_created(&self, resource: &Resource) -> Result<CascadeStats> {
        let result = self.resource_created_inner(resource).await;
        self.track(result).await
    }

    async fn resource_created_inner(&self, resource: &Resource) -> Result<CascadeStats> {
        info!("Resource created: {}", resource);

        if resource.is_broad() {
            return Err(AclError::InvalidInput(format!(
                "{} is not a concrete resource",
                resource
            )));
        }

        let roots = self
            .stores
            .authorizations
            .find(&AuthorizationQuery::broad_roots(resource.entity_class()))
            .await?;
        let root_ids: Vec<AuthorizationId> = roots.iter().map(|root| root.id).collect();

        let mut attempt = 0;
        loop {
            attempt += 1;

            let existing = if root_ids.is_empty() {
                Vec::new()
            } else {
                self.stores.authorizations.find_children(&root_ids).await?
            };

            let mut plan = AuthorizationPlan::new();
            let stats = cascade::cascade_new_resource(&mut plan, &roots, &existing, resource)?;

            if plan.is_empty() {
                debug!("No cascades needed for {} ({} present)", resource, stats.skipped);
                self.record_resource_event(stats).await;
                return Ok(stats);
            }

            let drafts = topological_order(plan.into_drafts())?;
            match self.stores.authorizations.bulk_insert(drafts).await {
                Ok(rows) => {
                    self.invalidate();
                    self.record_resource_event(stats).await;
                    info!("Cascaded {} authorizations onto {}", rows.len(), resource);
                    return Ok(stats);
                }
                Err(err) if err.is_duplicate_cascade() && attempt < MAX_CASCADE_ATTEMPTS => {
                    // Another writer materialized part of the set; re-plan
                    debug!("Concurrent cascade on {}: {}", resource, err);
                    self.invalidate();
                }
                Err(err) => {
                    warn!("Cascade onto {} failed, rolling back: {}", resource, err);
                    self.roll_back_cascade(&root_ids, &existing, resource).await;
                    self.invalidate();
                    return Err(err);
                }
            }
        }
    }

    /// Delete every authorization on a removed resource, with its cascades.
    ///
    /// Deleting an entity also removes authorizations on its fields;
    /// deleting a class removes everything of that class.
    pub async fn resource_deleted(&self, resource: &Resource) -> Result<usize> {
        info!("Resource deleted: {}", resource);

        let result = self.stores.authorizations.delete_for_resource(resource).await;
        self.invalidate();
        let removed = self.track(result).await?;

        self.record_resource_event(CascadeStats::default()).await;
        info!("Removed {} authorizations for {}", removed, resource);
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Access checks
    // ------------------------------------------------------------------

    /// Whether `identity` may perform `action` on `resource`.
    ///
    /// Scopes are consulted most specific first
    /// (`EntityField → ClassField → Entity → Class`); access is allowed as
    /// soon as one authorization at one of them contains the action.
    pub async fn is_allowed(
        &self,
        identity: &IdentityId,
        action: Actions,
        resource: &Resource,
    ) -> Result<bool> {
        if action.is_empty() {
            return Err(AclError::InvalidInput("No action to check".to_string()));
        }

        let start = Instant::now();
        let result = match &self.cache {
            Some(_) => self
                .allowed_actions(identity, resource)
                .await
                .map(|actions| actions.contains(action)),
            None => self
                .resolve(identity, resource, Some(action))
                .await
                .map(|actions| actions.contains(action)),
        };
        let allowed = self.track(result).await?;

        debug!(
            "Check {} {} on {}: {}",
            identity,
            action,
            resource,
            if allowed { "ALLOW" } else { "DENY" }
        );

        if let Some(metrics) = &self.metrics {
            metrics.record_check(allowed).await;
            metrics.record_latency(start.elapsed()).await;
        }
        Ok(allowed)
    }

    /// Union of actions `identity` holds on `resource` across its lookup chain
    pub async fn allowed_actions(&self, identity: &IdentityId, resource: &Resource) -> Result<Actions> {
        let generation = self.cache.as_ref().map(DecisionCache::generation);
        if let Some(cache) = &self.cache {
            if let Some(actions) = cache.get(identity, resource) {
                if let Some(metrics) = &self.metrics {
                    metrics.record_cache_hit().await;
                }
                return Ok(actions);
            }
            if let Some(metrics) = &self.metrics {
                metrics.record_cache_miss().await;
            }
        }

        let actions = self.resolve(identity, resource, None).await?;
        if let (Some(cache), Some(generation)) = (&self.cache, generation) {
            if !cache.put_if_current(generation, identity, resource, actions) {
                debug!("Discarding actions of {} on {} resolved before a write", identity, resource);
            }
        }
        Ok(actions)
    }

    /// Instances of `entity_class` on which `identity` may perform `action`.
    ///
    /// This is the contract a query builder needs to filter rows: either
    /// the whole class or an explicit id set.
    pub async fn access_filter(
        &self,
        identity: &IdentityId,
        entity_class: &str,
        action: Actions,
    ) -> Result<AccessFilter> {
        let rows = self
            .stores
            .authorizations
            .find(&AuthorizationQuery::record_scopes(identity, entity_class))
            .await?;

        let mut ids = BTreeSet::new();
        for row in rows.iter().filter(|row| row.actions.contains(action)) {
            match row.resource.entity_id() {
                None => return Ok(AccessFilter::All),
                Some(id) => {
                    ids.insert(id.clone());
                }
            }
        }
        Ok(AccessFilter::Only(ids))
    }

    /// Cache statistics
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(DecisionCache::stats)
    }

    /// Current metrics
    pub async fn get_metrics(&self) -> Option<EngineMetrics> {
        match &self.metrics {
            Some(metrics) => Some(metrics.get_metrics().await),
            None => None,
        }
    }

    /// Metrics in Prometheus text format
    pub async fn export_metrics(&self) -> Option<String> {
        match &self.metrics {
            Some(metrics) => Some(metrics.export_prometheus().await),
            None => None,
        }
    }

    // Private helper methods

    /// Walk the lookup chain, stopping early once `wanted` is covered
    async fn resolve(
        &self,
        identity: &IdentityId,
        resource: &Resource,
        wanted: Option<Actions>,
    ) -> Result<Actions> {
        let mut actions = Actions::empty();

        for scope in resource.lookup_chain() {
            let found = self
                .stores
                .authorizations
                .find(&AuthorizationQuery::for_resource(Some(identity), &scope))
                .await?;

            for authorization in &found {
                actions |= authorization.actions;
            }
            debug!("Scope {}: {} authorizations", scope, found.len());

            if wanted.map_or(false, |wanted| actions.contains(wanted)) {
                break;
            }
        }
        Ok(actions)
    }

    async fn require_identity(&self, identity: &IdentityId) -> Result<()> {
        match self.stores.identities.load_identity(identity).await? {
            Some(_) => Ok(()),
            None => Err(AclError::IdentityNotFound(identity.to_string())),
        }
    }

    /// Remove derived authorizations on `resource` created since `existing`
    async fn roll_back_cascade(
        &self,
        root_ids: &[AuthorizationId],
        existing: &[Authorization],
        resource: &Resource,
    ) {
        let before: HashSet<AuthorizationId> = existing.iter().map(|a| a.id).collect();

        let children = match self.stores.authorizations.find_children(root_ids).await {
            Ok(children) => children,
            Err(err) => {
                warn!("Rollback lookup for {} failed: {}", resource, err);
                return;
            }
        };

        let created: Vec<AuthorizationId> = children
            .iter()
            .filter(|child| !before.contains(&child.id) && resource.contains(&child.resource))
            .map(|child| child.id)
            .collect();

        if created.is_empty() {
            return;
        }
        if let Err(err) = self.stores.authorizations.delete_subtrees(&created).await {
            warn!("Rollback of {} cascades failed: {}", created.len(), err);
        }
    }

    async fn record_resource_event(&self, stats: CascadeStats) {
        if let Some(metrics) = &self.metrics {
            metrics
                .record_resource_event(stats.planned, stats.skipped)
                .await;
        }
    }

    async fn track<T>(&self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            if let Some(metrics) = &self.metrics {
                metrics.record_error().await;
            }
        }
        result
    }

    fn invalidate(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }
}
