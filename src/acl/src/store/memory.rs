//! In-memory ACL store
//!
//! All tables live behind one `RwLock`, so each trait call (and each
//! bulk-insert batch) is atomic with respect to every other call.

use super::{
    AuthorizationQuery, AuthorizationStore, IdentityStore, ResourceEnumerator, RoleStore,
    StoreConfig,
};
use crate::authorization::{Authorization, AuthorizationId, DraftId, NewAuthorization, ParentRef};
use crate::error::{AclError, Result};
use crate::identity::{IdentityId, SecurityIdentity};
use crate::resource::{EntityId, Resource};
use crate::role::{RoleId, RoleRecord};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct AclTables {
    identities: HashMap<IdentityId, SecurityIdentity>,
    roles: HashMap<RoleId, RoleRecord>,
    authorizations: BTreeMap<AuthorizationId, Authorization>,
    children: HashMap<AuthorizationId, Vec<AuthorizationId>>,
    next_id: i64,
}

impl AclTables {
    /// Seeds plus all their descendants
    fn subtree(&self, seeds: impl IntoIterator<Item = AuthorizationId>) -> Vec<AuthorizationId> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<AuthorizationId> = seeds.into_iter().collect();
        let mut out = Vec::new();

        while let Some(id) = queue.pop_front() {
            if !self.authorizations.contains_key(&id) || !seen.insert(id) {
                continue;
            }
            out.push(id);
            if let Some(children) = self.children.get(&id) {
                queue.extend(children.iter().copied());
            }
        }
        out
    }

    fn remove_subtrees(&mut self, seeds: impl IntoIterator<Item = AuthorizationId>) -> usize {
        let ids = self.subtree(seeds);
        for id in &ids {
            if let Some(removed) = self.authorizations.remove(id) {
                if let Some(parent) = removed.parent {
                    if let Some(siblings) = self.children.get_mut(&parent) {
                        siblings.retain(|child| child != id);
                    }
                }
            }
            self.children.remove(id);
        }
        ids.len()
    }

    fn has_child_on(&self, parent: AuthorizationId, resource: &Resource) -> bool {
        self.children.get(&parent).map_or(false, |children| {
            children.iter().any(|child| {
                self.authorizations
                    .get(child)
                    .map_or(false, |a| &a.resource == resource)
            })
        })
    }

    /// Validate one batch and turn it into persisted rows without mutating
    /// the tables. `assigned` holds ids given to drafts of earlier batches.
    fn stage(
        &self,
        batch: Vec<NewAuthorization>,
        assigned: &HashMap<DraftId, AuthorizationId>,
    ) -> Result<(Vec<Authorization>, HashMap<DraftId, AuthorizationId>)> {
        let now = Utc::now();
        let mut next_id = self.next_id;
        let mut batch_assigned: HashMap<DraftId, AuthorizationId> = HashMap::new();
        let mut staged_pairs: HashSet<(AuthorizationId, Resource)> = HashSet::new();
        let mut rows = Vec::with_capacity(batch.len());

        for draft in batch {
            if !self.identities.contains_key(&draft.identity) {
                return Err(AclError::IdentityNotFound(draft.identity.to_string()));
            }
            if !self.roles.contains_key(&draft.role) {
                return Err(AclError::RoleNotFound(draft.role.to_string()));
            }
            if assigned.contains_key(&draft.draft) || batch_assigned.contains_key(&draft.draft) {
                return Err(AclError::Ordering(format!("Duplicate {} in batch", draft.draft)));
            }

            let parent = match draft.parent {
                None => None,
                Some(ParentRef::Draft(label)) => {
                    if let Some(&id) = batch_assigned.get(&label) {
                        Some(id)
                    } else if let Some(&id) = assigned.get(&label) {
                        // Committed by an earlier batch, possibly deleted since
                        if !self.authorizations.contains_key(&id) {
                            return Err(AclError::UnknownParent(id.0));
                        }
                        Some(id)
                    } else {
                        return Err(AclError::Ordering(format!(
                            "{} inserted before its parent {} was assigned an id",
                            draft.draft, label
                        )));
                    }
                }
                Some(ParentRef::Persisted(id)) => {
                    if !self.authorizations.contains_key(&id) {
                        return Err(AclError::UnknownParent(id.0));
                    }
                    Some(id)
                }
            };

            if let Some(parent) = parent {
                if self.has_child_on(parent, &draft.resource)
                    || !staged_pairs.insert((parent, draft.resource.clone()))
                {
                    return Err(AclError::DuplicateCascade {
                        parent: parent.0,
                        resource: draft.resource.to_string(),
                    });
                }
            }

            next_id += 1;
            let id = AuthorizationId(next_id);
            batch_assigned.insert(draft.draft, id);
            rows.push(Authorization::from_draft(draft, id, parent, now));
        }

        Ok((rows, batch_assigned))
    }

    fn commit(&mut self, rows: &[Authorization]) {
        for row in rows {
            if let Some(parent) = row.parent {
                self.children.entry(parent).or_default().push(row.id);
            }
            self.next_id = self.next_id.max(row.id.0);
            self.authorizations.insert(row.id, row.clone());
        }
    }
}

/// In-memory implementation of every store trait
#[derive(Clone)]
pub struct InMemoryAclStore {
    tables: Arc<RwLock<AclTables>>,
    instances: Arc<RwLock<HashMap<String, BTreeSet<EntityId>>>>,
    config: StoreConfig,
}

impl InMemoryAclStore {
    /// Create an empty store with default configuration
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create an empty store
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            tables: Arc::new(RwLock::new(AclTables::default())),
            instances: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Make an entity visible to eager cascading
    pub async fn register_instance(&self, entity_class: &str, entity_id: impl Into<EntityId>) {
        let mut instances = self.instances.write().await;
        instances
            .entry(entity_class.to_string())
            .or_default()
            .insert(entity_id.into());
    }

    /// Remove an entity from enumeration
    pub async fn unregister_instance(&self, entity_class: &str, entity_id: &EntityId) {
        let mut instances = self.instances.write().await;
        if let Some(ids) = instances.get_mut(entity_class) {
            ids.remove(entity_id);
        }
    }

    /// Number of stored authorizations
    pub async fn authorization_count(&self) -> usize {
        self.tables.read().await.authorizations.len()
    }

    /// Snapshot of all stored authorizations, ordered by id
    pub async fn authorizations(&self) -> Vec<Authorization> {
        self.tables
            .read()
            .await
            .authorizations
            .values()
            .cloned()
            .collect()
    }
}

impl Default for InMemoryAclStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityStore for InMemoryAclStore {
    async fn save_identity(&self, identity: SecurityIdentity) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.identities.insert(identity.id.clone(), identity);
        Ok(())
    }

    async fn load_identity(&self, id: &IdentityId) -> Result<Option<SecurityIdentity>> {
        let tables = self.tables.read().await;
        Ok(tables.identities.get(id).cloned())
    }

    async fn delete_identity(&self, id: &IdentityId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        if tables.identities.remove(id).is_none() {
            return Ok(false);
        }

        tables.roles.retain(|_, role| &role.identity != id);
        let owned: Vec<AuthorizationId> = tables
            .authorizations
            .values()
            .filter(|a| &a.identity == id)
            .map(|a| a.id)
            .collect();
        let removed = tables.remove_subtrees(owned);

        debug!("Deleted identity {} with {} authorizations", id, removed);
        Ok(true)
    }
}

#[async_trait]
impl RoleStore for InMemoryAclStore {
    async fn save_role(&self, role: RoleRecord) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.identities.contains_key(&role.identity) {
            return Err(AclError::IdentityNotFound(role.identity.to_string()));
        }
        tables.roles.insert(role.id, role);
        Ok(())
    }

    async fn load_role(&self, id: RoleId) -> Result<Option<RoleRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.roles.get(&id).cloned())
    }

    async fn roles_for(&self, identity: &IdentityId) -> Result<Vec<RoleRecord>> {
        let tables = self.tables.read().await;
        let mut roles: Vec<RoleRecord> = tables
            .roles
            .values()
            .filter(|role| &role.identity == identity)
            .cloned()
            .collect();
        roles.sort_by_key(|role| role.created_at);
        Ok(roles)
    }

    async fn delete_role(&self, id: RoleId) -> Result<usize> {
        let mut tables = self.tables.write().await;
        if tables.roles.remove(&id).is_none() {
            return Err(AclError::RoleNotFound(id.to_string()));
        }

        let produced: Vec<AuthorizationId> = tables
            .authorizations
            .values()
            .filter(|a| a.role == id)
            .map(|a| a.id)
            .collect();
        Ok(tables.remove_subtrees(produced))
    }
}

#[async_trait]
impl AuthorizationStore for InMemoryAclStore {
    async fn bulk_insert(&self, drafts: Vec<NewAuthorization>) -> Result<Vec<Authorization>> {
        let batch_size = self.config.batch_size.max(1);
        let mut assigned: HashMap<DraftId, AuthorizationId> = HashMap::new();
        let mut persisted = Vec::with_capacity(drafts.len());
        let mut pending = drafts.into_iter();

        loop {
            let batch: Vec<NewAuthorization> = pending.by_ref().take(batch_size).collect();
            if batch.is_empty() {
                break;
            }

            let mut tables = self.tables.write().await;
            let (rows, batch_assigned) = tables.stage(batch, &assigned)?;
            tables.commit(&rows);
            drop(tables);

            debug!("Committed authorization batch of {}", rows.len());
            assigned.extend(batch_assigned);
            persisted.extend(rows);
        }

        Ok(persisted)
    }

    async fn find(&self, query: &AuthorizationQuery) -> Result<Vec<Authorization>> {
        let tables = self.tables.read().await;
        Ok(tables
            .authorizations
            .values()
            .filter(|a| query.matches(a))
            .cloned()
            .collect())
    }

    async fn find_children(&self, parents: &[AuthorizationId]) -> Result<Vec<Authorization>> {
        let tables = self.tables.read().await;
        Ok(parents
            .iter()
            .filter_map(|parent| tables.children.get(parent))
            .flatten()
            .filter_map(|child| tables.authorizations.get(child))
            .cloned()
            .collect())
    }

    async fn delete_subtrees(&self, ids: &[AuthorizationId]) -> Result<usize> {
        let mut tables = self.tables.write().await;
        Ok(tables.remove_subtrees(ids.iter().copied()))
    }

    async fn delete_for_resource(&self, resource: &Resource) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let covered: Vec<AuthorizationId> = tables
            .authorizations
            .values()
            .filter(|a| resource.contains(&a.resource))
            .map(|a| a.id)
            .collect();
        Ok(tables.remove_subtrees(covered))
    }
}

#[async_trait]
impl ResourceEnumerator for InMemoryAclStore {
    async fn enumerate_instances(&self, entity_class: &str) -> Result<Vec<EntityId>> {
        let instances = self.instances.read().await;
        Ok(instances
            .get(entity_class)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default())
    }
}
