//! Authorization records and batch planning
//!
//! Authorizations form a forest: roots come straight from a role, derived
//! authorizations point at the broad root they were cascaded from. Parents
//! are referenced by id, never by embedded value. Before persistence a
//! record is a [`NewAuthorization`] whose parent is either an already
//! stored id or a [`DraftId`] of another record in the same batch.

use crate::actions::Actions;
use crate::error::{AclError, Result};
use crate::identity::IdentityId;
use crate::resource::Resource;
use crate::role::{Grant, RoleId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Store-assigned authorization identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorizationId(pub i64);

impl fmt::Display for AuthorizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Batch-local label of an unpersisted authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DraftId(pub u32);

impl fmt::Display for DraftId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "draft-{}", self.0)
    }
}

/// Parent reference of an unpersisted authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParentRef {
    /// Another draft in the same batch
    Draft(DraftId),
    /// An authorization already in the store
    Persisted(AuthorizationId),
}

/// Authorization awaiting persistence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuthorization {
    /// Batch-local label
    pub draft: DraftId,
    /// Authorized identity
    pub identity: IdentityId,
    /// Role that produced it
    pub role: RoleId,
    /// Authorized resource
    pub resource: Resource,
    /// Authorized actions
    pub actions: Actions,
    /// Cascade parent, if derived
    pub parent: Option<ParentRef>,
}

impl NewAuthorization {
    /// Root authorization (no parent)
    pub fn root(draft: DraftId, role: RoleId, grant: Grant) -> Self {
        Self {
            draft,
            identity: grant.identity,
            role,
            resource: grant.resource,
            actions: grant.actions,
            parent: None,
        }
    }

    /// Whether this draft has no parent
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Persisted authorization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    /// Store-assigned identifier
    pub id: AuthorizationId,
    /// Authorized identity
    pub identity: IdentityId,
    /// Role that produced it
    pub role: RoleId,
    /// Authorized resource
    pub resource: Resource,
    /// Authorized actions
    pub actions: Actions,
    /// Cascade parent, if derived
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<AuthorizationId>,
    /// Persistence timestamp
    pub created_at: DateTime<Utc>,
}

impl Authorization {
    /// Whether this authorization came directly from a role
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Whether this authorization was produced by cascading
    pub fn is_derived(&self) -> bool {
        self.parent.is_some()
    }

    /// Promote a draft once the store has assigned its id and parent id
    pub fn from_draft(
        draft: NewAuthorization,
        id: AuthorizationId,
        parent: Option<AuthorizationId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            identity: draft.identity,
            role: draft.role,
            resource: draft.resource,
            actions: draft.actions,
            parent,
            created_at,
        }
    }
}

/// Builder for one batch of drafts.
///
/// Tracks `(parent, resource)` pairs so a derived authorization is planned
/// at most once per parent, including pairs already in the store.
#[derive(Debug, Default)]
pub struct AuthorizationPlan {
    next_draft: u32,
    drafts: Vec<NewAuthorization>,
    index: HashMap<DraftId, usize>,
    derived: HashSet<(ParentRef, Resource)>,
}

impl AuthorizationPlan {
    /// Create an empty plan
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of planned drafts
    pub fn len(&self) -> usize {
        self.drafts.len()
    }

    /// Whether nothing is planned
    pub fn is_empty(&self) -> bool {
        self.drafts.is_empty()
    }

    /// Planned drafts, in planning order
    pub fn drafts(&self) -> &[NewAuthorization] {
        &self.drafts
    }

    /// Consume the plan
    pub fn into_drafts(self) -> Vec<NewAuthorization> {
        self.drafts
    }

    /// Look up a planned draft
    pub fn get(&self, draft: DraftId) -> Option<&NewAuthorization> {
        self.index.get(&draft).map(|&idx| &self.drafts[idx])
    }

    /// Record that `parent` already has a derived authorization on `resource`
    pub fn mark_existing(&mut self, parent: AuthorizationId, resource: Resource) {
        self.derived.insert((ParentRef::Persisted(parent), resource));
    }

    /// Plan a root authorization for a role's grant
    pub fn add_root(&mut self, role: RoleId, grant: Grant) -> DraftId {
        let draft = self.allocate();
        self.push(NewAuthorization::root(draft, role, grant));
        draft
    }

    /// Plan a derived authorization under a draft root
    pub fn derive_from_draft(&mut self, parent: DraftId, resource: Resource) -> Result<DraftId> {
        let root = self
            .get(parent)
            .ok_or_else(|| AclError::Ordering(format!("Parent {} is not part of this plan", parent)))?;

        let identity = root.identity.clone();
        let role = root.role;
        let actions = root.actions;
        let parent_resource = root.resource.clone();

        self.push_derived(
            ParentRef::Draft(parent),
            &parent_resource,
            identity,
            role,
            actions,
            resource,
            i64::from(parent.0),
        )
    }

    /// Plan a derived authorization under a stored root
    pub fn derive_from(&mut self, parent: &Authorization, resource: Resource) -> Result<DraftId> {
        self.push_derived(
            ParentRef::Persisted(parent.id),
            &parent.resource,
            parent.identity.clone(),
            parent.role,
            parent.actions,
            resource,
            parent.id.0,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn push_derived(
        &mut self,
        parent: ParentRef,
        parent_resource: &Resource,
        identity: IdentityId,
        role: RoleId,
        actions: Actions,
        resource: Resource,
        parent_label: i64,
    ) -> Result<DraftId> {
        if !parent_resource.is_broad()
            || parent_resource == &resource
            || !parent_resource.generalizes(&resource)
        {
            return Err(AclError::InvalidInput(format!(
                "{} does not cascade to {}",
                parent_resource, resource
            )));
        }

        let key = (parent, resource);
        if self.derived.contains(&key) {
            return Err(AclError::DuplicateCascade {
                parent: parent_label,
                resource: key.1.to_string(),
            });
        }
        let (parent, resource) = key;
        self.derived.insert((parent, resource.clone()));

        let draft = self.allocate();
        self.push(NewAuthorization {
            draft,
            identity,
            role,
            resource,
            actions,
            parent: Some(parent),
        });
        Ok(draft)
    }

    fn allocate(&mut self) -> DraftId {
        let draft = DraftId(self.next_draft);
        self.next_draft += 1;
        draft
    }

    fn push(&mut self, draft: NewAuthorization) {
        self.index.insert(draft.draft, self.drafts.len());
        self.drafts.push(draft);
    }
}
