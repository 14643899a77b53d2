//! Cascade planning
//!
//! A root authorization on a class (or class field) is materialized on every
//! concrete instance it generalizes, with the same identity, role and
//! actions and `parent = root`. `(parent, resource)` is a uniqueness key:
//! pairs that already exist are skipped, never duplicated.
//!
//! Planning is pure; the engine persists the resulting drafts.

use crate::authorization::{Authorization, AuthorizationPlan, DraftId};
use crate::error::{AclError, Result};
use crate::resource::{EntityId, Resource};
use tracing::debug;

/// Outcome of one planning pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeStats {
    /// Derived drafts added to the plan
    pub planned: usize,
    /// Pairs skipped because they already exist
    pub skipped: usize,
}

impl CascadeStats {
    fn absorb(&mut self, outcome: Result<DraftId>) -> Result<()> {
        match outcome {
            Ok(_) => {
                self.planned += 1;
                Ok(())
            }
            Err(err) if err.is_duplicate_cascade() => {
                debug!("Skipping existing cascade: {}", err);
                self.skipped += 1;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// Cascade a root planned in the same batch over known instances
pub fn cascade_draft_root(
    plan: &mut AuthorizationPlan,
    root: DraftId,
    root_resource: &Resource,
    instances: &[EntityId],
) -> Result<CascadeStats> {
    let mut stats = CascadeStats::default();
    if !root_resource.is_broad() {
        return Ok(stats);
    }

    for entity_id in instances {
        if let Some(target) = root_resource.instance(entity_id) {
            stats.absorb(plan.derive_from_draft(root, target))?;
        }
    }
    Ok(stats)
}

/// Re-plan cascades of stored roots onto given targets, skipping pairs
/// already materialized
pub fn cascade_stored_roots(
    plan: &mut AuthorizationPlan,
    targets: &[(&Authorization, Resource)],
    existing_children: &[Authorization],
) -> Result<CascadeStats> {
    mark_existing(plan, existing_children);

    let mut stats = CascadeStats::default();
    for (root, target) in targets {
        stats.absorb(plan.derive_from(root, target.clone()))?;
    }
    Ok(stats)
}

/// Cascade stored broad roots onto a newly created concrete resource.
///
/// For an entity this reaches the class roots and every class-field root
/// (the entity's fields come into existence with it); for an entity field
/// only the matching class-field roots.
pub fn cascade_new_resource(
    plan: &mut AuthorizationPlan,
    roots: &[Authorization],
    existing_children: &[Authorization],
    resource: &Resource,
) -> Result<CascadeStats> {
    let entity_id = resource.entity_id().ok_or_else(|| {
        AclError::InvalidInput(format!("{} is not a concrete resource", resource))
    })?;

    mark_existing(plan, existing_children);

    let mut stats = CascadeStats::default();
    for root in roots {
        if !root.is_root() || !root.resource.is_broad() {
            continue;
        }
        if root.resource.entity_class() != resource.entity_class() {
            continue;
        }

        let Some(target) = root.resource.instance(entity_id) else {
            continue;
        };
        if !resource.contains(&target) {
            continue;
        }

        stats.absorb(plan.derive_from(root, target))?;
    }
    Ok(stats)
}

fn mark_existing(plan: &mut AuthorizationPlan, children: &[Authorization]) {
    for child in children {
        if let Some(parent) = child.parent {
            plan.mark_existing(parent, child.resource.clone());
        }
    }
}
