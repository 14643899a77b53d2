//! Parent-before-child ordering for authorization batches
//!
//! Uses Kahn's algorithm over the draft parent edges to:
//! 1. Detect references to drafts missing from the batch
//! 2. Detect cycles in draft parent pointers
//! 3. Produce an insertion order in which every parent precedes its children
//!
//! The sort is stable: ties are broken by input position, so an already
//! valid batch comes back unchanged.

use crate::authorization::{DraftId, NewAuthorization, ParentRef};
use crate::error::{AclError, Result};
use std::collections::{HashMap, HashSet, VecDeque};

/// Reorder `drafts` so every draft parent precedes its children.
///
/// # Errors
///
/// Returns [`AclError::Ordering`] if:
/// - Two drafts share a [`DraftId`]
/// - A draft references a parent draft that is not in the batch
/// - Draft parent pointers form a cycle
pub fn topological_order(drafts: Vec<NewAuthorization>) -> Result<Vec<NewAuthorization>> {
    if drafts.is_empty() {
        return Ok(drafts);
    }

    let mut position: HashMap<DraftId, usize> = HashMap::with_capacity(drafts.len());
    for (idx, draft) in drafts.iter().enumerate() {
        if position.insert(draft.draft, idx).is_some() {
            return Err(AclError::Ordering(format!("Duplicate {} in batch", draft.draft)));
        }
    }

    // Reverse edges (parent -> children) and in-degrees
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); drafts.len()];
    let mut in_degree: Vec<usize> = vec![0; drafts.len()];

    for (idx, draft) in drafts.iter().enumerate() {
        if let Some(ParentRef::Draft(parent)) = draft.parent {
            let parent_idx = *position.get(&parent).ok_or_else(|| {
                AclError::Ordering(format!(
                    "{} references {} which is not in the batch",
                    draft.draft, parent
                ))
            })?;
            children[parent_idx].push(idx);
            in_degree[idx] += 1;
        }
    }

    let mut queue: VecDeque<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(idx, _)| idx)
        .collect();

    let mut order = Vec::with_capacity(drafts.len());
    while let Some(current) = queue.pop_front() {
        order.push(current);
        for &child in &children[current] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                queue.push_back(child);
            }
        }
    }

    if order.len() != drafts.len() {
        let stuck: Vec<String> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree > 0)
            .map(|(idx, _)| drafts[idx].draft.to_string())
            .collect();
        return Err(AclError::Ordering(format!(
            "Cycle in draft parents: {}",
            stuck.join(", ")
        )));
    }

    let mut slots: Vec<Option<NewAuthorization>> = drafts.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|idx| slots[idx].take())
        .collect())
}

/// Whether every draft parent appears before its child
pub fn is_topological(drafts: &[NewAuthorization]) -> bool {
    let mut seen: HashSet<DraftId> = HashSet::with_capacity(drafts.len());
    for draft in drafts {
        if let Some(ParentRef::Draft(parent)) = draft.parent {
            if !seen.contains(&parent) {
                return false;
            }
        }
        seen.insert(draft.draft);
    }
    true
}
