//! Pure traversal helpers over a pathway's node map.
//!
//! None of these functions mutate their input. Helpers that return node keys return them in
//! node map order, so "first" always means first in document order.

use crate::model::{Action, NodeMap, Pathway, PathwayNode, Transition};
use crate::{PathwayError, PathwayResult};
use fhir::CodeableConcept;
use indexmap::{IndexMap, IndexSet};
use pathways_uuid::ShortId;
use std::collections::VecDeque;
use std::sync::Arc;

/// A transition together with the key of the node it leaves from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransitionRef<'a> {
    pub source: &'a str,
    pub transition: &'a Transition,
}

/// Key of the first node (in map order) with a transition into `key`.
///
/// A node reachable from several parents gets whichever comes first as its primary parent.
pub fn find_parent<'a>(nodes: &'a NodeMap, key: &str) -> Option<&'a str> {
    nodes
        .iter()
        .find(|(_, node)| node.transitions.iter().any(|t| t.transition == key))
        .map(|(k, _)| k.as_str())
}

/// Every transition in the graph that points at `key`, in map order.
///
/// More than one entry means `key` is a merge point with several parents.
pub fn find_all_transitions<'a>(nodes: &'a NodeMap, key: &str) -> Vec<TransitionRef<'a>> {
    nodes
        .iter()
        .flat_map(|(source, node)| {
            node.transitions
                .iter()
                .filter(move |t| t.transition == key)
                .map(move |transition| TransitionRef {
                    source: source.as_str(),
                    transition,
                })
        })
        .collect()
}

/// Keys reachable from `root` by following transitions forward, `root` first, in
/// breadth-first order.
///
/// # Errors
///
/// Returns [`PathwayError::NodeNotFound`] if `root` is missing and
/// [`PathwayError::DanglingTransition`] if a reachable transition targets a missing node.
pub fn reachable_keys(nodes: &NodeMap, root: &str) -> PathwayResult<IndexSet<String>> {
    if !nodes.contains_key(root) {
        return Err(PathwayError::NodeNotFound(root.to_owned()));
    }

    let mut seen = IndexSet::new();
    let mut queue = VecDeque::from([root.to_owned()]);
    seen.insert(root.to_owned());

    while let Some(key) = queue.pop_front() {
        let node = nodes
            .get(&key)
            .ok_or_else(|| PathwayError::NodeNotFound(key.clone()))?;
        for t in &node.transitions {
            if !nodes.contains_key(&t.transition) {
                return Err(PathwayError::DanglingTransition {
                    from: key.clone(),
                    to: t.transition.clone(),
                });
            }
            if seen.insert(t.transition.clone()) {
                queue.push_back(t.transition.clone());
            }
        }
    }

    Ok(seen)
}

/// A copy of the subgraph under a node, with fresh keys.
#[derive(Clone, Debug, PartialEq)]
pub struct SubPathway {
    /// Fresh key of the copied root.
    pub root: String,
    /// Copied nodes keyed by their fresh keys.
    pub nodes: NodeMap,
    /// Original key to fresh key.
    pub key_map: IndexMap<String, String>,
}

/// Copy the subgraph reachable from `root`, giving every copied node a fresh key.
///
/// Transitions between copied nodes are remapped to the fresh keys. Only forward edges are
/// followed, so parents of `root` are never copied. Fresh keys avoid every key in `nodes`.
///
/// # Errors
///
/// Returns the errors of [`reachable_keys`], or [`PathwayError::IdAllocation`] if no fresh
/// key could be generated.
pub fn find_sub_pathway(nodes: &NodeMap, root: &str) -> PathwayResult<SubPathway> {
    let reachable = reachable_keys(nodes, root)?;

    let mut key_map: IndexMap<String, String> = IndexMap::with_capacity(reachable.len());
    for key in &reachable {
        let fresh = ShortId::generate_unique(|candidate| {
            nodes.contains_key(candidate) || key_map.values().any(|v| v == candidate)
        })?;
        key_map.insert(key.clone(), fresh.into_string());
    }

    let mut copied = NodeMap::with_capacity(reachable.len());
    for (old_key, new_key) in &key_map {
        let original = nodes
            .get(old_key)
            .ok_or_else(|| PathwayError::NodeNotFound(old_key.clone()))?;
        let mut node = PathwayNode::clone(original);
        node.key = new_key.clone();
        for t in &mut node.transitions {
            if let Some(mapped) = key_map.get(&t.transition) {
                t.transition = mapped.clone();
            }
        }
        copied.insert(new_key.clone(), Arc::new(node));
    }

    let root = key_map
        .get(root)
        .cloned()
        .ok_or_else(|| PathwayError::NodeNotFound(root.to_owned()))?;

    Ok(SubPathway {
        root,
        nodes: copied,
        key_map,
    })
}

/// The nearest action nodes below `key`.
///
/// Walks forward from `key`; an action node is collected and not descended into, branch
/// nodes are passed through. Reference and untyped nodes end a path without being
/// collected.
pub fn find_all_child_action_nodes(nodes: &NodeMap, key: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut seen: IndexSet<&str> = IndexSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();

    if let Some(node) = nodes.get(key) {
        queue.extend(node.transitions.iter().map(|t| t.transition.as_str()));
    }

    while let Some(child_key) = queue.pop_front() {
        if !seen.insert(child_key) {
            continue;
        }
        let Some(child) = nodes.get(child_key) else {
            continue;
        };
        if child.is_action_node() {
            found.push(child_key.to_owned());
        } else if child.is_branch_node() {
            queue.extend(child.transitions.iter().map(|t| t.transition.as_str()));
        }
    }

    found
}

/// The nearest action node above `key`, passing through branch nodes.
///
/// Follows primary parents ([`find_parent`]) and stops at the first action node, or at the
/// first ancestor that is neither an action nor a branch.
pub fn find_nearest_action_ancestor<'a>(nodes: &'a NodeMap, key: &str) -> Option<&'a str> {
    let mut seen: IndexSet<&str> = IndexSet::new();
    let mut current = find_parent(nodes, key)?;

    loop {
        if !seen.insert(current) {
            return None;
        }
        let node = nodes.get(current)?;
        if node.is_action_node() {
            return Some(current);
        }
        if !node.is_branch_node() {
            return None;
        }
        current = find_parent(nodes, current)?;
    }
}

/// A structural clone of `pathway` that shares no nodes with it.
///
/// Exporters take one before rewriting anything, so the document held by the editor never
/// changes as a side effect of an export.
pub fn deep_copy_pathway(pathway: &Pathway) -> Pathway {
    let mut copy = pathway.clone();
    for node in copy.nodes.values_mut() {
        *node = Arc::new(PathwayNode::clone(node));
    }
    copy
}

/// The concept identifying what an action orders.
///
/// `medicationCodeableConcept` for medication requests, `code` for service requests and care
/// plans, `None` for unsupported resources.
pub fn codeable_concept_from_action(action: &Action) -> Option<&CodeableConcept> {
    action.resource.codeable_concept()
}
