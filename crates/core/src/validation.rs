//! Structural validation of pathway documents.
//!
//! Builder functions keep these invariants on every edit, but documents also arrive from
//! files and over HTTP, so exporters check them again before traversing anything.

use crate::constants::START_KEY;
use crate::model::{NodeMap, Pathway};
use crate::{PathwayError, PathwayResult};
use indexmap::IndexSet;

/// Every structural problem found in `pathway`, in a stable order.
///
/// Checks that:
/// - a `start` node keyed `"Start"` exists and nothing transitions into it
/// - every map key equals the `key` of the node stored under it
/// - transition ids are unique per source node
/// - every transition target exists
/// - the graph has no cycle
pub fn find_issues(pathway: &Pathway) -> Vec<PathwayError> {
    let mut issues = Vec::new();

    match pathway.nodes.get(START_KEY) {
        None => issues.push(PathwayError::InvalidPathway(format!(
            "missing {START_KEY} node"
        ))),
        Some(start) if !start.is_start_node() => issues.push(PathwayError::WrongNodeType {
            key: START_KEY.to_owned(),
            expected: "start",
            actual: start.kind_name(),
        }),
        Some(_) => {}
    }

    for (key, node) in &pathway.nodes {
        if *key != node.key {
            issues.push(PathwayError::InvalidPathway(format!(
                "node stored under '{key}' has key '{}'",
                node.key
            )));
        }

        let mut ids = IndexSet::new();
        for t in &node.transitions {
            if !ids.insert(t.id.as_str()) {
                issues.push(PathwayError::InvalidPathway(format!(
                    "node '{key}' has duplicate transition id '{}'",
                    t.id
                )));
            }
            if t.transition == START_KEY {
                issues.push(PathwayError::StartNodeProtected("a transition target"));
            } else if !pathway.nodes.contains_key(&t.transition) {
                issues.push(PathwayError::DanglingTransition {
                    from: key.clone(),
                    to: t.transition.clone(),
                });
            }
        }
    }

    if let Some(key) = detect_cycle(&pathway.nodes) {
        issues.push(PathwayError::CycleDetected(key));
    }

    issues
}

/// Fail with the first problem [`find_issues`] reports.
///
/// # Errors
///
/// Returns the first structural problem found.
pub fn validate_pathway(pathway: &Pathway) -> PathwayResult<()> {
    match find_issues(pathway).into_iter().next() {
        Some(issue) => Err(issue),
        None => Ok(()),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Open,
    Done,
}

/// Key of a node that lies on a cycle, or `None` if the graph is acyclic.
///
/// Searches from `"Start"` first, then from the remaining nodes in map order, so cycles in
/// parts of the graph not yet connected to Start are found too. Missing targets are ignored.
pub fn detect_cycle(nodes: &NodeMap) -> Option<String> {
    let mut marks: indexmap::IndexMap<&str, Mark> = indexmap::IndexMap::new();
    let roots = std::iter::once(START_KEY)
        .filter(|k| nodes.contains_key(*k))
        .chain(nodes.keys().map(String::as_str));

    for root in roots {
        if marks.contains_key(root) {
            continue;
        }
        // Explicit stack of (node, index of next transition to visit).
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
        marks.insert(root, Mark::Open);

        while let Some((key, next)) = stack.last_mut() {
            let targets = nodes.get(*key).map(|n| n.transitions.as_slice()).unwrap_or_default();
            let Some(t) = targets.get(*next) else {
                marks.insert(*key, Mark::Done);
                stack.pop();
                continue;
            };
            *next += 1;

            let target = t.transition.as_str();
            if !nodes.contains_key(target) {
                continue;
            }
            match marks.get(target) {
                Some(Mark::Open) => return Some(target.to_owned()),
                Some(Mark::Done) => {}
                None => {
                    marks.insert(target, Mark::Open);
                    stack.push((target, 0));
                }
            }
        }
    }

    None
}
