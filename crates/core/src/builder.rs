//! Copy-on-write edit operations on a [`Pathway`].
//!
//! Every function takes the current pathway by reference and returns a new one. The input is
//! never modified. Nodes the edit does not touch are shared between input and output through
//! their [`Arc`]; only the addressed node is cloned (via [`Arc::make_mut`]), which keeps undo
//! history cheap.
//!
//! Fallible edits return [`PathwayResult`], and on error no new pathway is produced.

use crate::constants::START_KEY;
use crate::elm::Elm;
use crate::model::{
    Action, ActionNode, Condition, NodeKind, Pathway, PathwayNode, Precondition, ReferenceNode,
    Transition,
};
use crate::{PathwayError, PathwayResult};
use fhir::Coding;
use pathways_uuid::ShortId;
use std::sync::Arc;

/// A fresh pathway holding only the Start node.
///
/// `id` defaults to a generated short id.
pub fn create_new_pathway(name: &str, description: Option<&str>, id: Option<&str>) -> Pathway {
    let id = id
        .map(str::to_owned)
        .unwrap_or_else(|| ShortId::generate().into_string());
    let start = PathwayNode::new(START_KEY, START_KEY, NodeKind::Start);

    Pathway {
        id,
        name: name.to_owned(),
        description: description.unwrap_or_default().to_owned(),
        library: Vec::new(),
        preconditions: Vec::new(),
        nodes: [(START_KEY.to_owned(), Arc::new(start))].into_iter().collect(),
        elm: None,
    }
}

pub fn set_pathway_name(pathway: &Pathway, name: &str) -> Pathway {
    Pathway {
        name: name.to_owned(),
        ..pathway.clone()
    }
}

pub fn set_pathway_description(pathway: &Pathway, description: &str) -> Pathway {
    Pathway {
        description: description.to_owned(),
        ..pathway.clone()
    }
}

fn edit_node(
    pathway: &Pathway,
    key: &str,
    edit: impl FnOnce(&mut PathwayNode) -> PathwayResult<()>,
) -> PathwayResult<Pathway> {
    let mut next = pathway.clone();
    let node = next
        .nodes
        .get_mut(key)
        .ok_or_else(|| PathwayError::NodeNotFound(key.to_owned()))?;
    edit(Arc::make_mut(node))?;
    Ok(next)
}

fn edit_transition(
    pathway: &Pathway,
    start_key: &str,
    transition_id: &str,
    edit: impl FnOnce(&mut Transition) -> PathwayResult<()>,
) -> PathwayResult<Pathway> {
    edit_node(pathway, start_key, |node| {
        let transition = node
            .transitions
            .iter_mut()
            .find(|t| t.id == transition_id)
            .ok_or_else(|| PathwayError::TransitionNotFound {
                node: start_key.to_owned(),
                transition: transition_id.to_owned(),
            })?;
        edit(transition)
    })
}

fn edit_action(
    pathway: &Pathway,
    key: &str,
    action_id: &str,
    edit: impl FnOnce(&mut Action) -> PathwayResult<()>,
) -> PathwayResult<Pathway> {
    edit_node(pathway, key, |node| {
        let action = node
            .action_node_mut()?
            .action
            .iter_mut()
            .find(|a| a.id == action_id)
            .ok_or_else(|| PathwayError::ActionNotFound {
                node: key.to_owned(),
                action: action_id.to_owned(),
            })?;
        edit(action)
    })
}

fn edit_coding(
    pathway: &Pathway,
    key: &str,
    action_id: &str,
    edit: impl FnOnce(&mut Coding),
) -> PathwayResult<Pathway> {
    edit_action(pathway, key, action_id, |action| {
        let resource_type = action.resource.resource_type().to_owned();
        let concept = action.resource.codeable_concept_mut().ok_or_else(|| {
            PathwayError::UnsupportedResource {
                node: key.to_owned(),
                resource_type,
            }
        })?;
        edit(concept.first_coding_mut());
        Ok(())
    })
}

fn ensure_not_start(key: &str, what: &'static str) -> PathwayResult<()> {
    if key == START_KEY {
        return Err(PathwayError::StartNodeProtected(what));
    }
    Ok(())
}

/// Add an untyped node with a fresh key. Returns the new pathway and the key.
///
/// # Errors
///
/// Returns [`PathwayError::IdAllocation`] if no unused key could be generated.
pub fn add_node(pathway: &Pathway) -> PathwayResult<(Pathway, String)> {
    let key = ShortId::generate_unique(|k| pathway.nodes.contains_key(k))?.into_string();
    let mut node = PathwayNode::new(key.clone(), "", NodeKind::Null);
    node.node_type_is_undefined = Some(true);

    let mut next = pathway.clone();
    next.nodes.insert(key.clone(), Arc::new(node));
    Ok((next, key))
}

/// Remove `key` and every transition pointing at it.
///
/// # Errors
///
/// Fails for the Start node and for unknown keys.
pub fn remove_node(pathway: &Pathway, key: &str) -> PathwayResult<Pathway> {
    ensure_not_start(key, "removed")?;
    let mut next = pathway.clone();
    next.nodes
        .shift_remove(key)
        .ok_or_else(|| PathwayError::NodeNotFound(key.to_owned()))?;

    for node in next.nodes.values_mut() {
        // Leave nodes without an incoming edge shared.
        if node.transitions.iter().any(|t| t.transition == key) {
            Arc::make_mut(node).transitions.retain(|t| t.transition != key);
        }
    }
    Ok(next)
}

pub fn set_node_label(pathway: &Pathway, key: &str, label: &str) -> PathwayResult<Pathway> {
    edit_node(pathway, key, |node| {
        node.label = label.to_owned();
        Ok(())
    })
}

/// Connect `start_key` to `end_key` with an unconditioned transition.
///
/// # Errors
///
/// * [`PathwayError::NodeNotFound`] if `start_key` is missing.
/// * [`PathwayError::DanglingTransition`] if `end_key` is missing.
/// * [`PathwayError::StartNodeProtected`] if `end_key` is the Start node.
pub fn add_transition(pathway: &Pathway, start_key: &str, end_key: &str) -> PathwayResult<Pathway> {
    ensure_not_start(end_key, "a transition target")?;
    if !pathway.nodes.contains_key(end_key) {
        return Err(PathwayError::DanglingTransition {
            from: start_key.to_owned(),
            to: end_key.to_owned(),
        });
    }

    edit_node(pathway, start_key, |node| {
        let id = ShortId::generate_unique(|id| node.transitions.iter().any(|t| t.id == id))?;
        node.transitions.push(Transition {
            id: id.into_string(),
            transition: end_key.to_owned(),
            condition: None,
        });
        Ok(())
    })
}

pub fn remove_transition(
    pathway: &Pathway,
    start_key: &str,
    transition_id: &str,
) -> PathwayResult<Pathway> {
    edit_node(pathway, start_key, |node| {
        let before = node.transitions.len();
        node.transitions.retain(|t| t.id != transition_id);
        if node.transitions.len() == before {
            return Err(PathwayError::TransitionNotFound {
                node: start_key.to_owned(),
                transition: transition_id.to_owned(),
            });
        }
        Ok(())
    })
}

/// Guard a transition with compiled criteria.
///
/// `condition.cql` becomes `criteria_label` when given, otherwise the name of the first
/// non-reserved statement in `elm`.
///
/// # Errors
///
/// Returns [`PathwayError::MissingElmStatement`] if no label is given and `elm` holds no
/// usable statement, plus the usual lookup errors.
pub fn set_transition_condition(
    pathway: &Pathway,
    start_key: &str,
    transition_id: &str,
    description: &str,
    elm: &Elm,
    criteria_label: Option<&str>,
    criteria_source: Option<&str>,
) -> PathwayResult<Pathway> {
    let cql = match criteria_label {
        Some(label) => label.to_owned(),
        None => elm.statement_name(&format!("condition on transition '{transition_id}'"))?,
    };

    edit_transition(pathway, start_key, transition_id, |t| {
        t.condition = Some(Condition {
            description: description.to_owned(),
            cql,
            elm: Some(elm.clone()),
            criteria_source: criteria_source.map(str::to_owned),
        });
        Ok(())
    })
}

/// Set the description of a transition's condition, creating an empty condition if needed.
pub fn set_transition_condition_description(
    pathway: &Pathway,
    start_key: &str,
    transition_id: &str,
    description: &str,
) -> PathwayResult<Pathway> {
    edit_transition(pathway, start_key, transition_id, |t| {
        t.condition.get_or_insert_with(Condition::default).description = description.to_owned();
        Ok(())
    })
}

pub fn remove_transition_condition(
    pathway: &Pathway,
    start_key: &str,
    transition_id: &str,
) -> PathwayResult<Pathway> {
    edit_transition(pathway, start_key, transition_id, |t| {
        t.condition = None;
        Ok(())
    })
}

/// Turn a node into an action node with an empty action list and no CQL.
///
/// An existing action node keeps its actions.
pub fn make_node_action(pathway: &Pathway, key: &str) -> PathwayResult<Pathway> {
    ensure_not_start(key, "retyped")?;
    edit_node(pathway, key, |node| {
        if !node.is_action_node() {
            node.kind = NodeKind::Action(ActionNode::default());
        }
        node.node_type_is_undefined = None;
        Ok(())
    })
}

/// Turn a node into a branch node.
///
/// Drops any actions and CQL, and the conditions on the node's outgoing transitions, which
/// have to be set again for the branch.
pub fn make_node_branch(pathway: &Pathway, key: &str) -> PathwayResult<Pathway> {
    ensure_not_start(key, "retyped")?;
    edit_node(pathway, key, |node| {
        node.kind = NodeKind::Branch;
        node.node_type_is_undefined = None;
        for t in &mut node.transitions {
            t.condition = None;
        }
        Ok(())
    })
}

/// Turn a node into a reference to another pathway.
pub fn make_node_reference(
    pathway: &Pathway,
    key: &str,
    reference_id: &str,
    reference_label: &str,
) -> PathwayResult<Pathway> {
    ensure_not_start(key, "retyped")?;
    edit_node(pathway, key, |node| {
        node.kind = NodeKind::Reference(ReferenceNode {
            reference_id: reference_id.to_owned(),
            reference_label: reference_label.to_owned(),
        });
        node.node_type_is_undefined = None;
        Ok(())
    })
}

/// Append `action` to an action node under a fresh action id.
pub fn add_node_action(pathway: &Pathway, key: &str, action: Action) -> PathwayResult<Pathway> {
    edit_node(pathway, key, |node| {
        let payload = node.action_node_mut()?;
        let id = ShortId::generate_unique(|id| payload.action.iter().any(|a| a.id == id))?;
        payload.action.push(Action {
            id: id.into_string(),
            ..action
        });
        Ok(())
    })
}

pub fn remove_node_action(pathway: &Pathway, key: &str, action_id: &str) -> PathwayResult<Pathway> {
    edit_node(pathway, key, |node| {
        let actions = &mut node.action_node_mut()?.action;
        let before = actions.len();
        actions.retain(|a| a.id != action_id);
        if actions.len() == before {
            return Err(PathwayError::ActionNotFound {
                node: key.to_owned(),
                action: action_id.to_owned(),
            });
        }
        Ok(())
    })
}

/// Attach compiled CQL to an action node; `cql` becomes the first non-reserved statement
/// name of `elm`.
pub fn set_node_cql(pathway: &Pathway, key: &str, elm: &Elm) -> PathwayResult<Pathway> {
    let cql = elm.statement_name(&format!("node '{key}'"))?;
    edit_node(pathway, key, |node| {
        let payload = node.action_node_mut()?;
        payload.cql = cql;
        payload.elm = Some(elm.clone());
        Ok(())
    })
}

pub fn set_action_code(
    pathway: &Pathway,
    key: &str,
    action_id: &str,
    code: &str,
) -> PathwayResult<Pathway> {
    edit_coding(pathway, key, action_id, |c| c.code = code.to_owned())
}

pub fn set_action_code_system(
    pathway: &Pathway,
    key: &str,
    action_id: &str,
    system: &str,
) -> PathwayResult<Pathway> {
    edit_coding(pathway, key, action_id, |c| c.system = system.to_owned())
}

pub fn set_action_resource_display(
    pathway: &Pathway,
    key: &str,
    action_id: &str,
    display: &str,
) -> PathwayResult<Pathway> {
    edit_coding(pathway, key, action_id, |c| {
        c.display = Some(display.to_owned())
    })
}

pub fn set_action_description(
    pathway: &Pathway,
    key: &str,
    action_id: &str,
    description: &str,
) -> PathwayResult<Pathway> {
    edit_action(pathway, key, action_id, |a| {
        a.description = description.to_owned();
        Ok(())
    })
}

/// Set the title of a care plan action.
///
/// # Errors
///
/// Returns [`PathwayError::InvalidInput`] for other resource types, which have no title.
pub fn set_action_title(
    pathway: &Pathway,
    key: &str,
    action_id: &str,
    title: &str,
) -> PathwayResult<Pathway> {
    edit_action(pathway, key, action_id, |a| match &mut a.resource {
        fhir::ActionResource::CarePlan(plan) => {
            plan.title = title.to_owned();
            Ok(())
        }
        other => Err(PathwayError::InvalidInput(format!(
            "{} actions have no title",
            other.resource_type()
        ))),
    })
}

/// Add a precondition evaluated by the first non-reserved statement of `elm`.
pub fn add_precondition(
    pathway: &Pathway,
    element_name: &str,
    expected: &str,
    elm: &Elm,
) -> PathwayResult<Pathway> {
    let cql = elm.statement_name(&format!("precondition '{element_name}'"))?;
    let id = ShortId::generate_unique(|id| pathway.preconditions.iter().any(|p| p.id == id))?;

    let mut next = pathway.clone();
    next.preconditions.push(Precondition {
        id: id.into_string(),
        element_name: element_name.to_owned(),
        expected: expected.to_owned(),
        cql,
        elm: Some(elm.clone()),
    });
    Ok(next)
}

pub fn remove_precondition(pathway: &Pathway, id: &str) -> PathwayResult<Pathway> {
    let mut next = pathway.clone();
    let before = next.preconditions.len();
    next.preconditions.retain(|p| p.id != id);
    if next.preconditions.len() == before {
        return Err(PathwayError::PreconditionNotFound(id.to_owned()));
    }
    Ok(next)
}
