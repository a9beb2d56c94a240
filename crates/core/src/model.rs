//! The pathway document model.
//!
//! A [`Pathway`] is a graph of [`PathwayNode`]s keyed by an opaque node key. It always holds
//! a `start` node keyed `"Start"` with no incoming transitions, and every transition target
//! names an existing node.
//!
//! Nodes are stored behind [`Arc`] so that builder functions can return a new pathway that
//! shares every node it did not touch with the pathway it was derived from. The node map
//! keeps insertion order; graph helpers that pick "the first" match rely on it.

use crate::elm::Elm;
use crate::{PathwayError, PathwayResult};
use fhir::ActionResource;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Nodes of a pathway keyed by node key, in insertion order.
pub type NodeMap = IndexMap<String, Arc<PathwayNode>>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pathway {
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Self-contained CQL library texts the pathway depends on.
    #[serde(default)]
    pub library: Vec<String>,

    #[serde(default)]
    pub preconditions: Vec<Precondition>,

    pub nodes: NodeMap,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elm: Option<PathwayElm>,
}

impl Pathway {
    /// Look up a node by key.
    ///
    /// # Errors
    ///
    /// Returns [`PathwayError::NodeNotFound`] if no node has `key`.
    pub fn node(&self, key: &str) -> PathwayResult<&PathwayNode> {
        self.nodes
            .get(key)
            .map(Arc::as_ref)
            .ok_or_else(|| PathwayError::NodeNotFound(key.to_owned()))
    }
}

/// Compiled ELM embedded in a pathway.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PathwayElm {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigational: Option<Elm>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preconditions: Option<Elm>,
}

/// A requirement a patient must meet before the pathway applies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Precondition {
    #[serde(default)]
    pub id: String,

    pub element_name: String,

    #[serde(default)]
    pub expected: String,

    #[serde(default)]
    pub cql: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elm: Option<Elm>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathwayNode {
    #[serde(default)]
    pub key: String,

    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub transitions: Vec<Transition>,

    /// Set on nodes created in the editor before the user picked a type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type_is_undefined: Option<bool>,

    #[serde(flatten)]
    pub kind: NodeKind,
}

/// The node variants, tagged by the `type` field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeKind {
    Start,
    Branch,
    Action(ActionNode),
    Reference(ReferenceNode),
    Null,
}

/// Payload of an action node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionNode {
    #[serde(default)]
    pub action: Vec<Action>,

    /// Name of the ELM statement that tells whether the action already happened.
    #[serde(default)]
    pub cql: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elm: Option<Elm>,
}

/// Payload of a reference node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceNode {
    pub reference_id: String,

    #[serde(default)]
    pub reference_label: String,
}

impl PathwayNode {
    /// A node of `kind` with no transitions.
    pub fn new(key: impl Into<String>, label: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            transitions: Vec::new(),
            node_type_is_undefined: None,
            kind,
        }
    }

    pub fn is_start_node(&self) -> bool {
        matches!(self.kind, NodeKind::Start)
    }

    pub fn is_action_node(&self) -> bool {
        matches!(self.kind, NodeKind::Action(_))
    }

    pub fn is_branch_node(&self) -> bool {
        matches!(self.kind, NodeKind::Branch)
    }

    pub fn is_reference_node(&self) -> bool {
        matches!(self.kind, NodeKind::Reference(_))
    }

    pub fn is_null_node(&self) -> bool {
        matches!(self.kind, NodeKind::Null)
    }

    /// The `type` tag of this node.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            NodeKind::Start => "start",
            NodeKind::Branch => "branch",
            NodeKind::Action(_) => "action",
            NodeKind::Reference(_) => "reference",
            NodeKind::Null => "null",
        }
    }

    pub fn action_node(&self) -> Option<&ActionNode> {
        match &self.kind {
            NodeKind::Action(a) => Some(a),
            _ => None,
        }
    }

    /// The action payload, or [`PathwayError::WrongNodeType`] for other node kinds.
    pub fn action_node_mut(&mut self) -> PathwayResult<&mut ActionNode> {
        let actual = self.kind_name();
        match &mut self.kind {
            NodeKind::Action(a) => Ok(a),
            _ => Err(PathwayError::WrongNodeType {
                key: self.key.clone(),
                expected: "action",
                actual,
            }),
        }
    }

    /// The actions of an action node; empty for every other kind.
    pub fn actions(&self) -> &[Action] {
        self.action_node()
            .map(|a| a.action.as_slice())
            .unwrap_or_default()
    }

    pub fn transition(&self, id: &str) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.id == id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// Unique among the transitions of the source node.
    #[serde(default)]
    pub id: String,

    /// Key of the target node.
    pub transition: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(default)]
    pub description: String,

    /// Name of the CQL statement guarding the transition, possibly `Library.name` qualified.
    #[serde(default)]
    pub cql: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elm: Option<Elm>,

    /// Id of the criteria this condition was built from. A weak reference: it may no longer
    /// resolve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria_source: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    #[default]
    Create,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type", default)]
    pub action_type: ActionType,

    #[serde(default)]
    pub description: String,

    pub resource: ActionResource,
}
