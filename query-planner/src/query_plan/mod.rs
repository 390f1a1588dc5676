//! The query plan object model.
//!
//! A query plan is a tree describing how a federated operation is executed: which services are
//! fetched from, in which order, and where their responses are merged into the overall result.
//! It is built once per planning call and handed over, immutable, to an executor.

use std::fmt;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::ast::OperationType;
use itertools::Itertools;
use serde::Deserialize;
use serde::Serialize;
use serde::Serializer;

use crate::operation::Fragment;
use crate::operation::Selection;
use crate::operation::SelectionSet;

pub(crate) mod display;
pub(crate) mod fetch_group;
pub(crate) mod fragments;
pub mod query_planner;
pub(crate) mod requirements;

/// GraphQL operation type.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<OperationKind> for OperationType {
    fn from(value: OperationKind) -> Self {
        match value {
            OperationKind::Query => OperationType::Query,
            OperationKind::Mutation => OperationType::Mutation,
            OperationKind::Subscription => OperationType::Subscription,
        }
    }
}

impl From<OperationType> for OperationKind {
    fn from(value: OperationType) -> Self {
        match value {
            OperationType::Query => OperationKind::Query,
            OperationType::Mutation => OperationKind::Mutation,
            OperationType::Subscription => OperationKind::Subscription,
        }
    }
}

/// The root query plan container.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub struct QueryPlan {
    /// The hierarchical nodes that make up the query plan. `None` when there is nothing to
    /// fetch, for example when only introspection fields were selected.
    pub node: Option<PlanNode>,
}

impl QueryPlan {
    /// Every fetch of the plan, depth first, in execution order.
    pub fn fetch_nodes(&self) -> Vec<&FetchNode> {
        let mut fetches = Vec::new();
        if let Some(node) = &self.node {
            node.collect_fetch_nodes(&mut fetches);
        }
        fetches
    }
}

/// Query plans are composed of a set of nodes.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase", tag = "kind")]
pub enum PlanNode {
    /// These nodes must be executed in order.
    Sequence {
        /// The plan nodes that make up the sequence execution.
        nodes: Vec<PlanNode>,
    },

    /// These nodes may be executed in parallel.
    Parallel {
        /// The plan nodes that make up the parallel execution.
        nodes: Vec<PlanNode>,
    },

    /// Fetch some data from a service.
    Fetch(FetchNode),

    /// Merge the current result set with the response.
    Flatten(FlattenNode),
}

impl PlanNode {
    fn collect_fetch_nodes<'a>(&'a self, fetches: &mut Vec<&'a FetchNode>) {
        match self {
            PlanNode::Sequence { nodes } | PlanNode::Parallel { nodes } => nodes
                .iter()
                .for_each(|node| node.collect_fetch_nodes(fetches)),
            PlanNode::Fetch(fetch) => fetches.push(fetch),
            PlanNode::Flatten(flatten) => flatten.node.collect_fetch_nodes(fetches),
        }
    }
}

/// A fetch node.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchNode {
    /// The name of the service that the fetch is querying.
    pub service_name: String,

    /// The representation of each entity sent to the service, for fetches that depend on data
    /// returned by a previous fetch.
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_requires"
    )]
    pub requires: Option<SelectionSet>,

    /// The variables that are used for the fetch.
    pub variable_usages: Vec<String>,

    /// Renamings applied to each representation once it has been read from the response,
    /// before it is sent to the service.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub input_rewrites: Vec<FetchDataRewrite>,

    /// The GraphQL operation sent to the service.
    pub operation: String,

    /// The GraphQL operation kind that is used for the fetch.
    pub operation_kind: OperationKind,

    #[serde(skip)]
    pub(crate) selection_set: SelectionSet,

    #[serde(skip)]
    pub(crate) internal_fragments: Vec<Arc<Fragment>>,
}

impl FetchNode {
    /// The selection requested from the service. For entity fetches, this is what is selected
    /// on each entity.
    pub fn selection_set(&self) -> &SelectionSet {
        &self.selection_set
    }

    /// Fragments generated by the planner and referenced by the selection.
    pub fn internal_fragments(&self) -> &[Arc<Fragment>] {
        &self.internal_fragments
    }
}

/// A change made to data moving between a fetch and the overall response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase", tag = "kind")]
pub enum FetchDataRewrite {
    KeyRenamer(FetchDataKeyRenamer),
}

/// Renames the key found at `path`. Requirements a fetch had to select under an alias are read
/// from the response under that alias, then renamed back to the field name the service expects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchDataKeyRenamer {
    /// Path of the key, relative to a representation: type conditions (`... on User`) and keys.
    pub path: Vec<String>,
    pub rename_key_to: String,
}

/// A flatten node.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlattenNode {
    /// The path where the result should be merged.
    pub path: Vec<ResponsePathElement>,

    /// The child execution plan.
    pub node: Box<PlanNode>,
}

impl FlattenNode {
    pub(crate) fn path_string(&self) -> String {
        self.path.iter().join(".")
    }
}

/// One step of a response path: a field's response name, or every element of a list.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResponsePathElement {
    Field(Name),
    AnyIndex,
}

impl fmt::Display for ResponsePathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponsePathElement::Field(name) => f.write_str(name),
            ResponsePathElement::AnyIndex => f.write_str("@"),
        }
    }
}

impl Serialize for ResponsePathElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A selection that is part of a fetch's requirements.
/// Selections are used to propagate data to service fetches.
#[derive(Serialize)]
#[serde(rename_all = "PascalCase", tag = "kind")]
enum RequiredSelection<'a> {
    Field(RequiredField<'a>),
    InlineFragment(RequiredInlineFragment<'a>),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequiredField<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    alias: Option<&'a str>,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    selections: Option<Vec<RequiredSelection<'a>>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequiredInlineFragment<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    type_condition: Option<&'a str>,
    selections: Vec<RequiredSelection<'a>>,
}

fn required_selections(selection_set: &SelectionSet) -> Vec<RequiredSelection<'_>> {
    selection_set
        .iter()
        .filter_map(|selection| match selection {
            Selection::Field(field) => Some(RequiredSelection::Field(RequiredField {
                alias: field.alias.as_ref().map(|alias| alias.as_str()),
                name: field.name.as_str(),
                selections: field.selection_set.as_ref().map(required_selections),
            })),
            Selection::InlineFragment(fragment) => Some(RequiredSelection::InlineFragment(
                RequiredInlineFragment {
                    type_condition: fragment.type_condition.as_ref().map(|name| name.as_str()),
                    selections: required_selections(&fragment.selection_set),
                },
            )),
            // Representations are built from fields only.
            Selection::FragmentSpread(_) => None,
        })
        .collect()
}

fn serialize_requires<S: Serializer>(
    requires: &Option<SelectionSet>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match requires {
        Some(requires) => serializer.collect_seq(required_selections(requires)),
        None => serializer.serialize_none(),
    }
}
