//! Fetch groups: the unit the planner partitions an operation into.
//!
//! A group collects the fields one service resolves in one request. Groups form a tree: a
//! group's dependents can only be fetched once the group's response has been merged, because
//! they are keyed by entity representations the group returns.

use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::name;
use indexmap::IndexMap;
use indexmap::map::Entry;
use itertools::Itertools;

use super::FetchDataKeyRenamer;
use super::FetchDataRewrite;
use super::FlattenNode;
use super::OperationKind;
use super::PlanNode;
use super::ResponsePathElement;
use crate::error::PlannerError;
use crate::error::Result;
use crate::operation::Field;
use crate::operation::Fragment;
use crate::operation::InlineFragment;
use crate::operation::Selection;
use crate::operation::SelectionSet;
use crate::operation::compact::CompactWriter;
use crate::operation::normalize::CollectedField;

const REPRESENTATIONS_VARIABLE: &str = "representations";
const ENTITIES_FIELD: &str = "_entities";
const ANY_SCALAR: Name = name!("_Any");

#[derive(Debug)]
pub(crate) struct FetchGroup {
    pub(crate) service_name: String,
    /// Where the response of this group is merged into the overall result. Empty for groups
    /// fetching root fields.
    pub(crate) merge_at: Vec<ResponsePathElement>,
    pub(crate) fields: Vec<GroupField>,
    /// The representation of each entity this group is sent.
    pub(crate) required_fields: Vec<CollectedField>,
    /// Fields the parent field's service returns along with the object, without extra cost.
    pub(crate) provided_fields: Vec<CollectedField>,
    pub(crate) input_rewrites: Vec<FetchDataRewrite>,
    pub(crate) internal_fragments: IndexMap<Name, Arc<Fragment>>,
    pub(crate) dependent_groups_by_service: IndexMap<String, FetchGroup>,
    /// Dependents hoisted from the sub-groups of this group's composite fields.
    pub(crate) other_dependent_groups: Vec<FetchGroup>,
}

#[derive(Debug, Clone)]
pub(crate) struct GroupField {
    pub(crate) field: CollectedField,
    /// Selected so that a dependent group can build its representations, rather than requested
    /// by the operation. Only such fields may be aliased by the planner.
    pub(crate) is_requirement: bool,
}

impl FetchGroup {
    pub(crate) fn new(service_name: impl Into<String>, merge_at: Vec<ResponsePathElement>) -> Self {
        Self {
            service_name: service_name.into(),
            merge_at,
            fields: Vec::new(),
            required_fields: Vec::new(),
            provided_fields: Vec::new(),
            input_rewrites: Vec::new(),
            internal_fragments: IndexMap::new(),
            dependent_groups_by_service: IndexMap::new(),
            other_dependent_groups: Vec::new(),
        }
    }

    pub(crate) fn add_field(&mut self, field: CollectedField) {
        self.fields.push(GroupField {
            field,
            is_requirement: false,
        });
    }

    /// The group fetching from `service` after this one, at the same path, created on first use.
    ///
    /// `required_fields` become part of that group's representation, and are selected by this
    /// group so that the representation can be built from its response.
    pub(crate) fn dependent_group_for_service(
        &mut self,
        service: &str,
        required_fields: Vec<CollectedField>,
    ) -> &mut FetchGroup {
        self.fields
            .extend(required_fields.iter().cloned().map(|field| GroupField {
                field,
                is_requirement: true,
            }));
        let merge_at = &self.merge_at;
        let group = self
            .dependent_groups_by_service
            .entry(service.to_owned())
            .or_insert_with(|| {
                tracing::trace!(
                    service,
                    path = %merge_at.iter().join("."),
                    "created dependent fetch group"
                );
                FetchGroup::new(service, merge_at.clone())
            });
        group.required_fields.extend(required_fields);
        group
    }

    /// Whether this group already returns `field`, either because it selects it or because the
    /// parent field provides it.
    pub(crate) fn has_available(&self, field: &CollectedField) -> bool {
        self.provided_fields
            .iter()
            .chain(self.fields.iter().map(|selected| &selected.field))
            .any(|available| available.matches(field))
    }

    /// Whether this group can select `field` itself, because the parent field provides it or
    /// the group already selects its value.
    pub(crate) fn can_select(&self, field: &CollectedField) -> bool {
        self.provided_fields
            .iter()
            .chain(self.fields.iter().map(|selected| &selected.field))
            .any(|available| available.selects_same_value(field))
    }

    /// Adds hoisted dependents. A dependent fetching from the same service at the same path as
    /// one already held is merged into it, so that both are sent as a single fetch.
    pub(crate) fn add_dependents(&mut self, groups: impl IntoIterator<Item = FetchGroup>) {
        for group in groups {
            let existing = self.other_dependent_groups.iter_mut().find(|existing| {
                existing.service_name == group.service_name && existing.merge_at == group.merge_at
            });
            match existing {
                Some(existing) => existing.merge(group),
                None => self.other_dependent_groups.push(group),
            }
        }
    }

    /// Merges a group fetching from the same service at the same path into this one.
    fn merge(&mut self, other: FetchGroup) {
        tracing::trace!(
            service = %self.service_name,
            path = %self.merge_at.iter().join("."),
            "merged fetch groups"
        );
        let FetchGroup {
            fields,
            required_fields,
            input_rewrites,
            internal_fragments,
            dependent_groups_by_service,
            other_dependent_groups,
            ..
        } = other;
        self.fields.extend(fields);
        self.required_fields.extend(required_fields);
        for rewrite in input_rewrites {
            self.add_input_rewrite(rewrite);
        }
        self.internal_fragments.extend(internal_fragments);
        for (service, dependent) in dependent_groups_by_service {
            match self.dependent_groups_by_service.entry(service) {
                Entry::Occupied(mut existing) => existing.get_mut().merge(dependent),
                Entry::Vacant(entry) => {
                    entry.insert(dependent);
                }
            }
        }
        self.add_dependents(other_dependent_groups);
    }

    pub(crate) fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Builds the selection of this group out of its fields, leaving it without any.
    ///
    /// A requirement whose response name is taken by a different field of the operation is
    /// selected under an alias. Dependents reading it then get the alias in their `requires`,
    /// along with an input rewrite restoring the field name in their representations.
    pub(crate) fn take_selection_set(&mut self, parent_type: Option<&Name>) -> Result<SelectionSet> {
        let mut builder = SelectionBuilder::default();
        for GroupField {
            field,
            is_requirement,
        } in std::mem::take(&mut self.fields)
        {
            builder.add(field.scope.parent_type, field.field, is_requirement)?;
        }
        let (selection_set, aliases) = builder.finish(parent_type);
        if !aliases.is_empty() {
            for dependent in self.dependent_groups_by_service.values_mut() {
                dependent.read_aliased_requirements(&aliases);
            }
        }
        Ok(selection_set)
    }

    fn read_aliased_requirements(&mut self, aliases: &[RequirementAlias]) {
        let mut rewrites = Vec::new();
        for required in &mut self.required_fields {
            let Some(alias) = aliases.iter().find(|alias| alias.applies_to(required)) else {
                continue;
            };
            required.field.alias = Some(alias.alias.clone());
            rewrites.push(FetchDataRewrite::KeyRenamer(FetchDataKeyRenamer {
                path: vec![
                    format!("... on {}", alias.parent_type),
                    alias.alias.to_string(),
                ],
                rename_key_to: required.field.name.to_string(),
            }));
        }
        for rewrite in rewrites {
            self.add_input_rewrite(rewrite);
        }
    }

    fn add_input_rewrite(&mut self, rewrite: FetchDataRewrite) {
        if !self.input_rewrites.contains(&rewrite) {
            self.input_rewrites.push(rewrite);
        }
    }

    pub(crate) fn into_dependent_groups(self) -> Vec<FetchGroup> {
        self.dependent_groups_by_service
            .into_values()
            .chain(self.other_dependent_groups)
            .collect()
    }
}

/// Which group a field is fetched by, relative to the group of its parent field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum GroupRoute {
    /// The parent's own group.
    Parent,
    /// A dependent group of the parent's group.
    Dependent(String),
    /// A dependent group of the base service's group, itself a dependent of the parent's group.
    ThroughBase { base: String, owner: String },
}

impl GroupRoute {
    pub(crate) fn resolve<'g>(&self, parent: &'g mut FetchGroup) -> Result<&'g mut FetchGroup> {
        let group = match self {
            GroupRoute::Parent => Some(parent),
            GroupRoute::Dependent(service) => parent.dependent_groups_by_service.get_mut(service),
            GroupRoute::ThroughBase { base, owner } => parent
                .dependent_groups_by_service
                .get_mut(base)
                .and_then(|base| base.dependent_groups_by_service.get_mut(owner)),
        };
        group.ok_or_else(|| PlannerError::internal(format!("no fetch group for route {self:?}")))
    }
}

/// A requirement selected under another response name than its own.
#[derive(Debug)]
struct RequirementAlias {
    parent_type: Name,
    field: Field,
    alias: Name,
}

impl RequirementAlias {
    fn applies_to(&self, required: &CollectedField) -> bool {
        required.field.alias.is_none()
            && *required.parent_type() == self.parent_type
            && required.field.selects_same_value(&self.field)
    }
}

/// Fields of a selection, per type condition, merged by response name.
#[derive(Default)]
struct SelectionBuilder {
    branches: IndexMap<Name, Vec<GroupSelection>>,
    aliases: Vec<RequirementAlias>,
}

struct GroupSelection {
    field: Field,
    is_requirement: bool,
}

impl SelectionBuilder {
    fn add(&mut self, parent_type: Name, mut field: Field, is_requirement: bool) -> Result<()> {
        if is_requirement && field.alias.is_none() {
            if let Some(alias) = self.aliases.iter().find(|alias| {
                alias.parent_type == parent_type && alias.field.selects_same_value(&field)
            }) {
                field.alias = Some(alias.alias.clone());
            }
        }

        let selections = self.branches.entry(parent_type.clone()).or_default();
        let Some(index) = selections
            .iter()
            .position(|existing| existing.field.response_name() == field.response_name())
        else {
            selections.push(GroupSelection {
                field,
                is_requirement,
            });
            return Ok(());
        };

        if selections[index].field.selects_same_value(&field) {
            let existing = &mut selections[index];
            existing.field.merge_directives(&field.directives);
            existing.is_requirement &= is_requirement;
            if let Some(incoming) = field.selection_set {
                match &mut existing.field.selection_set {
                    Some(selection_set) => selection_set.merge(incoming),
                    None => existing.field.selection_set = Some(incoming),
                }
            }
            return Ok(());
        }

        // Two fields want the same response name. The operation's own field keeps it.
        let alias = alias_name(field.response_name(), selections);
        let aliased = if is_requirement {
            &mut field
        } else if selections[index].is_requirement {
            &mut selections[index].field
        } else {
            return Err(PlannerError::internal(format!(
                "fields \"{}\" on \"{parent_type}\" cannot be merged",
                field.response_name()
            )));
        };
        self.aliases.push(RequirementAlias {
            parent_type,
            field: Field {
                alias: None,
                directives: Default::default(),
                selection_set: None,
                ..aliased.clone()
            },
            alias: alias.clone(),
        });
        aliased.alias = Some(alias);
        selections.push(GroupSelection {
            field,
            is_requirement,
        });
        Ok(())
    }

    fn finish(self, parent_type: Option<&Name>) -> (SelectionSet, Vec<RequirementAlias>) {
        let mut selection_set = SelectionSet::default();
        for (type_condition, selections) in self.branches {
            let selections = SelectionSet::new(
                selections
                    .into_iter()
                    .map(|selection| Selection::Field(selection.field))
                    .collect(),
            );
            if parent_type == Some(&type_condition) {
                selection_set.merge(selections);
            } else {
                selection_set.push(Selection::InlineFragment(InlineFragment::new(
                    type_condition,
                    selections,
                )));
            }
        }
        (selection_set, self.aliases)
    }
}

fn alias_name(response_name: &Name, taken: &[GroupSelection]) -> Name {
    (0usize..)
        .filter_map(|counter| Name::new(&format!("{response_name}__alias_{counter}")).ok())
        .find(|alias| {
            !taken
                .iter()
                .any(|selection| selection.field.response_name() == alias)
        })
        .unwrap_or_else(|| response_name.clone())
}

/// Builds the selection set for a list of fields: fields on the same type are grouped under one
/// inline fragment (or none, for fields of `parent_type`), and fields sharing a response name
/// are merged.
pub(crate) fn selection_set_from_field_set(
    fields: Vec<CollectedField>,
    parent_type: Option<&Name>,
) -> Result<SelectionSet> {
    let mut builder = SelectionBuilder::default();
    for field in fields {
        builder.add(field.scope.parent_type, field.field, false)?;
    }
    Ok(builder.finish(parent_type).0)
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum WrapKind {
    Sequence,
    Parallel,
}

/// Wraps `nodes` in a node of the given kind. A single node is returned as is, and nodes that
/// already are of that kind are spliced into the new one.
pub(crate) fn flat_wrap(kind: WrapKind, mut nodes: Vec<PlanNode>) -> PlanNode {
    if nodes.len() == 1 {
        if let Some(node) = nodes.pop() {
            return node;
        }
    }
    let nodes = nodes
        .into_iter()
        .flat_map(|node| match (kind, node) {
            (WrapKind::Sequence, PlanNode::Sequence { nodes })
            | (WrapKind::Parallel, PlanNode::Parallel { nodes }) => nodes,
            (_, node) => vec![node],
        })
        .collect();
    match kind {
        WrapKind::Sequence => PlanNode::Sequence { nodes },
        WrapKind::Parallel => PlanNode::Parallel { nodes },
    }
}

/// Wraps a node in a `Flatten` unless it applies at the root of the response.
pub(crate) fn flatten_at(merge_at: Vec<ResponsePathElement>, node: PlanNode) -> PlanNode {
    if merge_at.is_empty() {
        node
    } else {
        PlanNode::Flatten(FlattenNode {
            path: merge_at,
            node: Box::new(node),
        })
    }
}

/// The response path of a field: the path of its parent, the field's response name, and one
/// `@` per level of list nesting of its type.
pub(crate) fn add_path(
    path: &[ResponsePathElement],
    response_name: &Name,
    ty: &ast::Type,
) -> Vec<ResponsePathElement> {
    let mut path = path.to_vec();
    path.push(ResponsePathElement::Field(response_name.clone()));
    let mut ty = ty;
    while let ast::Type::List(inner) | ast::Type::NonNullList(inner) = ty {
        path.push(ResponsePathElement::AnyIndex);
        ty = &**inner;
    }
    path
}

/// The operation sent to a service for a group fetching root fields.
pub(crate) fn operation_for_root_fetch(
    operation_kind: OperationKind,
    variables: &[&Node<ast::VariableDefinition>],
    selection_set: &SelectionSet,
    fragments: &[Arc<Fragment>],
) -> String {
    let mut writer = CompactWriter::default();
    if operation_kind != OperationKind::Query || !variables.is_empty() {
        writer.token(operation_kind.as_str());
    }
    if !variables.is_empty() {
        writer.punctuator("(");
        for variable in variables {
            writer.variable_definition(variable);
        }
        writer.punctuator(")");
    }
    writer.selection_set(selection_set);
    for fragment in fragments {
        writer.fragment(fragment);
    }
    writer.finish()
}

/// The operation sent to a service for a group fetching fields of entities, selected through
/// the `_entities` field from their representations.
pub(crate) fn operation_for_entities_fetch(
    variables: &[&Node<ast::VariableDefinition>],
    selection_set: &SelectionSet,
    fragments: &[Arc<Fragment>],
) -> String {
    let mut writer = CompactWriter::default();
    writer.token(OperationKind::Query.as_str());
    writer.punctuator("(");
    writer.variable(REPRESENTATIONS_VARIABLE);
    writer.punctuator(":");
    writer.ty(&ast::Type::NonNullList(Box::new(ast::Type::NonNullNamed(
        ANY_SCALAR,
    ))));
    for variable in variables {
        writer.variable_definition(variable);
    }
    writer.punctuator(")");
    writer.punctuator("{");
    writer.token(ENTITIES_FIELD);
    writer.punctuator("(");
    writer.token(REPRESENTATIONS_VARIABLE);
    writer.punctuator(":");
    writer.variable(REPRESENTATIONS_VARIABLE);
    writer.punctuator(")");
    writer.selection_set(selection_set);
    writer.punctuator("}");
    for fragment in fragments {
        writer.fragment(fragment);
    }
    writer.finish()
}
