//! Expansion of inline fragments and fragment spreads into lists of fields, each annotated with
//! the scope (parent type and possible runtime types) in which it was selected.
//!
//! Type conditions nest: a field selected under `... on A { ... on B { f } }` is reachable only
//! for runtime types that are possible for both `A` and `B`. A branch whose scope ends up empty
//! can never match and contributes nothing.

use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use indexmap::IndexMap;
use indexmap::IndexSet;

use super::Field;
use super::Fragment;
use super::InlineFragment;
use super::Selection;
use super::SelectionSet;
use super::TYPENAME_FIELD;
use crate::error::PlannerError;
use crate::error::Result;
use crate::schema::ComposedSchema;
use crate::schema::FieldMetadata;

/// The type a selection applies to, along with the object types it may have at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Scope {
    pub(crate) parent_type: Name,
    pub(crate) possible_types: Arc<IndexSet<Name>>,
}

impl Scope {
    pub(crate) fn new(schema: &ComposedSchema, type_name: &Name) -> Result<Self> {
        let possible_types =
            schema
                .possible_types(type_name)
                .ok_or_else(|| PlannerError::InvalidTypeCondition {
                    type_name: type_name.to_string(),
                })?;
        Ok(Self {
            parent_type: type_name.clone(),
            possible_types: possible_types.clone(),
        })
    }

    /// A scope holding a single object type.
    pub(crate) fn concrete(type_name: Name) -> Self {
        Self {
            possible_types: Arc::new(IndexSet::from([type_name.clone()])),
            parent_type: type_name,
        }
    }

    /// Narrows this scope by a type condition. The resulting possible types are those of this
    /// scope that also satisfy the condition, in this scope's order.
    pub(crate) fn refine(&self, schema: &ComposedSchema, type_condition: &Name) -> Result<Self> {
        if *type_condition == self.parent_type {
            return Ok(self.clone());
        }
        let condition = Self::new(schema, type_condition)?;
        let possible_types = self
            .possible_types
            .iter()
            .filter(|possible_type| condition.possible_types.contains(*possible_type))
            .cloned()
            .collect();
        Ok(Self {
            parent_type: condition.parent_type,
            possible_types: Arc::new(possible_types),
        })
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.possible_types.is_empty()
    }
}

/// A field of a selection set, together with the scope it was selected in and its definition in
/// the supergraph.
#[derive(Debug, Clone)]
pub(crate) struct CollectedField {
    pub(crate) scope: Scope,
    pub(crate) field: Field,
    pub(crate) definition: Arc<FieldMetadata>,
}

impl CollectedField {
    pub(crate) fn typename(schema: &ComposedSchema, scope: Scope) -> Result<Self> {
        let definition = schema
            .field(&scope.parent_type, TYPENAME_FIELD.as_str())
            .ok_or_else(|| PlannerError::InvalidTypeCondition {
                type_name: scope.parent_type.to_string(),
            })?
            .clone();
        Ok(Self {
            scope,
            field: Field::typename(),
            definition,
        })
    }

    pub(crate) fn response_name(&self) -> &Name {
        self.field.response_name()
    }

    pub(crate) fn parent_type(&self) -> &Name {
        &self.scope.parent_type
    }

    /// Whether a fetch selecting this field returns `other` under the same response name. This is
    /// how requirements are matched against what a fetch already selects: representations are
    /// read by response name, and a field selected under a condition may be missing.
    pub(crate) fn matches(&self, other: &CollectedField) -> bool {
        self.selects_same_value(other)
            && self.response_name() == other.response_name()
            && self.field.directives.0.is_empty()
    }

    /// Whether both select the same field of the same type with the same arguments. `__typename`
    /// matches across types, as any selection of it yields the runtime type.
    pub(crate) fn selects_same_value(&self, other: &CollectedField) -> bool {
        self.definition.name == other.definition.name
            && self.field.arguments == other.field.arguments
            && (self.scope.parent_type == other.scope.parent_type
                || self.definition.name == TYPENAME_FIELD)
    }
}

/// The directives of a field selected several times, as `Field::merge_directives` combines them.
pub(crate) fn merged_directives(fields: &[CollectedField]) -> ast::DirectiveList {
    let mut fields = fields.iter();
    let Some(first) = fields.next() else {
        return ast::DirectiveList::default();
    };
    let mut merged = first.field.clone().with_selection_set(None);
    for field in fields {
        merged.merge_directives(&field.field.directives);
    }
    merged.directives
}

/// Groups fields by response name, in order of first appearance.
pub(crate) fn group_by_response_name(
    fields: impl IntoIterator<Item = CollectedField>,
) -> IndexMap<Name, Vec<CollectedField>> {
    let mut groups: IndexMap<Name, Vec<CollectedField>> = IndexMap::new();
    for field in fields {
        groups
            .entry(field.response_name().clone())
            .or_default()
            .push(field);
    }
    groups
}

/// Groups fields by the type they were selected on, in order of first appearance.
pub(crate) fn group_by_parent_type(
    fields: impl IntoIterator<Item = CollectedField>,
) -> IndexMap<Name, Vec<CollectedField>> {
    let mut groups: IndexMap<Name, Vec<CollectedField>> = IndexMap::new();
    for field in fields {
        groups
            .entry(field.parent_type().clone())
            .or_default()
            .push(field);
    }
    groups
}

/// Fields sharing a response name on the same type must select the same field with the same
/// arguments, or the response would be ambiguous.
pub(crate) fn check_mergeable(fields: &[CollectedField]) -> Result<()> {
    let Some((first, rest)) = fields.split_first() else {
        return Ok(());
    };
    for other in rest {
        if first.field.name != other.field.name || first.field.arguments != other.field.arguments
        {
            return Err(PlannerError::InvalidGraphQL {
                message: format!(
                    "Fields \"{}\" conflict because they select different fields or arguments on \"{}\"",
                    first.response_name(),
                    first.parent_type()
                ),
            });
        }
    }
    Ok(())
}

fn is_introspection_field(name: &str) -> bool {
    matches!(name, "__schema" | "__type")
}

/// Collects fields out of selection sets, expanding fragments against the supergraph.
pub(crate) struct FieldCollector<'a> {
    schema: &'a ComposedSchema,
    fragments: &'a IndexMap<Name, Arc<Fragment>>,
}

impl<'a> FieldCollector<'a> {
    pub(crate) fn new(
        schema: &'a ComposedSchema,
        fragments: &'a IndexMap<Name, Arc<Fragment>>,
    ) -> Self {
        Self { schema, fragments }
    }

    pub(crate) fn collect_fields(
        &self,
        scope: &Scope,
        selection_set: &SelectionSet,
    ) -> Result<Vec<CollectedField>> {
        let mut fields = Vec::new();
        self.collect_into(scope, selection_set, &[], &mut Vec::new(), &mut fields)?;
        Ok(fields)
    }

    /// Collects the sub-selections of `fields`, which all share one response name, in the scope
    /// of their return type.
    pub(crate) fn collect_subfields(
        &self,
        return_type: &Name,
        fields: &[CollectedField],
    ) -> Result<Vec<CollectedField>> {
        let scope = Scope::new(self.schema, return_type)?;
        let mut subfields = Vec::new();
        for field in fields {
            if let Some(selection_set) = &field.field.selection_set {
                self.collect_into(&scope, selection_set, &[], &mut Vec::new(), &mut subfields)?;
            }
        }
        Ok(subfields)
    }

    fn collect_into(
        &self,
        scope: &Scope,
        selection_set: &SelectionSet,
        conditions: &[Node<ast::Directive>],
        expanding: &mut Vec<Name>,
        fields: &mut Vec<CollectedField>,
    ) -> Result<()> {
        for selection in selection_set.iter() {
            match selection {
                Selection::Field(field) => {
                    if is_introspection_field(field.name.as_str()) {
                        continue;
                    }
                    let definition = self
                        .schema
                        .field(&scope.parent_type, &field.name)
                        .ok_or_else(|| PlannerError::UnknownField {
                            type_name: scope.parent_type.to_string(),
                            field_name: field.name.to_string(),
                        })?;
                    let mut field = field.clone();
                    // Conditions of enclosing fragments apply to each of their fields.
                    field.directives.0.extend(conditions.iter().cloned());
                    fields.push(CollectedField {
                        scope: scope.clone(),
                        field,
                        definition: definition.clone(),
                    });
                }
                Selection::InlineFragment(fragment) => {
                    let fragment_scope = match &fragment.type_condition {
                        Some(type_condition) => scope.refine(self.schema, type_condition)?,
                        None => scope.clone(),
                    };
                    if fragment_scope.is_empty() {
                        tracing::debug!(
                            parent_type = %scope.parent_type,
                            type_condition = %fragment_scope.parent_type,
                            "skipping inline fragment that can never match"
                        );
                        continue;
                    }
                    let conditions = [conditions, fragment.directives.0.as_slice()].concat();
                    self.collect_into(
                        &fragment_scope,
                        &fragment.selection_set,
                        &conditions,
                        expanding,
                        fields,
                    )?;
                }
                Selection::FragmentSpread(spread) => {
                    let fragment = self.fragments.get(&spread.fragment_name).ok_or_else(|| {
                        PlannerError::UnknownFragment {
                            name: spread.fragment_name.to_string(),
                        }
                    })?;
                    if expanding.contains(&fragment.name) {
                        return Err(PlannerError::InvalidGraphQL {
                            message: format!(
                                "Cannot spread fragment \"{}\" within itself.",
                                fragment.name
                            ),
                        });
                    }
                    let fragment_scope = scope.refine(self.schema, &fragment.type_condition)?;
                    if fragment_scope.is_empty() {
                        tracing::debug!(
                            parent_type = %scope.parent_type,
                            fragment = %fragment.name,
                            "skipping fragment spread that can never match"
                        );
                        continue;
                    }
                    let conditions = [conditions, spread.directives.0.as_slice()].concat();
                    expanding.push(fragment.name.clone());
                    self.collect_into(
                        &fragment_scope,
                        &fragment.selection_set,
                        &conditions,
                        expanding,
                        fields,
                    )?;
                    expanding.pop();
                }
            }
        }
        Ok(())
    }

    /// Replaces a field selected on an abstract type by one copy per possible runtime type, each
    /// carrying the definition of that type. `__typename` and fields of object types are returned
    /// unchanged.
    pub(crate) fn split_by_runtime_type(&self, field: CollectedField) -> Result<Vec<CollectedField>> {
        if !self.schema.is_abstract_type(field.parent_type())
            || field.definition.name == TYPENAME_FIELD
        {
            return Ok(vec![field]);
        }
        field
            .scope
            .possible_types
            .iter()
            .map(|runtime_type| {
                let definition = self
                    .schema
                    .field(runtime_type, &field.field.name)
                    .ok_or_else(|| PlannerError::UnknownField {
                        type_name: runtime_type.to_string(),
                        field_name: field.field.name.to_string(),
                    })?;
                Ok(CollectedField {
                    scope: Scope::concrete(runtime_type.clone()),
                    field: field.field.clone(),
                    definition: definition.clone(),
                })
            })
            .collect()
    }

    /// Rewrites a selection set so that it holds no fragment spread, every type condition names
    /// an object type (or is dropped when it names the enclosing type), and fields selected more
    /// than once are merged. First-seen order is preserved.
    pub(crate) fn normalize(
        &self,
        scope: &Scope,
        selection_set: &SelectionSet,
    ) -> Result<SelectionSet> {
        let mut fields = Vec::new();
        for field in self.collect_fields(scope, selection_set)? {
            if field.scope.parent_type == scope.parent_type {
                fields.push(field);
            } else {
                fields.extend(self.split_by_runtime_type(field)?);
            }
        }

        let mut branches: IndexMap<Name, SelectionSet> = IndexMap::new();
        for fields_for_name in group_by_response_name(fields).into_values() {
            for (parent_type, fields_for_type) in group_by_parent_type(fields_for_name) {
                let field = self.merge_fields(&fields_for_type)?;
                branches
                    .entry(parent_type)
                    .or_default()
                    .push(Selection::Field(field));
            }
        }

        let mut normalized = SelectionSet::default();
        for (parent_type, selection_set) in branches {
            if parent_type == scope.parent_type {
                normalized.selections.extend(selection_set.selections);
            } else {
                normalized.push(Selection::InlineFragment(InlineFragment::new(
                    parent_type,
                    selection_set,
                )));
            }
        }
        Ok(normalized)
    }

    fn merge_fields(&self, fields: &[CollectedField]) -> Result<Field> {
        check_mergeable(fields)?;
        let Some(first) = fields.first() else {
            return Err(PlannerError::internal("cannot merge an empty list of fields"));
        };
        let mut field = first.field.clone().with_selection_set(None);
        field.directives = merged_directives(fields);
        let return_type = first.definition.return_type();
        if !self.schema.is_composite_type(return_type) {
            return Ok(field);
        }
        let mut merged = SelectionSet::default();
        for field in fields {
            if let Some(selection_set) = &field.field.selection_set {
                merged
                    .selections
                    .extend(selection_set.selections.iter().cloned());
            }
        }
        let mut selection_set = self.normalize(&Scope::new(self.schema, return_type)?, &merged)?;
        if selection_set.is_empty() {
            selection_set.push(Selection::Field(Field::typename()));
        }
        Ok(field.with_selection_set(Some(selection_set)))
    }
}
