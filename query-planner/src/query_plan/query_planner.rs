use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::ast::OperationType;
use indexmap::IndexSet;
use serde::Deserialize;
use serde::Serialize;

use super::FetchNode;
use super::OperationKind;
use super::PlanNode;
use super::QueryPlan;
use super::ResponsePathElement;
use super::fetch_group::FetchGroup;
use super::fetch_group::GroupRoute;
use super::fetch_group::WrapKind;
use super::fetch_group::add_path;
use super::fetch_group::flat_wrap;
use super::fetch_group::flatten_at;
use super::fetch_group::operation_for_entities_fetch;
use super::fetch_group::operation_for_root_fetch;
use super::fetch_group::selection_set_from_field_set;
use super::fragments::InternalFragments;
use super::requirements::RequirementResolver;
use crate::error::PlannerError;
use crate::error::Result;
use crate::operation::Field;
use crate::operation::Fragment;
use crate::operation::Selection;
use crate::operation::SelectionSet;
use crate::operation::TYPENAME_FIELD;
use crate::operation::context::Operation;
use crate::operation::context::OperationContext;
use crate::operation::normalize::CollectedField;
use crate::operation::normalize::FieldCollector;
use crate::operation::normalize::Scope;
use crate::operation::normalize::check_mergeable;
use crate::operation::normalize::group_by_parent_type;
use crate::operation::normalize::group_by_response_name;
use crate::operation::normalize::merged_directives;
use crate::schema::ComposedSchema;
use crate::utils::logging::snapshot;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryPlannerConfig {
    /// Whether sub-selections of more than two fields are extracted into fragment definitions
    /// (`__QueryPlanFragment_0__`, …) in the operations sent to services. Identical
    /// sub-selections then share one definition, which can make service requests much smaller
    /// for operations that select the same data at several places.
    ///
    /// Defaults to false.
    pub auto_fragmentization: bool,

    /// A sub-set of configurations that are meant for debugging or testing. All the configurations
    /// in this sub-set are provided without guarantees of stability (they may be dangerous) or
    /// continued support (they may be removed without warning).
    pub debug: QueryPlannerDebugConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryPlannerDebugConfig {
    /// If used and the supergraph is built from a single service, then user queries do not go
    /// through the normal query planning and instead a fetch to the one service is built directly
    /// from the input query.
    pub bypass_planner_for_single_subgraph: bool,
}

/// Plans operations against one supergraph.
///
/// The planner holds no per-operation state: it can be shared between threads and used for any
/// number of planning calls.
#[derive(Debug, Clone)]
pub struct QueryPlanner {
    config: QueryPlannerConfig,
    schema: Arc<ComposedSchema>,
}

impl QueryPlanner {
    #[cfg_attr(
        feature = "snapshot_tracing",
        tracing::instrument(level = "trace", skip_all, name = "QueryPlanner::new")
    )]
    pub fn new(supergraph_sdl: &str, config: QueryPlannerConfig) -> Result<Self> {
        let schema = ComposedSchema::parse(supergraph_sdl)?;
        Ok(Self::from_schema(Arc::new(schema), config))
    }

    pub fn from_schema(schema: Arc<ComposedSchema>, config: QueryPlannerConfig) -> Self {
        Self { config, schema }
    }

    pub fn schema(&self) -> &ComposedSchema {
        &self.schema
    }

    pub fn config(&self) -> &QueryPlannerConfig {
        &self.config
    }

    /// Parses `source`, selects the operation to plan, and plans it.
    pub fn plan(&self, source: &str, operation_name: Option<&str>) -> Result<QueryPlan> {
        let context = OperationContext::parse(source, operation_name)?;
        self.build_query_plan(&context)
    }

    #[cfg_attr(
        feature = "snapshot_tracing",
        tracing::instrument(level = "trace", skip_all, name = "QueryPlanner::build_query_plan")
    )]
    pub fn build_query_plan(&self, context: &OperationContext) -> Result<QueryPlan> {
        let operation = context.operation();
        if operation.operation_type == OperationType::Subscription {
            return Err(PlannerError::UnsupportedOperation {
                message: "Query planning does not support subscriptions for now.".to_owned(),
            });
        }

        if self.config.debug.bypass_planner_for_single_subgraph {
            let mut services = self.schema.services();
            if let (Some(service), None) = (services.next(), services.next()) {
                let node = FetchNode {
                    service_name: service.name().to_owned(),
                    requires: None,
                    variable_usages: operation
                        .variables
                        .iter()
                        .map(|variable| variable.name.to_string())
                        .collect(),
                    input_rewrites: Vec::new(),
                    operation: context.operation_source().to_owned(),
                    operation_kind: operation.operation_type.into(),
                    selection_set: context.normalized_selection_set(&self.schema)?,
                    internal_fragments: Vec::new(),
                };
                tracing::debug!(
                    service = service.name(),
                    "bypassed planning for a single service supergraph"
                );
                return Ok(QueryPlan {
                    node: Some(PlanNode::Fetch(node)),
                });
            }
        }

        let mut planning = QueryPlanningContext {
            schema: &self.schema,
            operation,
            collector: FieldCollector::new(&self.schema, &context.fragments),
            auto_fragmentization: self.config.auto_fragmentization,
            internal_fragments: InternalFragments::default(),
        };
        let plan = planning.build_query_plan()?;

        tracing::debug!(
            operation_name = context.operation_name(),
            fetch_count = plan.fetch_nodes().len(),
            "built query plan"
        );
        snapshot!(plan, "query plan");
        Ok(plan)
    }
}

/// State of a single planning call.
struct QueryPlanningContext<'a> {
    schema: &'a ComposedSchema,
    operation: &'a Operation,
    collector: FieldCollector<'a>,
    auto_fragmentization: bool,
    internal_fragments: InternalFragments,
}

impl QueryPlanningContext<'_> {
    fn build_query_plan(&mut self) -> Result<QueryPlan> {
        let root_type = self.schema.root_type(self.operation.operation_type)?;
        let is_mutation = self.operation.operation_type == OperationType::Mutation;
        let fields = self.collector.collect_fields(
            &Scope::new(self.schema, root_type)?,
            &self.operation.selection_set,
        )?;

        // Mutation fields run one after the other, so only consecutive fields of one service
        // can share a fetch.
        let groups = self.split_root_fields(fields, is_mutation)?;
        let nodes = groups
            .into_iter()
            .map(|group| self.execution_node_for_group(group, Some(root_type)))
            .collect::<Result<Vec<_>>>()?;

        let kind = if is_mutation {
            WrapKind::Sequence
        } else {
            WrapKind::Parallel
        };
        Ok(QueryPlan {
            node: (!nodes.is_empty()).then(|| flat_wrap(kind, nodes)),
        })
    }

    fn requirements(&self) -> RequirementResolver<'_> {
        RequirementResolver::new(self.schema, &self.collector)
    }

    fn split_root_fields(
        &mut self,
        fields: Vec<CollectedField>,
        serially: bool,
    ) -> Result<Vec<FetchGroup>> {
        let mut groups: Vec<FetchGroup> = Vec::new();
        for fields_for_name in group_by_response_name(fields).into_values() {
            for fields_for_type in group_by_parent_type(fields_for_name).into_values() {
                let Some(field) = fields_for_type.first() else {
                    continue;
                };
                // The gateway answers `__typename` on root types itself.
                if field.definition.name == TYPENAME_FIELD {
                    continue;
                }
                check_mergeable(&fields_for_type)?;
                let service = self
                    .schema
                    .owning_service(&field.definition)
                    .ok_or_else(|| PlannerError::UnownedField {
                        type_name: field.parent_type().to_string(),
                        field_name: field.definition.name.to_string(),
                    })?;

                let existing = if serially {
                    groups
                        .last()
                        .filter(|group| group.service_name == service)
                        .map(|_| groups.len() - 1)
                } else {
                    groups
                        .iter()
                        .position(|group| group.service_name == service)
                };
                let index = match existing {
                    Some(index) => index,
                    None => {
                        groups.push(FetchGroup::new(service, Vec::new()));
                        groups.len() - 1
                    }
                };

                let group = &mut groups[index];
                let completed = self.complete_field(&[], group, fields_for_type)?;
                group.add_field(completed);
            }
        }
        Ok(groups)
    }

    fn split_subfields(
        &mut self,
        path: &[ResponsePathElement],
        fields: Vec<CollectedField>,
        parent_group: &mut FetchGroup,
    ) -> Result<()> {
        for fields_for_name in group_by_response_name(fields).into_values() {
            for (parent_type, fields_for_type) in group_by_parent_type(fields_for_name) {
                let Some(field) = fields_for_type.first() else {
                    continue;
                };
                check_mergeable(&fields_for_type)?;

                if !self.schema.is_abstract_type(&parent_type)
                    || field.definition.name == TYPENAME_FIELD
                {
                    let route = self.route_field(field, parent_group)?;
                    let group = route.resolve(parent_group)?;
                    let completed = self.complete_field(path, group, fields_for_type)?;
                    group.add_field(completed);
                    continue;
                }

                // A field of an abstract type may be resolved by different services depending on
                // the runtime type, so it is routed separately for each possible type. Routes are
                // all decided before any field is completed, so that the requirements each route
                // adds to the parent group come first.
                let mut routes: Vec<(GroupRoute, Vec<CollectedField>)> = Vec::new();
                for runtime_field in self.collector.split_by_runtime_type(field.clone())? {
                    let route = self.route_field(&runtime_field, parent_group)?;
                    let runtime_fields = fields_for_type
                        .iter()
                        .map(|field| CollectedField {
                            scope: runtime_field.scope.clone(),
                            field: field.field.clone(),
                            definition: runtime_field.definition.clone(),
                        })
                        .collect();
                    routes.push((route, runtime_fields));
                }
                let mut route_order: IndexSet<GroupRoute> = IndexSet::new();
                route_order.extend(routes.iter().map(|(route, _)| route.clone()));
                for route in route_order {
                    for (_, runtime_fields) in routes.iter().filter(|(other, _)| *other == route) {
                        let group = route.resolve(parent_group)?;
                        let completed = self.complete_field(path, group, runtime_fields.clone())?;
                        group.add_field(completed);
                    }
                }
            }
        }
        Ok(())
    }

    /// Decides which group fetches `field`, creating the dependent groups the route goes through
    /// and adding their requirements to the groups that must return them.
    fn route_field(
        &self,
        field: &CollectedField,
        parent_group: &mut FetchGroup,
    ) -> Result<GroupRoute> {
        let parent_type = field.parent_type();
        let field_name = &field.definition.name;
        if *field_name == TYPENAME_FIELD || self.schema.is_value_type(parent_type) {
            return Ok(GroupRoute::Parent);
        }
        let base_service = self.schema.base_service(parent_type).ok_or_else(|| {
            PlannerError::internal(format!("entity type \"{parent_type}\" has no base service"))
        })?;
        let owning_service = self
            .schema
            .owning_service(&field.definition)
            .ok_or_else(|| PlannerError::UnownedField {
                type_name: parent_type.to_string(),
                field_name: field_name.to_string(),
            })?;
        let parent_service = parent_group.service_name.clone();
        let requirements = self.requirements();

        if owning_service == base_service {
            if owning_service == parent_service || parent_group.can_select(field) {
                return Ok(GroupRoute::Parent);
            }
            // Key the dependent fetch on what the parent's service can return, or else on a key
            // of the owning service.
            let key_fields = match requirements.key_fields(parent_type, &parent_service, |key| {
                parent_group.has_available(key)
            })? {
                Some(key_fields) => key_fields,
                None => requirements.entity_key(parent_type, field_name, owning_service, |key| {
                    parent_group.has_available(key)
                })?,
            };
            parent_group.dependent_group_for_service(owning_service, key_fields);
            return Ok(GroupRoute::Dependent(owning_service.to_owned()));
        }

        // An extension field: its service needs a representation of the entity, along with the
        // fields it `@requires`.
        let key_fields = requirements.key_fields(parent_type, owning_service, |key| {
            parent_group.has_available(key)
        })?;
        let mut required_fields = match &key_fields {
            Some(key_fields) => key_fields.clone(),
            None => vec![CollectedField::typename(
                self.schema,
                Scope::new(self.schema, parent_type)?,
            )?],
        };
        required_fields.extend(requirements.requires_fields(&field.definition)?);
        let unresolvable = |service: &str| PlannerError::UnresolvableRequirement {
            type_name: parent_type.to_string(),
            field_name: field_name.to_string(),
            service: service.to_owned(),
        };

        if required_fields
            .iter()
            .all(|required| parent_group.has_available(required))
        {
            if owning_service == parent_service {
                return Ok(GroupRoute::Parent);
            }
            if key_fields.is_none() {
                return Err(unresolvable(owning_service));
            }
            parent_group.dependent_group_for_service(owning_service, required_fields);
            return Ok(GroupRoute::Dependent(owning_service.to_owned()));
        }

        if key_fields.is_none() {
            return Err(unresolvable(owning_service));
        }
        if base_service == parent_service {
            parent_group.dependent_group_for_service(owning_service, required_fields);
            return Ok(GroupRoute::Dependent(owning_service.to_owned()));
        }

        // Neither the parent nor the owning service can produce the required fields: fetch them
        // from the base service first.
        let base_key_fields = requirements
            .key_fields(parent_type, &parent_service, |key| {
                parent_group.has_available(key)
            })?
            .ok_or_else(|| unresolvable(&parent_service))?;
        parent_group
            .dependent_group_for_service(base_service, base_key_fields)
            .dependent_group_for_service(owning_service, required_fields);
        Ok(GroupRoute::ThroughBase {
            base: base_service.to_owned(),
            owner: owning_service.to_owned(),
        })
    }

    /// Plans the sub-selections of `fields`, which share a response name and parent type, and
    /// returns the field to select in `parent_group`. Fetches needed for sub-selections other
    /// services resolve become dependents of `parent_group`.
    fn complete_field(
        &mut self,
        path: &[ResponsePathElement],
        parent_group: &mut FetchGroup,
        fields: Vec<CollectedField>,
    ) -> Result<CollectedField> {
        let Some(first) = fields.first() else {
            return Err(PlannerError::internal("cannot complete an empty list of fields"));
        };
        let return_type = first.definition.return_type().clone();
        let directives = merged_directives(&fields);
        if !self.schema.is_composite_type(&return_type) {
            let mut completed = first.clone();
            completed.field.selection_set = None;
            completed.field.directives = directives;
            return Ok(completed);
        }

        let field_path = add_path(path, first.response_name(), &first.definition.ty);
        let mut sub_group = FetchGroup::new(parent_group.service_name.clone(), field_path.clone());
        sub_group.provided_fields = self
            .requirements()
            .provided_fields(&first.definition, &parent_group.service_name)?;
        // `__typename` tells the executor which type condition applies to each object.
        if self.schema.is_abstract_type(&return_type) {
            sub_group.add_field(CollectedField::typename(
                self.schema,
                Scope::new(self.schema, &return_type)?,
            )?);
        }

        let subfields = self.collector.collect_subfields(&return_type, &fields)?;
        self.split_subfields(&field_path, subfields, &mut sub_group)?;

        let field_count = sub_group.field_count();
        let mut selection_set = sub_group.take_selection_set(Some(&return_type))?;
        if selection_set.is_empty() {
            selection_set.push(Selection::Field(Field::typename()));
        }
        if self.auto_fragmentization && field_count > 2 {
            let fragment = self
                .internal_fragments
                .fragment_for(&return_type, selection_set)?;
            selection_set = fragment.spread();
            parent_group
                .internal_fragments
                .insert(fragment.name.clone(), fragment);
        }
        parent_group
            .internal_fragments
            .extend(std::mem::take(&mut sub_group.internal_fragments));
        parent_group.add_dependents(sub_group.into_dependent_groups());

        let mut completed = first.clone();
        completed.field.directives = directives;
        completed.field.selection_set = Some(selection_set);
        Ok(completed)
    }

    fn execution_node_for_group(
        &self,
        mut group: FetchGroup,
        parent_type: Option<&Name>,
    ) -> Result<PlanNode> {
        snapshot!(
            "FetchGroup",
            group.service_name.as_str(),
            "building execution node"
        );
        let selection_set = group.take_selection_set(parent_type)?;
        let FetchGroup {
            service_name,
            merge_at,
            required_fields,
            input_rewrites,
            internal_fragments,
            dependent_groups_by_service,
            other_dependent_groups,
            ..
        } = group;

        let requires = if required_fields.is_empty() {
            None
        } else {
            Some(selection_set_from_field_set(required_fields, None)?)
        };
        let internal_fragments: Vec<Arc<Fragment>> = internal_fragments.into_values().collect();
        let variables = self.variable_usages(&selection_set, &internal_fragments)?;

        let (operation, operation_kind) = if requires.is_some() {
            (
                operation_for_entities_fetch(&variables, &selection_set, &internal_fragments),
                OperationKind::Query,
            )
        } else {
            let operation_kind = self.operation.operation_type.into();
            (
                operation_for_root_fetch(
                    operation_kind,
                    &variables,
                    &selection_set,
                    &internal_fragments,
                ),
                operation_kind,
            )
        };

        let fetch = FetchNode {
            service_name,
            requires,
            variable_usages: variables
                .iter()
                .map(|variable| variable.name.to_string())
                .collect(),
            input_rewrites,
            operation,
            operation_kind,
            selection_set,
            internal_fragments,
        };
        let node = flatten_at(merge_at, PlanNode::Fetch(fetch));

        let dependent_nodes = dependent_groups_by_service
            .into_values()
            .chain(other_dependent_groups)
            .map(|dependent| self.execution_node_for_group(dependent, None))
            .collect::<Result<Vec<_>>>()?;
        if dependent_nodes.is_empty() {
            return Ok(node);
        }
        Ok(flat_wrap(
            WrapKind::Sequence,
            vec![node, flat_wrap(WrapKind::Parallel, dependent_nodes)],
        ))
    }

    /// Definitions of the variables a fetch uses, in order of first use.
    fn variable_usages(
        &self,
        selection_set: &SelectionSet,
        fragments: &[Arc<Fragment>],
    ) -> Result<Vec<&'_ Node<ast::VariableDefinition>>> {
        let mut names = IndexSet::default();
        selection_set.collect_variables(&mut names);
        for fragment in fragments {
            fragment.selection_set.collect_variables(&mut names);
        }
        names
            .iter()
            .map(|name| {
                self.operation
                    .variable_definition(name)
                    .ok_or_else(|| PlannerError::InvalidGraphQL {
                        message: format!("Variable \"${name}\" is not defined."),
                    })
            })
            .collect()
    }
}
