//! Checks that hold for any correct plan, whatever the operation. `assert_plan!` runs them on
//! every plan it snapshots.
//!
//! The supergraph's join directives are read straight from the schema here rather than through
//! the planner's own index of them.

use std::fmt;

use apollo_compiler::Name;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::ast::OperationType;
use apollo_compiler::schema::ExtendedType;
use federation_query_planner::ComposedSchema;
use federation_query_planner::FetchNode;
use federation_query_planner::OperationKind;
use federation_query_planner::PlanNode;
use federation_query_planner::QueryPlan;
use federation_query_planner::operation::Selection;
use federation_query_planner::operation::SelectionSet;
use indexmap::IndexMap;
use indexmap::IndexSet;

/// Asserts that `plan`, built for `operation`:
/// - fetches every field the operation selects, and no field twice at the same response path
///   (`__typename` and fields other fetches require excepted);
/// - only asks each service for fields it owns, or returns as part of a key or `@provides`;
/// - feeds each dependent fetch representations made of fields an earlier fetch returns;
/// - sequences each dependent fetch after a fetch returning its representations.
#[track_caller]
pub(crate) fn assert_plan_properties(schema: &ComposedSchema, operation: &str, plan: &QueryPlan) {
    let supergraph = Supergraph::new(schema);
    let mut fetches = Vec::new();
    if let Some(node) = &plan.node {
        collect_fetches(node, &[], &[], &mut fetches);
    }

    let mut problems = Vec::new();
    let mut outputs = Vec::new();
    let mut inputs = Vec::new();
    for planned in &fetches {
        let fetch = planned.fetch;
        let root_type = supergraph.root_type(fetch.operation_kind);
        let mut output = Vec::new();
        supergraph.walk(
            fetch,
            fetch.selection_set(),
            &root_type,
            &planned.merge_at,
            Ownership::Checked { provides: None },
            &mut output,
            &mut problems,
        );
        let mut input = Vec::new();
        if let Some(requires) = &fetch.requires {
            if requires
                .iter()
                .any(|selection| !matches!(selection, Selection::InlineFragment(_)))
            {
                problems.push(format!(
                    "representations for \"{}\" are not selected by type",
                    fetch.service_name
                ));
            }
            supergraph.walk(
                fetch,
                requires,
                &root_type,
                &planned.merge_at,
                Ownership::Granted,
                &mut input,
                &mut problems,
            );
        }
        outputs.push(output);
        inputs.push(input);
    }

    let required: IndexSet<&FieldPosition> = inputs.iter().flatten().collect();
    let mut fetched_by: IndexMap<&FieldPosition, usize> = IndexMap::new();
    for (index, output) in outputs.iter().enumerate() {
        let fields: IndexSet<&FieldPosition> = output
            .iter()
            .filter(|position| !position.is_typename && !required.contains(position))
            .collect();
        for position in fields {
            if let Some(previous) = fetched_by.insert(position, index) {
                problems.push(format!(
                    "{position} is fetched from both \"{}\" and \"{}\"",
                    fetches[previous].fetch.service_name, fetches[index].fetch.service_name
                ));
            }
        }
    }

    let fetched: IndexSet<Vec<String>> = outputs
        .iter()
        .flatten()
        .map(FieldPosition::response_path)
        .collect();
    for path in client_leaf_paths(operation) {
        if !fetched.contains(&path) {
            problems.push(format!("{} is selected but never fetched", path.join(".")));
        }
    }

    for (index, input) in inputs.iter().enumerate() {
        let service = &fetches[index].fetch.service_name;
        for required in input {
            let producers: Vec<usize> = (0..outputs.len())
                .filter(|&other| {
                    other != index
                        && outputs[other]
                            .iter()
                            .any(|position| position.satisfies(required))
                })
                .collect();
            if producers.is_empty() {
                problems.push(format!(
                    "\"{service}\" requires {required}, which no other fetch returns"
                ));
            } else if !producers
                .iter()
                .any(|producer| fetches[index].preceding.contains(producer))
            {
                problems.push(format!(
                    "\"{service}\" requires {required}, which is not fetched before it"
                ));
            }
        }
    }

    assert!(
        problems.is_empty(),
        "plan breaks expected properties:\n{}\n{plan}",
        problems.join("\n")
    );
}

/// Where a fetch puts a field in the response. List levels are left out of paths.
#[derive(Debug, PartialEq, Eq, Hash)]
struct FieldPosition {
    path: Vec<String>,
    parent_type: Name,
    response_name: Name,
    is_typename: bool,
    parent_is_abstract: bool,
}

impl FieldPosition {
    fn response_path(&self) -> Vec<String> {
        let mut path = self.path.clone();
        path.push(self.response_name.to_string());
        path
    }

    /// Whether a fetch returning this field provides `required` to a representation.
    fn satisfies(&self, required: &FieldPosition) -> bool {
        self.path == required.path
            && self.response_name == required.response_name
            && (self.is_typename
                || self.parent_is_abstract
                || self.parent_type == required.parent_type)
    }
}

impl fmt::Display for FieldPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\"{}\" on {}",
            self.response_path().join("."),
            self.parent_type
        )
    }
}

struct PlannedFetch<'a> {
    fetch: &'a FetchNode,
    merge_at: Vec<String>,
    /// Indexes of the fetches whose responses are merged before this one starts.
    preceding: Vec<usize>,
}

/// Collects the fetches under `node` and returns the indexes of those it runs.
fn collect_fetches<'a>(
    node: &'a PlanNode,
    merge_at: &[String],
    preceding: &[usize],
    fetches: &mut Vec<PlannedFetch<'a>>,
) -> Vec<usize> {
    match node {
        PlanNode::Sequence { nodes } => {
            let mut done = preceding.to_vec();
            let mut ran = Vec::new();
            for node in nodes {
                let indexes = collect_fetches(node, merge_at, &done, fetches);
                done.extend(&indexes);
                ran.extend(indexes);
            }
            ran
        }
        PlanNode::Parallel { nodes } => nodes
            .iter()
            .flat_map(|node| collect_fetches(node, merge_at, preceding, fetches))
            .collect(),
        PlanNode::Flatten(flatten) => {
            let path: Vec<String> = flatten
                .path
                .iter()
                .map(ToString::to_string)
                .filter(|element| element != "@")
                .collect();
            collect_fetches(&flatten.node, &path, preceding, fetches)
        }
        PlanNode::Fetch(fetch) => {
            fetches.push(PlannedFetch {
                fetch,
                merge_at: merge_at.to_vec(),
                preceding: preceding.to_vec(),
            });
            vec![fetches.len() - 1]
        }
    }
}

#[derive(Clone, Copy)]
enum Ownership<'a> {
    /// Each field must be resolvable by the fetch's service. `provides` lists what the parent
    /// field provides for that service.
    Checked { provides: Option<&'a str> },
    /// Fields under a key or provided field come with it.
    Granted,
}

struct Supergraph<'a> {
    schema: &'a Schema,
    services_by_graph: IndexMap<Name, String>,
}

impl<'a> Supergraph<'a> {
    fn new(schema: &'a ComposedSchema) -> Self {
        let schema: &Schema = schema.schema();
        let Some(ExtendedType::Enum(graphs)) = schema.types.get("join__Graph") else {
            panic!("the supergraph defines no join__Graph enum");
        };
        let services_by_graph = graphs
            .values
            .iter()
            .filter_map(|(graph, value)| {
                let name = value
                    .directives
                    .get("join__graph")?
                    .specified_argument_by_name("name")?
                    .as_str()?;
                Some((graph.clone(), name.to_owned()))
            })
            .collect();
        Self {
            schema,
            services_by_graph,
        }
    }

    fn root_type(&self, operation_kind: OperationKind) -> Name {
        self.schema
            .root_operation(OperationType::from(operation_kind))
            .cloned()
            .expect("the supergraph defines the root type of every fetch")
    }

    fn graph_service(&self, directive: &ast::Directive) -> Option<&str> {
        let graph = directive.specified_argument_by_name("graph")?.as_enum()?;
        self.services_by_graph.get(graph).map(String::as_str)
    }

    fn is_abstract(&self, type_name: &str) -> bool {
        matches!(
            self.schema.types.get(type_name),
            Some(ExtendedType::Interface(_) | ExtendedType::Union(_))
        )
    }

    fn return_type(&self, parent_type: &str, field_name: &str) -> Option<Name> {
        let definition = self.schema.type_field(parent_type, field_name).ok()?;
        Some(definition.ty.inner_named_type().clone())
    }

    /// What a field provides for `service`, as declared by its `@join__field`.
    fn provides(&self, parent_type: &str, field_name: &str, service: &str) -> Option<&'a str> {
        let schema = self.schema;
        let definition = schema.type_field(parent_type, field_name).ok()?;
        definition
            .directives
            .get_all("join__field")
            .filter(|directive| self.graph_service(directive) == Some(service))
            .find_map(|directive| directive.specified_argument_by_name("provides")?.as_str())
    }

    /// Whether `service` can return a field of an object type. `Ok(true)` when it returns it as
    /// part of a key or of what the parent field provides, in which case its sub-selections come
    /// along with it.
    fn check_ownership(
        &self,
        service: &str,
        parent_type: &Name,
        field_name: &Name,
        provides: Option<&str>,
    ) -> Result<bool, String> {
        if field_name.as_str() == "__typename" {
            return Ok(false);
        }
        let Some(ExtendedType::Object(object)) = self.schema.types.get(parent_type) else {
            return Ok(false);
        };
        let Some(definition) = object.fields.get(field_name) else {
            return Err(format!("{parent_type}.{field_name} is not defined"));
        };
        let owner = definition
            .directives
            .get("join__field")
            .and_then(|directive| self.graph_service(directive))
            .or_else(|| {
                object
                    .directives
                    .get("join__owner")
                    .and_then(|directive| self.graph_service(directive))
            });
        // Value types are resolved by every service.
        let Some(owner) = owner else {
            return Ok(false);
        };
        if owner == service {
            return Ok(false);
        }
        let is_key = object
            .directives
            .get_all("join__type")
            .filter(|directive| self.graph_service(directive) == Some(service))
            .filter_map(|directive| directive.specified_argument_by_name("key")?.as_str())
            .any(|key| field_set_names(key).any(|name| name == field_name.as_str()));
        let is_provided = provides
            .is_some_and(|provides| field_set_names(provides).any(|name| name == field_name.as_str()));
        if is_key || is_provided {
            Ok(true)
        } else {
            Err(format!(
                "\"{service}\" is asked for {parent_type}.{field_name}, which \"{owner}\" owns"
            ))
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn walk(
        &self,
        fetch: &FetchNode,
        selection_set: &SelectionSet,
        parent_type: &Name,
        path: &[String],
        ownership: Ownership<'_>,
        positions: &mut Vec<FieldPosition>,
        problems: &mut Vec<String>,
    ) {
        for selection in selection_set.iter() {
            match selection {
                Selection::Field(field) => {
                    positions.push(FieldPosition {
                        path: path.to_vec(),
                        parent_type: parent_type.clone(),
                        response_name: field.response_name().clone(),
                        is_typename: field.name().as_str() == "__typename",
                        parent_is_abstract: self.is_abstract(parent_type),
                    });
                    let granted = match ownership {
                        Ownership::Granted => true,
                        Ownership::Checked { provides } => match self.check_ownership(
                            &fetch.service_name,
                            parent_type,
                            field.name(),
                            provides,
                        ) {
                            Ok(granted) => granted,
                            Err(problem) => {
                                problems.push(problem);
                                true
                            }
                        },
                    };
                    let Some(sub_selection) = field.selection_set() else {
                        continue;
                    };
                    let Some(return_type) = self.return_type(parent_type, field.name()) else {
                        problems.push(format!("{parent_type}.{} is not defined", field.name()));
                        continue;
                    };
                    let ownership = if granted {
                        Ownership::Granted
                    } else {
                        Ownership::Checked {
                            provides: self.provides(
                                parent_type,
                                field.name(),
                                &fetch.service_name,
                            ),
                        }
                    };
                    let mut path = path.to_vec();
                    path.push(field.response_name().to_string());
                    self.walk(
                        fetch,
                        sub_selection,
                        &return_type,
                        &path,
                        ownership,
                        positions,
                        problems,
                    );
                }
                Selection::InlineFragment(fragment) => self.walk(
                    fetch,
                    fragment.selection_set(),
                    fragment.type_condition().unwrap_or(parent_type),
                    path,
                    ownership,
                    positions,
                    problems,
                ),
                Selection::FragmentSpread(spread) => {
                    let fragment = fetch
                        .internal_fragments()
                        .iter()
                        .find(|fragment| fragment.name() == spread.fragment_name());
                    match fragment {
                        Some(fragment) => self.walk(
                            fetch,
                            fragment.selection_set(),
                            fragment.type_condition(),
                            path,
                            ownership,
                            positions,
                            problems,
                        ),
                        None => problems.push(format!(
                            "\"{}\" spreads undefined fragment {}",
                            fetch.service_name,
                            spread.fragment_name()
                        )),
                    }
                }
            }
        }
    }
}

fn field_set_names(field_set: &str) -> impl Iterator<Item = &str> {
    field_set
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|name| !name.is_empty())
}

/// Response paths of the leaf fields an operation selects, fragments expanded. Root
/// `__typename` and introspection are answered without any fetch and left out.
fn client_leaf_paths(operation: &str) -> IndexSet<Vec<String>> {
    let document = ast::Document::parse(operation, "operation.graphql").unwrap();
    let fragments: IndexMap<&Name, &ast::FragmentDefinition> = document
        .definitions
        .iter()
        .filter_map(|definition| match definition {
            ast::Definition::FragmentDefinition(fragment) => Some((&fragment.name, &**fragment)),
            _ => None,
        })
        .collect();
    let mut paths = IndexSet::new();
    for definition in &document.definitions {
        if let ast::Definition::OperationDefinition(operation) = definition {
            collect_leaf_paths(&operation.selection_set, &fragments, &[], &mut paths);
        }
    }
    paths
}

fn collect_leaf_paths(
    selection_set: &[ast::Selection],
    fragments: &IndexMap<&Name, &ast::FragmentDefinition>,
    path: &[String],
    paths: &mut IndexSet<Vec<String>>,
) {
    for selection in selection_set {
        match selection {
            ast::Selection::Field(field) => {
                let is_meta = field.name.as_str().starts_with("__");
                if is_meta && (path.is_empty() || field.name.as_str() != "__typename") {
                    continue;
                }
                let mut field_path = path.to_vec();
                field_path.push(field.alias.as_ref().unwrap_or(&field.name).to_string());
                if field.selection_set.is_empty() {
                    paths.insert(field_path);
                } else {
                    collect_leaf_paths(&field.selection_set, fragments, &field_path, paths);
                }
            }
            ast::Selection::InlineFragment(fragment) => {
                collect_leaf_paths(&fragment.selection_set, fragments, path, paths)
            }
            ast::Selection::FragmentSpread(spread) => {
                if let Some(fragment) = fragments.get(&spread.fragment_name) {
                    collect_leaf_paths(&fragment.selection_set, fragments, path, paths)
                }
            }
        }
    }
}
