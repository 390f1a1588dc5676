//! The composed supergraph, reduced to the metadata query planning consults.
//!
//! The supergraph uses the join spec (v0.1) to record which service contributes what:
//! - `enum join__Graph { X @join__graph(name: "x", url: "…") }` lists services;
//! - `@join__owner(graph:)` names the service that originates a type (its base service);
//! - `@join__type(graph:, key:)` declares a key usable by a service to reference the type;
//! - `@join__field(graph:, requires:, provides:)` marks fields contributed by another service.
//!
//! A composite type without an owner is a value type: any service that can return it can
//! resolve all of its fields.

use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::ast::OperationType;
use apollo_compiler::schema::DirectiveList;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::FieldDefinition;
use apollo_compiler::validation::Valid;
use indexmap::IndexMap;
use indexmap::IndexSet;

use crate::error::PlannerError;
use crate::operation::SelectionSet;
use crate::operation::TYPENAME_FIELD;
use crate::query_plan::OperationKind;

pub(crate) mod field_set;

use field_set::parse_field_set;

const JOIN_GRAPH_ENUM: &str = "join__Graph";
const JOIN_GRAPH_DIRECTIVE: &str = "join__graph";
const JOIN_OWNER_DIRECTIVE: &str = "join__owner";
const JOIN_TYPE_DIRECTIVE: &str = "join__type";
const JOIN_FIELD_DIRECTIVE: &str = "join__field";

/// A service (subgraph) taking part in the supergraph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    name: String,
    url: String,
}

impl Service {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompositeTypeKind {
    Object,
    Interface,
    Union,
}

#[derive(Debug)]
pub(crate) struct CompositeType {
    pub(crate) kind: CompositeTypeKind,
    /// The base service of the type, if it is an entity.
    pub(crate) owner: Option<String>,
    /// Keys usable by each service, in declaration order.
    pub(crate) keys: IndexMap<String, Vec<SelectionSet>>,
    pub(crate) fields: IndexMap<Name, Arc<FieldMetadata>>,
    typename_field: Arc<FieldMetadata>,
}

#[derive(Debug)]
pub(crate) struct FieldMetadata {
    pub(crate) parent_type: Name,
    pub(crate) name: Name,
    pub(crate) ty: ast::Type,
    /// The service resolving this field when it isn't the owner of the parent type.
    pub(crate) service: Option<String>,
    pub(crate) requires: Option<SelectionSet>,
    pub(crate) provides: Option<SelectionSet>,
}

impl FieldMetadata {
    pub(crate) fn return_type(&self) -> &Name {
        self.ty.inner_named_type()
    }

    fn typename(parent_type: &Name) -> Self {
        Self {
            parent_type: parent_type.clone(),
            name: TYPENAME_FIELD,
            ty: ast::Type::NonNullNamed(apollo_compiler::name!("String")),
            service: None,
            requires: None,
            provides: None,
        }
    }
}

/// A supergraph schema, with its join metadata extracted and indexed.
///
/// Built once and shared read-only by every planning call.
#[derive(Debug)]
pub struct ComposedSchema {
    schema: Valid<Schema>,
    services: IndexMap<Name, Service>,
    types: IndexMap<Name, CompositeType>,
    possible_types: IndexMap<Name, Arc<IndexSet<Name>>>,
}

impl ComposedSchema {
    /// Parses and validates a supergraph SDL document.
    pub fn parse(supergraph_sdl: &str) -> Result<Self, PlannerError> {
        let schema = Schema::parse_and_validate(supergraph_sdl, "supergraph.graphql")
            .map_err(|with_errors| PlannerError::invalid_supergraph(with_errors.errors.to_string()))?;
        Self::new(schema)
    }

    pub fn new(schema: Valid<Schema>) -> Result<Self, PlannerError> {
        let services = extract_services(&schema)?;

        let mut types = IndexMap::new();
        for (name, ty) in &schema.types {
            if name.as_str().starts_with("__") {
                continue;
            }
            let (kind, directives) = match ty {
                ExtendedType::Object(object) => (CompositeTypeKind::Object, &object.directives),
                ExtendedType::Interface(interface) => {
                    (CompositeTypeKind::Interface, &interface.directives)
                }
                ExtendedType::Union(union_) => (CompositeTypeKind::Union, &union_.directives),
                _ => continue,
            };
            let mut fields = IndexMap::new();
            match ty {
                ExtendedType::Object(object) => {
                    for definition in object.fields.values() {
                        let field = field_metadata(name, definition, &services)?;
                        fields.insert(field.name.clone(), Arc::new(field));
                    }
                }
                ExtendedType::Interface(interface) => {
                    for definition in interface.fields.values() {
                        let field = field_metadata(name, definition, &services)?;
                        fields.insert(field.name.clone(), Arc::new(field));
                    }
                }
                _ => {}
            }
            types.insert(
                name.clone(),
                CompositeType {
                    kind,
                    owner: owner_service(directives, &services)?,
                    keys: type_keys(directives, &services)?,
                    fields,
                    typename_field: Arc::new(FieldMetadata::typename(name)),
                },
            );
        }

        let mut possible_types = IndexMap::new();
        for (name, composite) in &types {
            let possible: IndexSet<Name> = match (composite.kind, schema.types.get(name)) {
                (CompositeTypeKind::Object, _) => IndexSet::from([name.clone()]),
                (CompositeTypeKind::Union, Some(ExtendedType::Union(union_))) => union_
                    .members
                    .iter()
                    .map(|member| member.name.clone())
                    .collect(),
                (CompositeTypeKind::Interface, _) => schema
                    .types
                    .iter()
                    .filter_map(|(object_name, ty)| match ty {
                        ExtendedType::Object(object)
                            if object.implements_interfaces.contains(name) =>
                        {
                            Some(object_name.clone())
                        }
                        _ => None,
                    })
                    .collect(),
                _ => IndexSet::default(),
            };
            possible_types.insert(name.clone(), Arc::new(possible));
        }

        tracing::debug!(
            services = services.len(),
            composite_types = types.len(),
            "indexed supergraph join metadata"
        );

        Ok(Self {
            schema,
            services,
            types,
            possible_types,
        })
    }

    pub fn schema(&self) -> &Valid<Schema> {
        &self.schema
    }

    /// Services of the supergraph, in `join__Graph` declaration order.
    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }

    pub(crate) fn root_type(&self, operation_type: OperationType) -> Result<&Name, PlannerError> {
        self.schema
            .root_operation(operation_type)
            .ok_or_else(|| PlannerError::InvalidGraphQL {
                message: format!(
                    "The supergraph has no root type for {} operations",
                    OperationKind::from(operation_type)
                ),
            })
    }

    pub(crate) fn composite_type(&self, type_name: &str) -> Option<&CompositeType> {
        self.types.get(type_name)
    }

    pub(crate) fn is_composite_type(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    pub(crate) fn is_abstract_type(&self, type_name: &str) -> bool {
        self.composite_type(type_name)
            .is_some_and(|composite| composite.kind != CompositeTypeKind::Object)
    }

    /// Object types a value of the given composite type can have at runtime.
    pub(crate) fn possible_types(&self, type_name: &str) -> Option<&Arc<IndexSet<Name>>> {
        self.possible_types.get(type_name)
    }

    /// Looks up a field of a composite type, including the implicit `__typename`.
    pub(crate) fn field(&self, type_name: &str, field_name: &str) -> Option<&Arc<FieldMetadata>> {
        let composite = self.composite_type(type_name)?;
        if field_name == TYPENAME_FIELD.as_str() {
            return Some(&composite.typename_field);
        }
        composite.fields.get(field_name)
    }

    pub(crate) fn base_service(&self, type_name: &str) -> Option<&str> {
        self.composite_type(type_name)?.owner.as_deref()
    }

    /// The service that resolves a field: the one named by its `@join__field`, or else the
    /// base service of its parent type.
    pub(crate) fn owning_service<'a>(&'a self, field: &'a FieldMetadata) -> Option<&'a str> {
        field
            .service
            .as_deref()
            .or_else(|| self.base_service(&field.parent_type))
    }

    pub(crate) fn is_value_type(&self, type_name: &str) -> bool {
        self.composite_type(type_name)
            .is_some_and(|composite| composite.owner.is_none())
    }

    /// Keys of a type usable by a service, in declaration order.
    pub(crate) fn keys(&self, type_name: &str, service: &str) -> &[SelectionSet] {
        self.composite_type(type_name)
            .and_then(|composite| composite.keys.get(service))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

fn extract_services(schema: &Schema) -> Result<IndexMap<Name, Service>, PlannerError> {
    let Some(ExtendedType::Enum(graphs)) = schema.types.get(JOIN_GRAPH_ENUM) else {
        return Err(PlannerError::invalid_supergraph(format!(
            "the schema does not define the \"{JOIN_GRAPH_ENUM}\" enum of the join spec"
        )));
    };
    let mut services = IndexMap::new();
    for (graph, value) in &graphs.values {
        let directive = value.directives.get(JOIN_GRAPH_DIRECTIVE).ok_or_else(|| {
            PlannerError::invalid_supergraph(format!(
                "value \"{graph}\" of \"{JOIN_GRAPH_ENUM}\" has no @{JOIN_GRAPH_DIRECTIVE}"
            ))
        })?;
        let name = string_argument(directive, "name").ok_or_else(|| {
            PlannerError::invalid_supergraph(format!(
                "@{JOIN_GRAPH_DIRECTIVE} on \"{graph}\" has no name"
            ))
        })?;
        let url = string_argument(directive, "url").unwrap_or_default();
        services.insert(
            graph.clone(),
            Service {
                name: name.to_owned(),
                url: url.to_owned(),
            },
        );
    }
    Ok(services)
}

fn string_argument<'a>(directive: &'a ast::Directive, name: &str) -> Option<&'a str> {
    directive
        .specified_argument_by_name(name)
        .and_then(|value| value.as_str())
}

fn field_set_argument(
    directive: &ast::Directive,
    name: &str,
) -> Result<Option<SelectionSet>, PlannerError> {
    string_argument(directive, name)
        .map(parse_field_set)
        .transpose()
}

/// The service named by the `graph` argument of a join directive.
fn graph_service(
    directive: &ast::Directive,
    services: &IndexMap<Name, Service>,
) -> Result<Option<String>, PlannerError> {
    let Some(graph) = directive
        .specified_argument_by_name("graph")
        .and_then(|value| value.as_enum())
    else {
        return Ok(None);
    };
    services
        .get(graph)
        .map(|service| Some(service.name.clone()))
        .ok_or_else(|| {
            PlannerError::invalid_supergraph(format!(
                "@{} references unknown graph \"{graph}\"",
                directive.name
            ))
        })
}

fn owner_service(
    directives: &DirectiveList,
    services: &IndexMap<Name, Service>,
) -> Result<Option<String>, PlannerError> {
    match directives.get(JOIN_OWNER_DIRECTIVE) {
        Some(directive) => graph_service(directive, services),
        None => Ok(None),
    }
}

fn type_keys(
    directives: &DirectiveList,
    services: &IndexMap<Name, Service>,
) -> Result<IndexMap<String, Vec<SelectionSet>>, PlannerError> {
    let mut keys: IndexMap<String, Vec<SelectionSet>> = IndexMap::new();
    for directive in directives.get_all(JOIN_TYPE_DIRECTIVE) {
        let Some(service) = graph_service(directive, services)? else {
            continue;
        };
        if let Some(key) = field_set_argument(directive, "key")? {
            keys.entry(service).or_default().push(key);
        }
    }
    Ok(keys)
}

fn field_metadata(
    parent_type: &Name,
    definition: &FieldDefinition,
    services: &IndexMap<Name, Service>,
) -> Result<FieldMetadata, PlannerError> {
    let mut field = FieldMetadata {
        parent_type: parent_type.clone(),
        name: definition.name.clone(),
        ty: definition.ty.clone(),
        service: None,
        requires: None,
        provides: None,
    };
    if let Some(directive) = definition.directives.get(JOIN_FIELD_DIRECTIVE) {
        field.service = graph_service(directive, services)?;
        field.requires = field_set_argument(directive, "requires")?;
        field.provides = field_set_argument(directive, "provides")?;
    }
    Ok(field)
}
