//! Selection of the operation to plan out of a client document.

use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::ast::OperationType;
use indexmap::IndexMap;
use indexmap::IndexSet;

use super::Fragment;
use super::SelectionSet;
use super::normalize::FieldCollector;
use super::normalize::Scope;
use crate::error::PlannerError;
use crate::error::Result;
use crate::schema::ComposedSchema;

/// The operation selected for planning.
#[derive(Debug, Clone)]
pub struct Operation {
    pub(crate) operation_type: OperationType,
    pub(crate) name: Option<Name>,
    pub(crate) variables: Vec<Node<ast::VariableDefinition>>,
    pub(crate) selection_set: SelectionSet,
}

impl Operation {
    fn from_ast(operation: &ast::OperationDefinition) -> Self {
        Self {
            operation_type: operation.operation_type,
            name: operation.name.clone(),
            variables: operation.variables.clone(),
            selection_set: SelectionSet::from_ast(&operation.selection_set),
        }
    }

    pub fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    pub fn name(&self) -> Option<&Name> {
        self.name.as_ref()
    }

    pub fn selection_set(&self) -> &SelectionSet {
        &self.selection_set
    }

    pub(crate) fn variable_definition(&self, name: &str) -> Option<&Node<ast::VariableDefinition>> {
        self.variables
            .iter()
            .find(|definition| definition.name.as_str() == name)
    }
}

/// Everything the planner needs to know about the client's request: the operation to plan,
/// the fragments it may spread, and its canonical source text.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub(crate) operation: Operation,
    pub(crate) fragments: IndexMap<Name, Arc<Fragment>>,
    operation_source: String,
}

impl OperationContext {
    /// Parses `source` and selects the operation to plan from it.
    pub fn parse(source: &str, operation_name: Option<&str>) -> Result<Self> {
        let document = ast::Document::parse(source, "operation.graphql")
            .map_err(|with_errors| PlannerError::invalid_graphql(&with_errors.errors))?;
        Self::new(&document, operation_name, source)
    }

    /// Selects the operation named `operation_name` from an already parsed document, or the only
    /// operation of the document when no name is given.
    ///
    /// When the document holds several operations, the canonical source is the selected
    /// operation followed by the fragments it transitively references, re-serialized in
    /// document order. Otherwise it is `source` itself.
    pub fn new(
        document: &ast::Document,
        operation_name: Option<&str>,
        source: &str,
    ) -> Result<Self> {
        let mut selected = None;
        let mut operation_count = 0;
        let mut fragments = IndexMap::new();
        for definition in &document.definitions {
            match definition {
                ast::Definition::OperationDefinition(operation) => {
                    operation_count += 1;
                    match operation_name {
                        None if operation_count > 1 => {
                            return Err(PlannerError::AmbiguousOperation);
                        }
                        None => selected = Some(operation),
                        Some(name) => {
                            let matches = operation
                                .name
                                .as_ref()
                                .is_some_and(|operation_name| operation_name.as_str() == name);
                            if matches && selected.is_none() {
                                selected = Some(operation);
                            }
                        }
                    }
                }
                ast::Definition::FragmentDefinition(fragment) => {
                    fragments.insert(
                        fragment.name.clone(),
                        Arc::new(Fragment::from_ast(fragment)),
                    );
                }
                _ => {}
            }
        }

        let Some(selected) = selected else {
            return Err(match operation_name {
                Some(name) => PlannerError::UnknownOperation {
                    name: name.to_owned(),
                },
                None => PlannerError::NoOperation,
            });
        };
        let operation = Operation::from_ast(selected);

        let operation_source = if operation_count > 1 {
            let referenced = referenced_fragments(&operation.selection_set, &fragments);
            let mut canonical = ast::Document::new();
            canonical
                .definitions
                .push(ast::Definition::OperationDefinition(selected.clone()));
            canonical.definitions.extend(
                document
                    .definitions
                    .iter()
                    .filter(|definition| match definition {
                        ast::Definition::FragmentDefinition(fragment) => {
                            referenced.contains(&fragment.name)
                        }
                        _ => false,
                    })
                    .cloned(),
            );
            canonical.to_string()
        } else {
            source.to_owned()
        };

        tracing::debug!(
            operation_name = operation.name.as_ref().map(|name| name.as_str()),
            operation_count,
            fragment_count = fragments.len(),
            "selected operation"
        );

        Ok(Self {
            operation,
            fragments,
            operation_source,
        })
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn operation_name(&self) -> Option<&str> {
        self.operation.name.as_ref().map(|name| name.as_str())
    }

    /// The text sent to a service when a whole operation goes to it unchanged.
    pub fn operation_source(&self) -> &str {
        &self.operation_source
    }

    pub fn fragment(&self, name: &str) -> Option<&Fragment> {
        self.fragments.get(name).map(|fragment| fragment.as_ref())
    }

    /// The operation's selection set with every fragment expanded, type conditions narrowed to
    /// object types, and fields selected more than once merged.
    pub fn normalized_selection_set(&self, schema: &ComposedSchema) -> Result<SelectionSet> {
        let root_type = schema.root_type(self.operation.operation_type)?;
        FieldCollector::new(schema, &self.fragments)
            .normalize(&Scope::new(schema, root_type)?, &self.operation.selection_set)
    }
}

/// Names of the fragments reachable from `selection_set` through spreads, fragments spread by
/// those fragments included.
fn referenced_fragments(
    selection_set: &SelectionSet,
    fragments: &IndexMap<Name, Arc<Fragment>>,
) -> IndexSet<Name> {
    let mut referenced = IndexSet::default();
    selection_set.collect_fragment_spreads(&mut referenced);
    let mut index = 0;
    while let Some(name) = referenced.get_index(index).cloned() {
        if let Some(fragment) = fragments.get(&name) {
            fragment.selection_set.collect_fragment_spreads(&mut referenced);
        }
        index += 1;
    }
    referenced
}
