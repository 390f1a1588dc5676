use apollo_compiler::ast;

use crate::error::PlannerError;
use crate::operation::Selection;
use crate::operation::SelectionSet;

// Field sets use the selection set grammar, but aliases and named fragments make no sense in
// them: the data they describe is addressed by field name in entity representations.
fn check_field_set_selections(
    source: &str,
    selection_set: &SelectionSet,
) -> Result<(), PlannerError> {
    for selection in selection_set.iter() {
        match selection {
            Selection::Field(field) => {
                if let Some(alias) = &field.alias {
                    return Err(PlannerError::invalid_supergraph(format!(
                        "Cannot use alias \"{alias}\" in field set \"{source}\""
                    )));
                }
                if let Some(selection_set) = &field.selection_set {
                    check_field_set_selections(source, selection_set)?;
                }
            }
            Selection::InlineFragment(fragment) => {
                check_field_set_selections(source, &fragment.selection_set)?
            }
            Selection::FragmentSpread(spread) => {
                return Err(PlannerError::invalid_supergraph(format!(
                    "Cannot use fragment spread \"...{}\" in field set \"{source}\"",
                    spread.fragment_name
                )));
            }
        }
    }
    Ok(())
}

/// Parses the value of a `key`, `requires` or `provides` join argument.
///
/// Field names are not checked against the schema here: that happens when the field set is
/// collected against the type it applies to.
pub(crate) fn parse_field_set(source: &str) -> Result<SelectionSet, PlannerError> {
    let document = ast::Document::parse(format!("{{ {source} }}"), "field_set.graphql")
        .map_err(|with_errors| {
            PlannerError::invalid_supergraph(format!(
                "Invalid field set \"{source}\": {}",
                with_errors.errors
            ))
        })?;
    let selection_set = match document.definitions.as_slice() {
        [ast::Definition::OperationDefinition(operation)] => {
            SelectionSet::from_ast(&operation.selection_set)
        }
        _ => {
            return Err(PlannerError::invalid_supergraph(format!(
                "Invalid field set \"{source}\": expected a single selection set"
            )));
        }
    };
    check_field_set_selections(source, &selection_set)?;
    Ok(selection_set)
}
