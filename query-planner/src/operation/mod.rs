//! Selection sets of an executable operation, in the form the planner manipulates them.
//!
//! Operations and fragments are converted once from the `apollo-compiler` AST into these
//! types. Unlike the AST they are cheap to rebuild, which the planner does constantly when it
//! splits a selection across services, and they know how to merge with one another.

use std::fmt;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::name;
use indexmap::IndexSet;

use crate::display_helpers::State;
use crate::display_helpers::write_indented_lines;

pub(crate) mod compact;
pub mod context;
pub(crate) mod normalize;

pub(crate) const TYPENAME_FIELD: Name = name!("__typename");

/// An ordered list of selections. Order is significant: it is the order in which fields are
/// requested from services and rendered in plans.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    pub(crate) selections: Vec<Selection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Field(Field),
    InlineFragment(InlineFragment),
    FragmentSpread(FragmentSpread),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub(crate) alias: Option<Name>,
    pub(crate) name: Name,
    pub(crate) arguments: Vec<Node<ast::Argument>>,
    pub(crate) directives: ast::DirectiveList,
    pub(crate) selection_set: Option<SelectionSet>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineFragment {
    pub(crate) type_condition: Option<Name>,
    pub(crate) directives: ast::DirectiveList,
    pub(crate) selection_set: SelectionSet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentSpread {
    pub(crate) fragment_name: Name,
    pub(crate) directives: ast::DirectiveList,
}

/// A named fragment: either defined by the client document, or generated by the planner when
/// auto-fragmentization is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub(crate) name: Name,
    pub(crate) type_condition: Name,
    pub(crate) selection_set: SelectionSet,
}

impl SelectionSet {
    pub(crate) fn new(selections: Vec<Selection>) -> Self {
        Self { selections }
    }

    pub(crate) fn from_ast(selections: &[ast::Selection]) -> Self {
        Self {
            selections: selections.iter().map(Selection::from_ast).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.selections.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Selection> {
        self.selections.iter()
    }

    pub(crate) fn push(&mut self, selection: Selection) {
        self.selections.push(selection)
    }

    /// Adds the selections of `other` to this set. A field whose response name, field name and
    /// arguments match an existing field is merged into it, with both sub-selections merged
    /// recursively; likewise for inline fragments with the same type condition and directives.
    /// Everything else is appended, so first-seen order is preserved.
    pub(crate) fn merge(&mut self, other: SelectionSet) {
        for selection in other.selections {
            self.merge_selection(selection);
        }
    }

    fn merge_selection(&mut self, selection: Selection) {
        match selection {
            Selection::Field(field) => {
                let existing = self.selections.iter_mut().find_map(|existing| match existing {
                    Selection::Field(existing) if existing.can_merge_with(&field) => Some(existing),
                    _ => None,
                });
                match existing {
                    Some(existing) => {
                        if let Some(incoming) = field.selection_set {
                            match &mut existing.selection_set {
                                Some(current) => current.merge(incoming),
                                None => existing.selection_set = Some(incoming),
                            }
                        }
                    }
                    None => self.selections.push(Selection::Field(field)),
                }
            }
            Selection::InlineFragment(fragment) => {
                let existing = self.selections.iter_mut().find_map(|existing| match existing {
                    Selection::InlineFragment(existing)
                        if existing.type_condition == fragment.type_condition
                            && existing.directives == fragment.directives =>
                    {
                        Some(existing)
                    }
                    _ => None,
                });
                match existing {
                    Some(existing) => existing.selection_set.merge(fragment.selection_set),
                    None => self.selections.push(Selection::InlineFragment(fragment)),
                }
            }
            Selection::FragmentSpread(spread) => {
                let selection = Selection::FragmentSpread(spread);
                if !self.selections.contains(&selection) {
                    self.selections.push(selection)
                }
            }
        }
    }

    /// Names of the fragments spread anywhere in this selection set, in order of appearance.
    pub(crate) fn collect_fragment_spreads(&self, names: &mut IndexSet<Name>) {
        for selection in &self.selections {
            match selection {
                Selection::Field(field) => {
                    if let Some(selection_set) = &field.selection_set {
                        selection_set.collect_fragment_spreads(names)
                    }
                }
                Selection::InlineFragment(fragment) => {
                    fragment.selection_set.collect_fragment_spreads(names)
                }
                Selection::FragmentSpread(spread) => {
                    names.insert(spread.fragment_name.clone());
                }
            }
        }
    }

    /// Names of the variables referenced by arguments or directives anywhere in this selection
    /// set, in order of appearance.
    pub(crate) fn collect_variables(&self, variables: &mut IndexSet<Name>) {
        for selection in &self.selections {
            match selection {
                Selection::Field(field) => {
                    for argument in &field.arguments {
                        collect_value_variables(&argument.value, variables);
                    }
                    collect_directive_variables(&field.directives, variables);
                    if let Some(selection_set) = &field.selection_set {
                        selection_set.collect_variables(variables)
                    }
                }
                Selection::InlineFragment(fragment) => {
                    collect_directive_variables(&fragment.directives, variables);
                    fragment.selection_set.collect_variables(variables)
                }
                Selection::FragmentSpread(spread) => {
                    collect_directive_variables(&spread.directives, variables)
                }
            }
        }
    }
}

fn collect_directive_variables(directives: &ast::DirectiveList, variables: &mut IndexSet<Name>) {
    for directive in directives.iter() {
        for argument in &directive.arguments {
            collect_value_variables(&argument.value, variables);
        }
    }
}

fn collect_value_variables(value: &ast::Value, variables: &mut IndexSet<Name>) {
    match value {
        ast::Value::Variable(name) => {
            variables.insert(name.clone());
        }
        ast::Value::List(values) => values
            .iter()
            .for_each(|value| collect_value_variables(value, variables)),
        ast::Value::Object(fields) => fields
            .iter()
            .for_each(|(_, value)| collect_value_variables(value, variables)),
        _ => {}
    }
}

impl Selection {
    fn from_ast(selection: &ast::Selection) -> Self {
        match selection {
            ast::Selection::Field(field) => Self::Field(Field::from_ast(field)),
            ast::Selection::InlineFragment(fragment) => Self::InlineFragment(InlineFragment {
                type_condition: fragment.type_condition.clone(),
                directives: fragment.directives.clone(),
                selection_set: SelectionSet::from_ast(&fragment.selection_set),
            }),
            ast::Selection::FragmentSpread(spread) => Self::FragmentSpread(FragmentSpread {
                fragment_name: spread.fragment_name.clone(),
                directives: spread.directives.clone(),
            }),
        }
    }
}

impl Field {
    fn from_ast(field: &ast::Field) -> Self {
        Self {
            alias: field.alias.clone(),
            name: field.name.clone(),
            arguments: field.arguments.clone(),
            directives: field.directives.clone(),
            selection_set: (!field.selection_set.is_empty())
                .then(|| SelectionSet::from_ast(&field.selection_set)),
        }
    }

    /// A bare field with the given name: no alias, arguments or directives.
    pub(crate) fn new(name: Name) -> Self {
        Self {
            alias: None,
            name,
            arguments: Vec::new(),
            directives: ast::DirectiveList::default(),
            selection_set: None,
        }
    }

    pub(crate) fn typename() -> Self {
        Self::new(TYPENAME_FIELD)
    }

    /// The key under which this field appears in a response.
    pub fn response_name(&self) -> &Name {
        self.alias.as_ref().unwrap_or(&self.name)
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn selection_set(&self) -> Option<&SelectionSet> {
        self.selection_set.as_ref()
    }

    pub(crate) fn with_selection_set(mut self, selection_set: Option<SelectionSet>) -> Self {
        self.selection_set = selection_set;
        self
    }

    pub(crate) fn can_merge_with(&self, other: &Field) -> bool {
        self.response_name() == other.response_name()
            && self.selects_same_value(other)
            && self.directives == other.directives
    }

    /// Whether both fields resolve to the same value, whatever their aliases and directives.
    pub(crate) fn selects_same_value(&self, other: &Field) -> bool {
        self.name == other.name && self.arguments == other.arguments
    }

    /// Combines the directives of another occurrence of this field into this one. Occurrences
    /// under different directives lose them all, so that the field is fetched whenever any of
    /// them applies.
    pub(crate) fn merge_directives(&mut self, other: &ast::DirectiveList) {
        if self.directives != *other {
            self.directives = ast::DirectiveList::default();
        }
    }
}

impl InlineFragment {
    pub(crate) fn new(type_condition: Name, selection_set: SelectionSet) -> Self {
        Self {
            type_condition: Some(type_condition),
            directives: ast::DirectiveList::default(),
            selection_set,
        }
    }

    pub fn type_condition(&self) -> Option<&Name> {
        self.type_condition.as_ref()
    }

    pub fn selection_set(&self) -> &SelectionSet {
        &self.selection_set
    }
}

impl FragmentSpread {
    pub fn fragment_name(&self) -> &Name {
        &self.fragment_name
    }
}

impl Fragment {
    pub(crate) fn from_ast(definition: &ast::FragmentDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            type_condition: definition.type_condition.clone(),
            selection_set: SelectionSet::from_ast(&definition.selection_set),
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn type_condition(&self) -> &Name {
        &self.type_condition
    }

    pub fn selection_set(&self) -> &SelectionSet {
        &self.selection_set
    }

    /// A selection set made of a single spread of this fragment.
    pub(crate) fn spread(self: &Arc<Self>) -> SelectionSet {
        SelectionSet::new(vec![Selection::FragmentSpread(FragmentSpread {
            fragment_name: self.name.clone(),
            directives: ast::DirectiveList::default(),
        })])
    }
}

impl SelectionSet {
    pub(crate) fn write_indented(&self, state: &mut State<'_, '_>) -> fmt::Result {
        if self.selections.is_empty() {
            return state.write("{}");
        }
        state.write("{")?;
        write_indented_lines(state, &self.selections, |state, selection| {
            selection.write_indented(state)
        })?;
        state.write("}")
    }
}

impl Selection {
    fn write_indented(&self, state: &mut State<'_, '_>) -> fmt::Result {
        match self {
            Self::Field(field) => {
                if let Some(alias) = &field.alias {
                    state.write_fmt(format_args!("{alias}: "))?;
                }
                state.write(&field.name)?;
                write_arguments(state, &field.arguments)?;
                write_directives(state, &field.directives)?;
                if let Some(selection_set) = &field.selection_set {
                    state.write(" ")?;
                    selection_set.write_indented(state)?;
                }
                Ok(())
            }
            Self::InlineFragment(fragment) => {
                state.write("...")?;
                if let Some(type_condition) = &fragment.type_condition {
                    state.write_fmt(format_args!(" on {type_condition}"))?;
                }
                write_directives(state, &fragment.directives)?;
                state.write(" ")?;
                fragment.selection_set.write_indented(state)
            }
            Self::FragmentSpread(spread) => {
                state.write_fmt(format_args!("...{}", spread.fragment_name))?;
                write_directives(state, &spread.directives)
            }
        }
    }
}

impl Fragment {
    pub(crate) fn write_indented(&self, state: &mut State<'_, '_>) -> fmt::Result {
        state.write_fmt(format_args!(
            "fragment {} on {} ",
            self.name, self.type_condition
        ))?;
        self.selection_set.write_indented(state)
    }
}

fn write_arguments(state: &mut State<'_, '_>, arguments: &[Node<ast::Argument>]) -> fmt::Result {
    if arguments.is_empty() {
        return Ok(());
    }
    state.write("(")?;
    for (index, argument) in arguments.iter().enumerate() {
        if index > 0 {
            state.write(", ")?;
        }
        let value: &ast::Value = &argument.value;
        state.write_fmt(format_args!("{}: {value}", argument.name))?;
    }
    state.write(")")
}

fn write_directives(state: &mut State<'_, '_>, directives: &ast::DirectiveList) -> fmt::Result {
    for directive in directives.iter() {
        state.write_fmt(format_args!(" @{}", directive.name))?;
        write_arguments(state, &directive.arguments)?;
    }
    Ok(())
}

impl fmt::Display for SelectionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(&mut State::new(f))
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(&mut State::new(f))
    }
}
