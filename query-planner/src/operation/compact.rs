//! Single-line serialization of operations sent to subgraphs.
//!
//! The output carries no insignificant whitespace or commas: a space is only written between
//! two tokens that would otherwise run together, and before a spread that follows a name.

use apollo_compiler::Node;
use apollo_compiler::ast;

use super::Fragment;
use super::Selection;
use super::SelectionSet;

#[derive(Default)]
pub(crate) struct CompactWriter {
    output: String,
    last_token_is_name: bool,
}

impl CompactWriter {
    pub(crate) fn finish(self) -> String {
        self.output
    }

    /// Writes a lexical token that is not a punctuator: a name, a number or a string.
    pub(crate) fn token(&mut self, token: &str) {
        if self.last_token_is_name {
            self.output.push(' ');
        }
        self.output.push_str(token);
        self.last_token_is_name = true;
    }

    pub(crate) fn punctuator(&mut self, punctuator: &str) {
        if punctuator == "..." && self.last_token_is_name {
            self.output.push(' ');
        }
        self.output.push_str(punctuator);
        self.last_token_is_name = false;
    }

    pub(crate) fn selection_set(&mut self, selection_set: &SelectionSet) {
        self.punctuator("{");
        for selection in &selection_set.selections {
            self.selection(selection);
        }
        self.punctuator("}");
    }

    fn selection(&mut self, selection: &Selection) {
        match selection {
            Selection::Field(field) => {
                if let Some(alias) = &field.alias {
                    self.token(alias.as_str());
                    self.punctuator(":");
                }
                self.token(field.name.as_str());
                self.arguments(&field.arguments);
                self.directives(&field.directives);
                if let Some(selection_set) = &field.selection_set {
                    self.selection_set(selection_set);
                }
            }
            Selection::InlineFragment(fragment) => {
                self.punctuator("...");
                if let Some(type_condition) = &fragment.type_condition {
                    self.token("on");
                    self.token(type_condition.as_str());
                }
                self.directives(&fragment.directives);
                self.selection_set(&fragment.selection_set);
            }
            Selection::FragmentSpread(spread) => {
                self.punctuator("...");
                self.token(spread.fragment_name.as_str());
                self.directives(&spread.directives);
            }
        }
    }

    pub(crate) fn fragment(&mut self, fragment: &Fragment) {
        self.token("fragment");
        self.token(fragment.name.as_str());
        self.token("on");
        self.token(fragment.type_condition.as_str());
        self.selection_set(&fragment.selection_set);
    }

    fn arguments(&mut self, arguments: &[Node<ast::Argument>]) {
        if arguments.is_empty() {
            return;
        }
        self.punctuator("(");
        for argument in arguments {
            self.token(argument.name.as_str());
            self.punctuator(":");
            self.value(&argument.value);
        }
        self.punctuator(")");
    }

    fn directives(&mut self, directives: &ast::DirectiveList) {
        for directive in directives.iter() {
            self.punctuator("@");
            self.token(directive.name.as_str());
            self.arguments(&directive.arguments);
        }
    }

    pub(crate) fn variable_definition(&mut self, definition: &ast::VariableDefinition) {
        self.variable(definition.name.as_str());
        self.punctuator(":");
        self.ty(&definition.ty);
        if let Some(default_value) = &definition.default_value {
            self.punctuator("=");
            self.value(default_value);
        }
        self.directives(&definition.directives);
    }

    pub(crate) fn variable(&mut self, name: &str) {
        self.punctuator("$");
        self.token(name);
    }

    pub(crate) fn ty(&mut self, ty: &ast::Type) {
        match ty {
            ast::Type::Named(name) => self.token(name.as_str()),
            ast::Type::NonNullNamed(name) => {
                self.token(name.as_str());
                self.punctuator("!");
            }
            ast::Type::List(inner) => {
                self.punctuator("[");
                self.ty(inner);
                self.punctuator("]");
            }
            ast::Type::NonNullList(inner) => {
                self.punctuator("[");
                self.ty(inner);
                self.punctuator("]");
                self.punctuator("!");
            }
        }
    }

    fn value(&mut self, value: &ast::Value) {
        match value {
            ast::Value::Variable(name) => self.variable(name.as_str()),
            ast::Value::List(values) => {
                self.punctuator("[");
                for value in values {
                    self.value(value);
                }
                self.punctuator("]");
            }
            ast::Value::Object(fields) => {
                self.punctuator("{");
                for (name, value) in fields {
                    self.token(name.as_str());
                    self.punctuator(":");
                    self.value(value);
                }
                self.punctuator("}");
            }
            // Scalars print as a single token.
            _ => self.token(&value.to_string()),
        }
    }
}
