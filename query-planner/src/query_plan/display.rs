use std::fmt;

use super::FetchNode;
use super::FlattenNode;
use super::PlanNode;
use super::QueryPlan;
use crate::display_helpers::State;
use crate::display_helpers::write_indented_lines;

impl QueryPlan {
    fn write_indented(&self, state: &mut State<'_, '_>) -> fmt::Result {
        let Some(node) = &self.node else {
            return state.write("QueryPlan {}");
        };
        state.write("QueryPlan {")?;
        write_indented_lines(state, std::slice::from_ref(node), write_child)?;
        state.write("}")
    }
}

impl PlanNode {
    fn write_indented(&self, state: &mut State<'_, '_>) -> fmt::Result {
        match self {
            Self::Sequence { nodes } => {
                state.write("Sequence {")?;
                write_indented_lines(state, nodes, write_child)?;
                state.write("}")
            }
            Self::Parallel { nodes } => {
                state.write("Parallel {")?;
                write_indented_lines(state, nodes, write_child)?;
                state.write("}")
            }
            Self::Fetch(fetch) => fetch.write_indented(state),
            Self::Flatten(flatten) => flatten.write_indented(state),
        }
    }
}

/// Children of a node are each followed by a comma, the last one included.
fn write_child(state: &mut State<'_, '_>, node: &PlanNode) -> fmt::Result {
    node.write_indented(state)?;
    state.write(",")
}

impl FetchNode {
    fn write_indented(&self, state: &mut State<'_, '_>) -> fmt::Result {
        state.write_fmt(format_args!("Fetch(service: {:?}) {{", self.service_name))?;
        state.indent()?;
        if let Some(requires) = &self.requires {
            requires.write_indented(state)?;
            state.write(" =>")?;
            state.new_line()?;
        }
        self.selection_set.write_indented(state)?;
        for fragment in &self.internal_fragments {
            state.new_line()?;
            fragment.write_indented(state)?;
        }
        state.dedent()?;
        state.write("}")
    }
}

impl FlattenNode {
    fn write_indented(&self, state: &mut State<'_, '_>) -> fmt::Result {
        state.write_fmt(format_args!("Flatten(path: {:?}) {{", self.path_string()))?;
        write_indented_lines(state, std::slice::from_ref(self.node.as_ref()), write_child)?;
        state.write("}")
    }
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(&mut State::new(f))
    }
}

impl fmt::Display for PlanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(&mut State::new(f))
    }
}
