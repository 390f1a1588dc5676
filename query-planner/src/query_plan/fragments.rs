use std::sync::Arc;

use apollo_compiler::Name;
use indexmap::IndexMap;

use crate::error::PlannerError;
use crate::error::Result;
use crate::operation::Fragment;
use crate::operation::SelectionSet;

/// Fragments generated while planning one operation with auto-fragmentization enabled.
///
/// Identical selection sets on the same type share a fragment, so that a sub-selection repeated
/// across fetches is only spelled out once in each service request. Names are assigned in
/// creation order: `__QueryPlanFragment_0__`, `__QueryPlanFragment_1__`, …
#[derive(Debug, Default)]
pub(crate) struct InternalFragments {
    /// Keyed by the type condition and the rendered selection set.
    by_selection: IndexMap<String, Arc<Fragment>>,
}

impl InternalFragments {
    pub(crate) fn fragment_for(
        &mut self,
        type_condition: &Name,
        selection_set: SelectionSet,
    ) -> Result<Arc<Fragment>> {
        let key = format!("{type_condition} {selection_set}");
        if let Some(fragment) = self.by_selection.get(&key) {
            return Ok(fragment.clone());
        }
        let name = Name::new(&format!("__QueryPlanFragment_{}__", self.by_selection.len()))
            .map_err(|error| PlannerError::internal(error.to_string()))?;
        let fragment = Arc::new(Fragment {
            name,
            type_condition: type_condition.clone(),
            selection_set,
        });
        self.by_selection.insert(key, fragment.clone());
        Ok(fragment)
    }
}
