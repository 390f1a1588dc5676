use federation_query_planner::QueryPlanner;
use federation_query_planner::QueryPlannerConfig;

/// The supergraph every planning test runs against. It is composed from six services
/// (accounts, books, documents, inventory, product and reviews) in the join spec v0.1 format.
pub(crate) const SUPERGRAPH: &str = include_str!("supergraphs/federated.graphql");

/// Builds a planner for [`SUPERGRAPH`], with the default configuration unless one is given.
macro_rules! planner {
    (config = $config: expr $(,)?) => {
        $crate::query_plan::build_query_plan_support::planner($config)
    };
    () => {
        planner!(config = Default::default())
    };
}

/// Takes a reference to the result of `planner!()`, an operation string, and an expected
/// formatted query plan string. The plan is also checked against the properties of
/// [`assert_plan_properties`](crate::query_plan::plan_properties::assert_plan_properties).
/// Run `cargo insta review` to diff and accept changes to the generated query plan.
macro_rules! assert_plan {
    ($planner: expr, $operation: expr, @$expected: literal) => {{
        let planner = $planner;
        let operation = $operation;
        let plan = planner.plan(operation, None).unwrap();
        $crate::query_plan::plan_properties::assert_plan_properties(
            planner.schema(),
            operation,
            &plan,
        );
        insta::assert_snapshot!(plan, @$expected);
        plan
    }};
}

#[track_caller]
pub(crate) fn planner(config: QueryPlannerConfig) -> QueryPlanner {
    QueryPlanner::new(SUPERGRAPH, config).unwrap()
}

/// The operation text of each fetch of the plan, in execution order.
#[track_caller]
pub(crate) fn fetch_operations(planner: &QueryPlanner, operation: &str) -> Vec<String> {
    planner
        .plan(operation, None)
        .unwrap()
        .fetch_nodes()
        .into_iter()
        .map(|fetch| format!("{}: {}", fetch.service_name, fetch.operation))
        .collect()
}
