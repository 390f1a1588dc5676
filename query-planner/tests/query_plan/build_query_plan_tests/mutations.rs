use federation_query_planner::OperationKind;

use crate::query_plan::build_query_plan_support::fetch_operations;

#[test]
fn runs_mutation_fields_in_order() {
    let planner = planner!();
    let plan = assert_plan!(
        &planner,
        r#"
          mutation {
            deleteReview(id: "1")
            login(username: "ada", password: "secret") {
              id
            }
            other: deleteReview(id: "2")
          }
        "#,
        @r###"
    QueryPlan {
      Sequence {
        Fetch(service: "reviews") {
          {
            deleteReview(id: "1")
          }
        },
        Fetch(service: "accounts") {
          {
            login(username: "ada", password: "secret") {
              id
            }
          }
        },
        Fetch(service: "reviews") {
          {
            other: deleteReview(id: "2")
          }
        },
      },
    }
    "###
    );
    assert!(
        plan.fetch_nodes()
            .iter()
            .all(|fetch| fetch.operation_kind == OperationKind::Mutation)
    );
}

#[test]
fn groups_consecutive_mutation_fields_of_one_service() {
    let planner = planner!();
    assert_eq!(
        fetch_operations(
            &planner,
            r#"
              mutation {
                login(username: "ada", password: "secret") {
                  id
                }
                deleteReview(id: "1")
                other: deleteReview(id: "2")
              }
            "#
        ),
        [
            r#"accounts: mutation{login(username:"ada" password:"secret"){id}}"#,
            r#"reviews: mutation{deleteReview(id:"1")other:deleteReview(id:"2")}"#,
        ]
    );
}

#[test]
fn fetches_entities_of_mutation_results_with_queries() {
    let planner = planner!();
    let plan = assert_plan!(
        &planner,
        r#"
          mutation {
            login(username: "ada", password: "secret") {
              reviews {
                body
              }
            }
          }
        "#,
        @r###"
    QueryPlan {
      Sequence {
        Fetch(service: "accounts") {
          {
            login(username: "ada", password: "secret") {
              __typename
              id
            }
          }
        },
        Flatten(path: "login") {
          Fetch(service: "reviews") {
            {
              ... on User {
                __typename
                id
              }
            } =>
            {
              ... on User {
                reviews {
                  body
                }
              }
            }
          },
        },
      },
    }
    "###
    );
    let kinds: Vec<_> = plan
        .fetch_nodes()
        .iter()
        .map(|fetch| fetch.operation_kind)
        .collect();
    assert_eq!(kinds, [OperationKind::Mutation, OperationKind::Query]);
}
