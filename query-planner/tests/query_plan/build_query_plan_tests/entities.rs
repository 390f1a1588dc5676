use federation_query_planner::FetchDataKeyRenamer;
use federation_query_planner::FetchDataRewrite;

use crate::query_plan::build_query_plan_support::fetch_operations;

#[test]
fn fetches_extension_fields_after_the_base_service() {
    let planner = planner!();
    assert_plan!(
        &planner,
        r#"
          {
            me {
              name
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
            me {
              name
              __typename
              id
            }
          }
        },
        Flatten(path: "me") {
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
}

#[test]
fn adds_a_representation_once_per_dependent_fetch() {
    let planner = planner!();
    assert_plan!(
        &planner,
        r#"
          {
            me {
              reviews {
                body
              }
              numberOfReviews
            }
          }
        "#,
        @r###"
    QueryPlan {
      Sequence {
        Fetch(service: "accounts") {
          {
            me {
              __typename
              id
            }
          }
        },
        Flatten(path: "me") {
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
                numberOfReviews
              }
            }
          },
        },
      },
    }
    "###
    );
}

#[test]
fn fetches_base_fields_of_entities_returned_by_another_service() {
    let planner = planner!();
    assert_plan!(
        &planner,
        r#"
          {
            topReviews {
              body
              author {
                name
              }
            }
          }
        "#,
        @r###"
    QueryPlan {
      Sequence {
        Fetch(service: "reviews") {
          {
            topReviews {
              body
              author {
                __typename
                id
              }
            }
          }
        },
        Flatten(path: "topReviews.@.author") {
          Fetch(service: "accounts") {
            {
              ... on User {
                __typename
                id
              }
            } =>
            {
              ... on User {
                name
              }
            }
          },
        },
      },
    }
    "###
    );
}

#[test]
fn stays_in_the_parent_service_when_it_resolves_the_field() {
    let planner = planner!();
    assert_plan!(
        &planner,
        r#"
          {
            topReviews {
              body
              author {
                reviews {
                  body
                }
              }
            }
          }
        "#,
        @r###"
    QueryPlan {
      Fetch(service: "reviews") {
        {
          topReviews {
            body
            author {
              reviews {
                body
              }
            }
          }
        }
      },
    }
    "###
    );
}

#[test]
fn fetches_dependent_services_of_sibling_fields_in_parallel() {
    let planner = planner!();
    assert_plan!(
        &planner,
        r#"
          {
            me {
              reviews {
                body
              }
              goodAddress
            }
          }
        "#,
        @r###"
    QueryPlan {
      Sequence {
        Fetch(service: "accounts") {
          {
            me {
              __typename
              id
              birthDate
            }
          }
        },
        Parallel {
          Flatten(path: "me") {
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
          Flatten(path: "me") {
            Fetch(service: "inventory") {
              {
                ... on User {
                  __typename
                  id
                  birthDate
                }
              } =>
              {
                ... on User {
                  goodAddress
                }
              }
            },
          },
        },
      },
    }
    "###
    );
}

#[test]
fn aliases_keys_whose_response_name_the_operation_uses() {
    let planner = planner!();
    let plan = assert_plan!(
        &planner,
        r#"
          {
            me {
              id: name
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
            me {
              id: name
              __typename
              id__alias_0: id
            }
          }
        },
        Flatten(path: "me") {
          Fetch(service: "reviews") {
            {
              ... on User {
                __typename
                id__alias_0: id
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
    let fetches = plan.fetch_nodes();
    assert!(fetches[0].input_rewrites.is_empty());
    assert_eq!(
        fetches[1].input_rewrites,
        [FetchDataRewrite::KeyRenamer(FetchDataKeyRenamer {
            path: vec!["... on User".to_string(), "id__alias_0".to_string()],
            rename_key_to: "id".to_string(),
        })]
    );
}

#[test]
fn aliases_keys_selected_before_the_colliding_field() {
    let planner = planner!();
    assert_eq!(
        fetch_operations(
            &planner,
            r#"
              {
                me {
                  reviews {
                    body
                  }
                  id: name
                }
              }
            "#
        ),
        [
            "accounts: {me{__typename id__alias_0:id id:name}}",
            "reviews: query($representations:[_Any!]!){_entities(representations:$representations){...on User{reviews{body}}}}",
        ]
    );
}

#[test]
fn reuses_keys_the_operation_selects_under_their_own_name() {
    let planner = planner!();
    let plan = planner
        .plan("{ me { id name reviews { body } } }", None)
        .unwrap();
    let fetches = plan.fetch_nodes();
    assert_eq!(fetches[0].operation, "{me{id name __typename}}");
    assert!(fetches[1].input_rewrites.is_empty());
}
