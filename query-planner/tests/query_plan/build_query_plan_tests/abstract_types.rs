#[test]
fn splits_fields_of_interfaces_by_runtime_type() {
    let planner = planner!();
    assert_plan!(
        &planner,
        r#"
          {
            topProducts {
              name
            }
          }
        "#,
        @r###"
    QueryPlan {
      Sequence {
        Fetch(service: "product") {
          {
            topProducts {
              __typename
              ... on Book {
                __typename
                isbn
              }
              ... on Furniture {
                name
              }
            }
          }
        },
        Flatten(path: "topProducts.@") {
          Fetch(service: "books") {
            {
              ... on Book {
                __typename
                isbn
              }
            } =>
            {
              ... on Book {
                __typename
                isbn
                title
                year
              }
            }
          },
        },
        Flatten(path: "topProducts.@") {
          Fetch(service: "product") {
            {
              ... on Book {
                __typename
                isbn
                title
                year
              }
            } =>
            {
              ... on Book {
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
fn builds_one_representation_per_runtime_type() {
    let planner = planner!();
    assert_plan!(
        &planner,
        r#"
          {
            topProducts {
              price
              reviews {
                body
              }
            }
          }
        "#,
        @r###"
    QueryPlan {
      Sequence {
        Fetch(service: "product") {
          {
            topProducts {
              __typename
              ... on Book {
                price
                __typename
                isbn
              }
              ... on Furniture {
                price
                __typename
                upc
              }
            }
          }
        },
        Flatten(path: "topProducts.@") {
          Fetch(service: "reviews") {
            {
              ... on Book {
                __typename
                isbn
              }
              ... on Furniture {
                __typename
                upc
              }
            } =>
            {
              ... on Book {
                reviews {
                  body
                }
              }
              ... on Furniture {
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
fn splits_value_types_of_interface_fields() {
    let planner = planner!();
    assert_plan!(
        &planner,
        r#"
          {
            product(upc: "") {
              details {
                country
              }
            }
          }
        "#,
        @r###"
    QueryPlan {
      Fetch(service: "product") {
        {
          product(upc: "") {
            __typename
            ... on Book {
              details {
                country
              }
            }
            ... on Furniture {
              details {
                country
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
fn deduplicates_union_fields_reached_through_several_fragments() {
    let planner = planner!();
    assert_plan!(
        &planner,
        r#"
          query {
            body {
              ... on Image {
                ...TextFragment
              }
              ... on Body {
                ...TextFragment
              }
              ...TextFragment
            }
          }

          fragment TextFragment on Text {
            attributes {
              bold
              text
            }
          }
        "#,
        @r###"
    QueryPlan {
      Fetch(service: "documents") {
        {
          body {
            __typename
            ... on Text {
              attributes {
                bold
                text
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
fn keeps_fields_selected_on_an_interface_type_condition() {
    let planner = planner!();
    assert_plan!(
        &planner,
        r#"
          {
            body {
              ... on NamedObject {
                name
              }
            }
          }
        "#,
        @r###"
    QueryPlan {
      Fetch(service: "documents") {
        {
          body {
            __typename
            ... on Image {
              name
            }
            ... on Text {
              name
            }
          }
        }
      },
    }
    "###
    );
}

#[test]
fn requests_typename_with_fields_of_every_runtime_type() {
    let planner = planner!();
    assert_plan!(
        &planner,
        r#"
          {
            me {
              name
            }
            topProducts {
              upc
            }
          }
        "#,
        @r###"
    QueryPlan {
      Parallel {
        Fetch(service: "accounts") {
          {
            me {
              name
            }
          }
        },
        Fetch(service: "product") {
          {
            topProducts {
              __typename
              ... on Book {
                upc
              }
              ... on Furniture {
                upc
              }
            }
          }
        },
      },
    }
    "###
    );
}

#[test]
fn merges_entity_fetches_reached_through_every_runtime_type() {
    let planner = planner!();
    let plan = assert_plan!(
        &planner,
        r#"
          {
            topProducts {
              reviews {
                author {
                  name
                }
              }
            }
          }
        "#,
        @r###"
    QueryPlan {
      Sequence {
        Fetch(service: "product") {
          {
            topProducts {
              __typename
              ... on Book {
                __typename
                isbn
              }
              ... on Furniture {
                __typename
                upc
              }
            }
          }
        },
        Flatten(path: "topProducts.@") {
          Fetch(service: "reviews") {
            {
              ... on Book {
                __typename
                isbn
              }
              ... on Furniture {
                __typename
                upc
              }
            } =>
            {
              ... on Book {
                reviews {
                  author {
                    __typename
                    id
                  }
                }
              }
              ... on Furniture {
                reviews {
                  author {
                    __typename
                    id
                  }
                }
              }
            }
          },
        },
        Flatten(path: "topProducts.@.reviews.@.author") {
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
    let accounts_fetches = plan
        .fetch_nodes()
        .into_iter()
        .filter(|fetch| fetch.service_name == "accounts")
        .count();
    assert_eq!(accounts_fetches, 1);
}
