//! ## Usage
//!
//! Query planning for federated GraphQL: given a supergraph composed from several services and
//! an operation written against it, build the query plan that tells an executor which services
//! to fetch from, in which order, and where to merge each response.
//!
//! ```ignore
//! let planner = QueryPlanner::new(supergraph_sdl, QueryPlannerConfig::default())?;
//! let plan = planner.plan("{ me { name reviews { body } } }", None)?;
//! println!("{plan}");
//! ```
//!
//! Supergraphs are read in the join spec v0.1 format (`@join__graph`, `@join__owner`,
//! `@join__type` and `@join__field`).

#![warn(
    rustdoc::broken_intra_doc_links,
    unreachable_pub,
    unreachable_patterns,
    unused,
    unused_qualifications,
    dead_code,
    while_true,
    unconditional_panic,
    clippy::all
)]

mod display_helpers;
pub mod error;
pub mod operation;
pub mod query_plan;
pub mod schema;
pub(crate) mod utils;

pub use crate::error::PlannerError;
pub use crate::operation::context::OperationContext;
pub use crate::query_plan::FetchDataKeyRenamer;
pub use crate::query_plan::FetchDataRewrite;
pub use crate::query_plan::FetchNode;
pub use crate::query_plan::FlattenNode;
pub use crate::query_plan::OperationKind;
pub use crate::query_plan::PlanNode;
pub use crate::query_plan::QueryPlan;
pub use crate::query_plan::query_planner::QueryPlanner;
pub use crate::query_plan::query_planner::QueryPlannerConfig;
pub use crate::query_plan::query_planner::QueryPlannerDebugConfig;
pub use crate::schema::ComposedSchema;
