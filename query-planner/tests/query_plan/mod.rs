#[macro_use]
mod build_query_plan_support;
mod plan_properties;
