/// Wrapper around `tracing::trace!` that attaches a serialized copy of a planning data structure
/// to the event, so that a log viewer can show how fetch groups and plans evolve while an
/// operation is planned. Not to be confused with `insta` snapshot testing.
///
/// Passing a value serializes it with `serde_json` and tags the event with its type name:
/// ```ignore
/// snapshot!(plan, "built query plan");
/// // trace!(snapshot = "QueryPlan", data = "{ .. }", "built query plan");
/// ```
/// Passing a tag and a value that already implements `tracing::Value` skips serialization:
/// ```ignore
/// snapshot!("FetchGroup", group.service_name.as_str(), "created dependent group");
/// ```
///
/// Both forms compile to nothing unless the `snapshot_tracing` feature is enabled.
macro_rules! snapshot {
    ($value:expr, $msg:literal) => {
        #[cfg(feature = "snapshot_tracing")]
        tracing::trace!(
            snapshot = std::any::type_name_of_val(&$value),
            data = serde_json::to_string(&$value).unwrap_or_default(),
            $msg
        );
    };
    ($name:literal, $value:expr, $msg:literal) => {
        #[cfg(feature = "snapshot_tracing")]
        tracing::trace!(snapshot = $name, data = $value, $msg);
    };
}

pub(crate) use snapshot;
