use branchstock_core::AggregateId;

/// A command targets a specific aggregate stream.
///
/// Commands are intent ("approve transfer X"); events are the facts that result
/// ("transfer X approved"). Commands are rejected when invalid in the current
/// state and never persisted.
///
/// The target id lets infrastructure load the right stream and serialize
/// concurrent commands against it through the stream's expected version.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> AggregateId;
}
