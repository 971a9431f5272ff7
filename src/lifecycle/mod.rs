//! Model lifecycle coordination

mod coordinator;
mod metrics;

pub use coordinator::{LoadOptions, ModelCoordinator, SwitchOptions};
pub use metrics::{LifecycleMetrics, MAX_LATENCY_SAMPLES, MetricsSnapshot, OpClass};
