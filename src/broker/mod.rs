//! Request broker

mod builder;
mod dispatch;

pub use builder::{BrokerBuilder, Sleipnir};
pub use dispatch::{BrokerRequest, PerformanceMetrics, RequestBroker, RequestOptions};
