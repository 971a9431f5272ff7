//! Sleipnir - Resilience and lifecycle coordination for inference backends
//!
//! This crate sits between application callers and one or more remote
//! inference backends, making unreliable, slow, and stateful backends
//! behave predictably under concurrent load. Callers supply an opaque
//! invocation capability per target; sleipnir layers a circuit
//! breaker, bounded retries with backoff and jitter, sliding-window
//! rate limiting, a fingerprint-keyed response cache, an ordered
//! fallback cascade, and a model lifecycle coordinator on top.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use serde_json::{Value, json};
//! use sleipnir::{Invoker, RequestOptions, Result, Sleipnir, Target};
//!
//! struct HttpInvoker;
//!
//! #[async_trait]
//! impl Invoker for HttpInvoker {
//!     async fn invoke(&self, model: &str, payload: &Value) -> Result<Value> {
//!         // POST to your backend here.
//!         Ok(json!({ "model": model, "echo": payload }))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> sleipnir::Result<()> {
//!     let broker = Sleipnir::builder()
//!         .target(Target::new("primary", "http://localhost:8080", Arc::new(HttpInvoker)))
//!         .target(Target::new("backup", "http://localhost:8081", Arc::new(HttpInvoker)))
//!         .build()?;
//!
//!     let response = broker
//!         .make_request(
//!             "primary",
//!             "llama-3-8b",
//!             &json!({ "prompt": "hello" }),
//!             &RequestOptions::new().fallback("backup"),
//!         )
//!         .await?;
//!
//!     println!("{response}");
//!     Ok(())
//! }
//! ```

pub mod breaker;
pub mod broker;
pub mod cache;
pub mod error;
pub mod lifecycle;
pub mod limiter;
pub mod retry;
pub mod target;
pub mod telemetry;

// Re-export main types at crate root
pub use breaker::{
    BreakerConfig, BreakerEvent, BreakerSnapshot, BreakerState, BreakerTransition, CircuitBreaker,
};
pub use broker::{BrokerBuilder, BrokerRequest, PerformanceMetrics, RequestBroker, RequestOptions, Sleipnir};
pub use cache::{CacheConfig, ResponseCache};
pub use error::{LoadError, Result, SleipnirError};
pub use lifecycle::{LoadOptions, MetricsSnapshot, ModelCoordinator, OpClass, SwitchOptions};
pub use limiter::{RateLimitConfig, RateLimiter};
pub use retry::{RetryConfig, with_retry, with_retry_if};
pub use target::{Invoker, Target};
