#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # rpc-complexity
//!
//! Weighted, multi-token admission control for RPC servers.
//!
//! Every method of a registered service computes a *weight map* for each call
//! (token name → cost). The call is admitted only once every token's limiter
//! has supplied its weight, waiting at most a bounded time; otherwise it is
//! rejected with [`ComplexityError::ResourceExhausted`]. Admitted weight is
//! reported to a [`TelemetrySink`](telemetry::TelemetrySink), e.g. a Prometheus
//! counter.
//!
//! ## Features
//!
//! - **Method registry** keyed by service and method, populated from static
//!   descriptors with compile-time trait conformance
//! - **Quota pool** of token buckets with a global fallback limiter
//! - **Bounded waits** measured from call arrival, honoring call deadlines
//! - **Fail-open routing**: unknown or malformed methods are never blocked
//! - **Tower integration** via [`ComplexityLayer`]
//!
//! ## Quick Start
//!
//! ```rust
//! use rpc_complexity::{CallInfo, ComplexityServer, MethodDesc, ServiceDesc, UnaryCall, WeightMap};
//! use std::any::Any;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tower::{service_fn, ServiceBuilder, ServiceExt};
//!
//! pub struct SearchRequest { pub limit: u64 }
//!
//! pub trait SearchComplexity: Send + Sync + 'static {
//!     fn search(&self, cx: &CallInfo, req: &SearchRequest) -> WeightMap;
//! }
//!
//! fn search_handler(
//!     srv: &dyn SearchComplexity,
//!     cx: &CallInfo,
//!     req: &(dyn Any + Send),
//! ) -> Option<WeightMap> {
//!     req.downcast_ref::<SearchRequest>().map(|req| srv.search(cx, req))
//! }
//!
//! static SEARCH_DESC: ServiceDesc<dyn SearchComplexity> = ServiceDesc {
//!     service_name: "demo.Search",
//!     methods: &[MethodDesc { method_name: "Search", handler: search_handler }],
//! };
//!
//! struct ByLimit;
//! impl SearchComplexity for ByLimit {
//!     fn search(&self, _cx: &CallInfo, req: &SearchRequest) -> WeightMap {
//!         WeightMap::new().with("rows", req.limit)
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let imp: Arc<dyn SearchComplexity> = Arc::new(ByLimit);
//! let server = ComplexityServer::builder()
//!     .every("rows", Duration::from_millis(1), 1_000)
//!     .service(&SEARCH_DESC, imp)
//!     .build()?;
//!
//! let svc = ServiceBuilder::new()
//!     .layer(server.layer())
//!     .service(service_fn(|call: UnaryCall<SearchRequest>| async move {
//!         Ok::<_, std::io::Error>(call.message.limit)
//!     }));
//!
//! let rows = svc.oneshot(UnaryCall::new("/demo.Search/Search", SearchRequest { limit: 50 })).await?;
//! assert_eq!(rows, 50);
//! # Ok(())
//! # }
//! ```

pub mod call;
#[cfg(feature = "config")]
pub mod config;
pub mod error;
pub mod middleware;
pub mod prelude;
pub mod rate_limit;
pub mod registry;
pub mod server;
pub mod telemetry;

// Re-exports
pub use call::{parse_full_method, CallInfo, UnaryCall, WeightMap, DEFAULT_TOKEN};
#[cfg(feature = "config")]
pub use config::{ComplexityConfig, ConfigError, LimiterConfig};
pub use error::{BuildError, ComplexityError, Rejection, RegistryError, WaitError};
pub use middleware::{ComplexityLayer, ComplexityService};
pub use rate_limit::{QuotaPool, Rate, RateLimiter, TokenBucket};
pub use registry::{
    MethodDesc, MethodDescriptor, Registry, ServiceDesc, ServiceRegistrar, WeightHandler,
};
pub use server::{Admission, ComplexityServer, ComplexityServerBuilder, DEFAULT_MAX_WAIT};
pub use telemetry::{AdmissionEvent, LogSink, MemorySink, NullSink, TelemetrySink};
