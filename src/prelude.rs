//! Convenient re-exports for common rpc-complexity types.
pub use crate::{
    call::{CallInfo, UnaryCall, WeightMap, DEFAULT_TOKEN},
    error::{ComplexityError, Rejection, WaitError},
    middleware::ComplexityLayer,
    rate_limit::{Rate, RateLimiter, TokenBucket},
    registry::{MethodDesc, ServiceDesc, ServiceRegistrar},
    server::{Admission, ComplexityServer, ComplexityServerBuilder},
    telemetry::{AdmissionEvent, MemorySink, NullSink, TelemetrySink},
};
