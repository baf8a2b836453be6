//! Admission-control interceptor.
//!
//! [`ComplexityServer`] owns the frozen [`Registry`] and [`QuotaPool`] and decides,
//! per call, whether the call may proceed. It is cheap to clone; all clones share
//! the same limiters.
//!
//! ```rust
//! use rpc_complexity::{CallInfo, ComplexityServer};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let server = ComplexityServer::builder()
//!     .max_wait(Duration::from_millis(250))
//!     .global_every(Duration::from_millis(100), 10)
//!     .build()?;
//!
//! // Nothing is registered, so the call is forwarded untouched.
//! let reply = server
//!     .intercept(CallInfo::new("/demo.Echo/Echo"), "hi".to_string(), |_info, msg| async move {
//!         Ok::<_, std::io::Error>(msg.len())
//!     })
//!     .await?;
//! assert_eq!(reply, 2);
//! # Ok(())
//! # }
//! ```

use crate::call::{CallInfo, WeightMap};
use crate::error::{BuildError, ComplexityError, Rejection, RegistryError};
use crate::middleware::ComplexityLayer;
use crate::rate_limit::{QuotaPool, Rate, RateLimiter, TokenBucket};
use crate::registry::{Registry, ServiceDesc, ServiceRegistrar};
use crate::telemetry::{emit_best_effort, AdmissionEvent, NullSink, TelemetrySink};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;

/// Default bound on how long a call may wait for quota.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(1);

// Stand-in for "no deadline" when arrival + max_wait does not fit in an Instant.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Outcome of an admission decision that lets the call through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The method path is not `/service/method`; forwarded without limiting.
    MalformedPath,
    /// No complexity implementation is registered for the method.
    UnknownMethod {
        /// Service name.
        service: String,
        /// Method name.
        method: String,
    },
    /// The request message is not the type the registered weight function expects.
    MessageMismatch {
        /// Service name.
        service: String,
        /// Method name.
        method: String,
    },
    /// The weight function returned no tokens.
    Unweighted {
        /// Service name.
        service: String,
        /// Method name.
        method: String,
    },
    /// Every token of the call was admitted.
    Admitted {
        /// Service name.
        service: String,
        /// Method name.
        method: String,
        /// Weights charged, in charge order.
        weights: WeightMap,
    },
}

impl Admission {
    /// True when quota was actually charged for the call.
    pub fn is_limited(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

enum Plan {
    Forward(Admission),
    Charge { service: String, method: String, weights: WeightMap },
}

struct Shared<K> {
    registry: Registry,
    pool: QuotaPool,
    max_wait: Duration,
    sink: K,
}

/// Admission-control server: registry, quota pool and metrics sink.
pub struct ComplexityServer<K = NullSink> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for ComplexityServer<K> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<K> fmt::Debug for ComplexityServer<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComplexityServer")
            .field("services", &self.shared.registry.service_names())
            .field("pool", &self.shared.pool)
            .field("max_wait", &self.shared.max_wait)
            .finish()
    }
}

impl ComplexityServer<NullSink> {
    /// Start configuring a server.
    pub fn builder() -> ComplexityServerBuilder<NullSink> {
        ComplexityServerBuilder::new()
    }
}

impl<K> ComplexityServer<K> {
    /// The frozen method registry.
    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    /// The frozen token → limiter map.
    pub fn pool(&self) -> &QuotaPool {
        &self.shared.pool
    }

    /// Longest a call may wait for quota, measured from its arrival.
    pub fn max_wait(&self) -> Duration {
        self.shared.max_wait
    }

    /// The metrics sink.
    pub fn sink(&self) -> &K {
        &self.shared.sink
    }

    /// Instant by which every token of `info` must be admitted.
    ///
    /// Computed once per call: the earlier of arrival + max wait and the call's
    /// own deadline.
    pub fn deadline_for(&self, info: &CallInfo) -> Instant {
        let arrival = info.arrival();
        let bound = arrival
            .checked_add(self.shared.max_wait)
            .or_else(|| arrival.checked_add(FAR_FUTURE))
            .unwrap_or(arrival);
        match info.deadline() {
            Some(deadline) => bound.min(deadline),
            None => bound,
        }
    }

    fn plan(&self, info: &CallInfo, message: &(dyn Any + Send)) -> Plan {
        let Some((service, method)) = info.service_and_method() else {
            tracing::warn!(
                target: "rpc_complexity::server",
                full_method = info.full_method(),
                "malformed method path, skipping complexity limits"
            );
            return Plan::Forward(Admission::MalformedPath);
        };

        let Some(descriptor) = self.shared.registry.lookup(service, method) else {
            tracing::info!(
                target: "rpc_complexity::server",
                service,
                method,
                "unknown method, skipping complexity limits"
            );
            return Plan::Forward(Admission::UnknownMethod {
                service: service.to_string(),
                method: method.to_string(),
            });
        };

        match descriptor.weigh(info, message) {
            None => {
                tracing::warn!(
                    target: "rpc_complexity::server",
                    service,
                    method,
                    "request message does not match the registered complexity function"
                );
                Plan::Forward(Admission::MessageMismatch {
                    service: service.to_string(),
                    method: method.to_string(),
                })
            }
            Some(weights) if weights.is_empty() => Plan::Forward(Admission::Unweighted {
                service: service.to_string(),
                method: method.to_string(),
            }),
            Some(weights) => Plan::Charge {
                service: service.to_string(),
                method: method.to_string(),
                weights,
            },
        }
    }
}

impl<K> ComplexityServer<K>
where
    K: TelemetrySink,
    K::Error: std::error::Error + Send + 'static,
    K::Future: Send + 'static,
{
    /// Decide whether the call described by `info` carrying `message` may proceed.
    ///
    /// Calls whose routing cannot be resolved are let through (`Ok`) without
    /// limiting. Otherwise every token of the call's weight map is charged in
    /// order; the first one that cannot be admitted before the call's deadline
    /// rejects the call. Weight already charged to earlier tokens is kept.
    ///
    /// Dropping the returned future abandons the wait in progress.
    pub fn admit<'a>(
        &'a self,
        info: &'a CallInfo,
        message: &(dyn Any + Send),
    ) -> impl Future<Output = Result<Admission, Rejection>> + Send + 'a {
        let span = tracing::info_span!(
            target: "rpc_complexity::server",
            "complexity",
            full_method = info.full_method()
        );
        let plan = span.in_scope(|| self.plan(info, message));

        async move {
            let (service, method, weights) = match plan {
                Plan::Forward(admission) => return Ok(admission),
                Plan::Charge { service, method, weights } => (service, method, weights),
            };

            let deadline = self.deadline_for(info);
            for (token, weight) in weights.iter() {
                if let Err(source) = self.shared.pool.acquire(token, weight, deadline).await {
                    tracing::info!(
                        target: "rpc_complexity::server",
                        service = %service,
                        method = %method,
                        token,
                        weight,
                        error = %source,
                        "complexity quota exhausted"
                    );
                    emit_best_effort(
                        self.shared.sink.clone(),
                        AdmissionEvent::Rejected {
                            service: service.clone(),
                            method: method.clone(),
                            token: token.to_string(),
                            weight,
                            reason: source.to_string(),
                        },
                    )
                    .await;
                    return Err(Rejection { service, method, token: token.to_string(), weight, source });
                }
            }

            for (token, weight) in weights.iter() {
                emit_best_effort(
                    self.shared.sink.clone(),
                    AdmissionEvent::Admitted {
                        service: service.clone(),
                        method: method.clone(),
                        token: token.to_string(),
                        weight,
                    },
                )
                .await;
            }
            tracing::debug!(
                target: "rpc_complexity::server",
                service = %service,
                method = %method,
                tokens = weights.len(),
                "call admitted"
            );
            Ok(Admission::Admitted { service, method, weights })
        }
        .instrument(span)
    }

    /// Run `next` behind admission control.
    ///
    /// `next` is only invoked once the call is admitted; its error is returned
    /// as [`ComplexityError::Inner`].
    pub async fn intercept<M, R, E, F, Fut>(
        &self,
        info: CallInfo,
        message: M,
        next: F,
    ) -> Result<R, ComplexityError<E>>
    where
        M: Any + Send,
        F: FnOnce(CallInfo, M) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let admission = self.admit(&info, &message);
        admission.await?;
        next(info, message).await.map_err(ComplexityError::Inner)
    }

    /// A tower layer that applies this server to every call.
    pub fn layer(&self) -> ComplexityLayer<K> {
        ComplexityLayer::new(self.clone())
    }
}

/// Builder for [`ComplexityServer`].
///
/// Options are fixed for the lifetime of the built server.
pub struct ComplexityServerBuilder<K = NullSink> {
    registry: Registry,
    pool: QuotaPool,
    max_wait: Duration,
    sink: K,
    errors: Vec<RegistryError>,
}

impl<K> fmt::Debug for ComplexityServerBuilder<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComplexityServerBuilder")
            .field("registry", &self.registry)
            .field("pool", &self.pool)
            .field("max_wait", &self.max_wait)
            .field("errors", &self.errors)
            .finish()
    }
}

impl ComplexityServerBuilder<NullSink> {
    /// Builder with the defaults: one second max wait, unlimited global
    /// limiter, metrics disabled.
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            pool: QuotaPool::default(),
            max_wait: DEFAULT_MAX_WAIT,
            sink: NullSink,
            errors: Vec::new(),
        }
    }
}

impl Default for ComplexityServerBuilder<NullSink> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> ComplexityServerBuilder<K> {
    /// Longest a call may wait for quota, measured from its arrival.
    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Limiter for tokens without a dedicated one.
    pub fn global_limiter<L>(mut self, limiter: L) -> Self
    where
        L: RateLimiter + 'static,
    {
        self.pool.set_global(Arc::new(limiter));
        self
    }

    /// Global token bucket refilling one unit every `interval`.
    pub fn global_every(self, interval: Duration, burst: u64) -> Self {
        self.global_limiter(TokenBucket::every(interval, burst))
    }

    /// Global token bucket refilling at `rate`.
    pub fn global_rate(self, rate: Rate, burst: u64) -> Self {
        self.global_limiter(TokenBucket::new(rate, burst))
    }

    /// Dedicated limiter for `token`. Binding a token twice keeps the last limiter.
    pub fn limiter<L>(mut self, token: impl Into<String>, limiter: L) -> Self
    where
        L: RateLimiter + 'static,
    {
        self.pool.insert(token, Arc::new(limiter));
        self
    }

    /// Dedicated token bucket for `token`, refilling one unit every `interval`.
    pub fn every(self, token: impl Into<String>, interval: Duration, burst: u64) -> Self {
        self.limiter(token, TokenBucket::every(interval, burst))
    }

    /// Dedicated token bucket for `token`, refilling at `rate`.
    pub fn rate(self, token: impl Into<String>, rate: Rate, burst: u64) -> Self {
        self.limiter(token, TokenBucket::new(rate, burst))
    }

    /// Deliver admission events to `sink`.
    pub fn sink<K2>(self, sink: K2) -> ComplexityServerBuilder<K2>
    where
        K2: TelemetrySink,
    {
        ComplexityServerBuilder {
            registry: self.registry,
            pool: self.pool,
            max_wait: self.max_wait,
            sink,
            errors: self.errors,
        }
    }

    /// Stop delivering admission events.
    pub fn disable_metrics(self) -> ComplexityServerBuilder<NullSink> {
        self.sink(NullSink)
    }

    /// Use `registry` as the set of registered services, replacing any
    /// registrations made so far.
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Builder-style registration. Failures are reported by [`build`](Self::build).
    pub fn service<S>(mut self, desc: &ServiceDesc<S>, imp: Arc<S>) -> Self
    where
        S: ?Sized + Send + Sync + 'static,
    {
        // Recorded in `errors` by the registrar impl.
        let _ = ServiceRegistrar::register_service(&mut self, desc, imp);
        self
    }

    /// Validate the configuration and freeze it into a server.
    pub fn build(self) -> Result<ComplexityServer<K>, BuildError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err.into());
        }
        tracing::debug!(
            target: "rpc_complexity::server",
            services = self.registry.len(),
            max_wait = ?self.max_wait,
            "complexity server built"
        );
        Ok(ComplexityServer {
            shared: Arc::new(Shared {
                registry: self.registry,
                pool: self.pool,
                max_wait: self.max_wait,
                sink: self.sink,
            }),
        })
    }
}

impl<K> ServiceRegistrar for ComplexityServerBuilder<K> {
    fn register_service<S>(
        &mut self,
        desc: &ServiceDesc<S>,
        imp: Arc<S>,
    ) -> Result<(), RegistryError>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        self.registry.register_service(desc, imp).map_err(|err| {
            self.errors.push(err.clone());
            err
        })
    }
}
