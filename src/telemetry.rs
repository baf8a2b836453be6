//! Telemetry for admission decisions.
//!
//! Every quota decision the admission layer takes is described by an
//! [`AdmissionEvent`]. Events flow through `TelemetrySink` implementations
//! which can log, aggregate, or forward them to external systems (see the
//! `rpc-complexity-prometheus` crate for the counter backend).
//!
//! A sink is a `tower::Service<AdmissionEvent>`, so sinks compose with the
//! usual tower combinators.
//!
//! ```rust
//! use rpc_complexity::telemetry::AdmissionEvent;
//!
//! let admitted = AdmissionEvent::Admitted {
//!     service: "helloworld.Greeter".into(),
//!     method: "SayHello".into(),
//!     token: "default".into(),
//!     weight: 1,
//! };
//! assert!(admitted.is_admitted());
//! ```

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tower::Service;

/// A telemetry sink that consumes admission events.
///
/// # Implementing a Custom Sink
///
/// ```rust
/// use rpc_complexity::telemetry::{AdmissionEvent, TelemetrySink};
/// use tower::Service;
/// use std::task::{Context, Poll};
/// use std::pin::Pin;
/// use std::future::Future;
///
/// #[derive(Clone)]
/// struct MySink;
///
/// impl Service<AdmissionEvent> for MySink {
///     type Response = ();
///     type Error = std::convert::Infallible;
///     type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;
///
///     fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
///         Poll::Ready(Ok(()))
///     }
///
///     fn call(&mut self, event: AdmissionEvent) -> Self::Future {
///         println!("Received event: {}", event);
///         Box::pin(async { Ok(()) })
///     }
/// }
///
/// impl TelemetrySink for MySink {
///     type SinkError = std::convert::Infallible;
/// }
/// ```
pub trait TelemetrySink:
    tower::Service<AdmissionEvent, Response = (), Error = Self::SinkError> + Clone + Send + Sync + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + 'static;
}

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
///
/// A failing sink must never fail the call it is observing.
pub async fn emit_best_effort<S>(sink: S, event: AdmissionEvent)
where
    S: tower::Service<AdmissionEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        if let Err(e) = ready_sink.call(event).await {
            tracing::debug!(target: "rpc_complexity::telemetry", error = %e, "telemetry sink failed");
        }
    }
}

/// Outcome of charging one token of one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionEvent {
    /// `weight` units of `token` were admitted for the call.
    ///
    /// Emitted once per token, only after every token of the call was admitted.
    Admitted {
        /// Service name.
        service: String,
        /// Method name.
        method: String,
        /// Quota token.
        token: String,
        /// Units admitted.
        weight: u64,
    },
    /// The call was refused because `token` could not supply `weight` units.
    Rejected {
        /// Service name.
        service: String,
        /// Method name.
        method: String,
        /// Quota token.
        token: String,
        /// Units requested.
        weight: u64,
        /// Limiter failure, rendered.
        reason: String,
    },
}

impl AdmissionEvent {
    /// Whether this event records admitted weight.
    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmissionEvent::Admitted { .. })
    }

    /// `(service, method, token)` labels of the event.
    pub fn labels(&self) -> (&str, &str, &str) {
        match self {
            AdmissionEvent::Admitted { service, method, token, .. }
            | AdmissionEvent::Rejected { service, method, token, .. } => (service, method, token),
        }
    }

    /// Weight admitted or requested.
    pub fn weight(&self) -> u64 {
        match self {
            AdmissionEvent::Admitted { weight, .. } | AdmissionEvent::Rejected { weight, .. } => {
                *weight
            }
        }
    }
}

impl fmt::Display for AdmissionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionEvent::Admitted { service, method, token, weight } => {
                write!(f, "Admitted({}/{}, {}={})", service, method, token, weight)
            }
            AdmissionEvent::Rejected { service, method, token, weight, reason } => {
                write!(f, "Rejected({}/{}, {}={}: {})", service, method, token, weight, reason)
            }
        }
    }
}

/// A sink that discards every event. Used when metrics are disabled.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<AdmissionEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = std::future::Ready<Result<(), Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: AdmissionEvent) -> Self::Future {
        std::future::ready(Ok(()))
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// A telemetry sink that logs events using the `tracing` crate.
///
/// Events are logged at INFO level with structured fields.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<AdmissionEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = std::future::Ready<Result<(), Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: AdmissionEvent) -> Self::Future {
        let (service, method, token) = event.labels();
        tracing::info!(
            target: "rpc_complexity::telemetry",
            service,
            method,
            token,
            weight = event.weight(),
            admitted = event.is_admitted(),
            "admission_event"
        );
        std::future::ready(Ok(()))
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// A telemetry sink that stores events in memory.
///
/// Useful for testing and debugging. Clones share the same buffer.
///
/// ```rust
/// use rpc_complexity::telemetry::{AdmissionEvent, MemorySink};
/// use tower::Service;
///
/// # #[tokio::main]
/// # async fn main() {
/// let mut sink = MemorySink::new();
/// let event = AdmissionEvent::Admitted {
///     service: "s".into(),
///     method: "m".into(),
///     token: "t".into(),
///     weight: 2,
/// };
/// sink.call(event.clone()).await.unwrap();
/// assert_eq!(sink.events(), vec![event]);
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<AdmissionEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Creates a bounded memory sink (default cap: 10,000).
    /// Oldest events are evicted when capacity is exceeded.
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    /// Creates a bounded memory sink with explicit capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Snapshot of the recorded events, oldest first.
    pub fn events(&self) -> Vec<AdmissionEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Sum of admitted weight recorded for the given labels.
    pub fn admitted_weight(&self, service: &str, method: &str, token: &str) -> u64 {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.is_admitted() && e.labels() == (service, method, token))
            .map(AdmissionEvent::weight)
            .sum()
    }

    /// Forget all recorded events.
    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True when nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of events dropped because the buffer was full.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<AdmissionEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: AdmissionEvent) -> Self::Future {
        let mut guard = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admitted(token: &str, weight: u64) -> AdmissionEvent {
        AdmissionEvent::Admitted {
            service: "svc".into(),
            method: "m".into(),
            token: token.into(),
            weight,
        }
    }

    #[tokio::test]
    async fn memory_sink_evicts_oldest() {
        let mut sink = MemorySink::with_capacity(2);
        sink.call(admitted("a", 1)).await.unwrap();
        sink.call(admitted("b", 1)).await.unwrap();
        sink.call(admitted("c", 1)).await.unwrap();

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.evicted(), 1);
        assert_eq!(sink.events(), vec![admitted("b", 1), admitted("c", 1)]);

        sink.clear();
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn admitted_weight_only_sums_admissions() {
        let mut sink = MemorySink::new();
        sink.call(admitted("db", 3)).await.unwrap();
        sink.call(admitted("db", 4)).await.unwrap();
        sink.call(admitted("cpu", 100)).await.unwrap();
        sink.call(AdmissionEvent::Rejected {
            service: "svc".into(),
            method: "m".into(),
            token: "db".into(),
            weight: 50,
            reason: "exhausted".into(),
        })
        .await
        .unwrap();

        assert_eq!(sink.admitted_weight("svc", "m", "db"), 7);
        assert_eq!(sink.admitted_weight("svc", "other", "db"), 0);
    }

    #[tokio::test]
    async fn emit_best_effort_swallows_errors() {
        #[derive(Clone)]
        struct Fails;
        impl Service<AdmissionEvent> for Fails {
            type Response = ();
            type Error = std::io::Error;
            type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;
            fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
                Poll::Ready(Ok(()))
            }
            fn call(&mut self, _req: AdmissionEvent) -> Self::Future {
                Box::pin(async { Err(std::io::Error::new(std::io::ErrorKind::Other, "fail")) })
            }
        }

        // Should not panic even though sink errors
        emit_best_effort(Fails, admitted("t", 1)).await;
    }

    #[test]
    fn display_includes_labels() {
        let text = admitted("db", 9).to_string();
        assert!(text.contains("svc/m"));
        assert!(text.contains("db=9"));
    }

    #[tokio::test]
    async fn log_sink_accepts_events() {
        let mut sink = LogSink;
        sink.call(admitted("t", 1)).await.unwrap();
    }
}
