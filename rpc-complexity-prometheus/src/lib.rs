//! Prometheus metrics sink for `rpc-complexity`.
//!
//! Admitted weight is added to the `rpc_complexity_total` counter, labelled by
//! `service`, `method` and `token`. Bring your own `prometheus::Registry` or use
//! the process-wide default one.
//!
//! Earlier gRPC deployments exported this counter as `grpc_complexity` with
//! the help text "Sum of grpc's complexity". Dashboards and alerts built on
//! that name need to be pointed at `rpc_complexity_total`.

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, Opts, Registry};
use rpc_complexity::telemetry::{AdmissionEvent, TelemetrySink};
use std::convert::Infallible;
use std::future::{ready, Ready};
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};

/// Name of the admitted-complexity counter.
pub const METRIC_NAME: &str = "rpc_complexity_total";
/// Help text of the admitted-complexity counter.
pub const METRIC_HELP: &str = "Sum of admitted call complexity";
/// Label names, in `with_label_values` order.
pub const LABELS: [&str; 3] = ["service", "method", "token"];

lazy_static! {
    static ref COMPLEXITY_TOTAL: IntCounterVec =
        IntCounterVec::new(Opts::new(METRIC_NAME, METRIC_HELP), &LABELS)
            .expect("Failed to create rpc_complexity_total metric");
    static ref IDENTITY_CHECK: Mutex<()> = Mutex::new(());
}

// Parsed service and method names are never empty, so no admitted call lands here.
const MARKER_LABELS: [&str; 3] = ["", "", ""];

/// The process-wide `rpc_complexity_total` collector.
///
/// Every sink built with [`PrometheusSink::register`] increments this one, so
/// registering it again is harmless.
pub fn complexity_counter() -> IntCounterVec {
    COMPLEXITY_TOTAL.clone()
}

/// Counts admitted weight per (service, method, token).
#[derive(Clone, Debug)]
pub struct PrometheusSink {
    counter: IntCounterVec,
}

impl PrometheusSink {
    /// Register the process-wide counter into `registry`.
    ///
    /// # Errors
    /// Returns an error if a different collector already uses the name.
    /// Registering the same collector again is accepted.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        Self::with_counter(complexity_counter(), registry)
    }

    /// Register the process-wide counter into `prometheus::default_registry()`.
    pub fn register_default() -> Result<Self, prometheus::Error> {
        Self::register(prometheus::default_registry())
    }

    /// Use a caller-supplied counter, registering it into `registry`.
    ///
    /// The counter must carry the `service`, `method` and `token` labels.
    pub fn with_counter(
        counter: IntCounterVec,
        registry: &Registry,
    ) -> Result<Self, prometheus::Error> {
        match registry.register(Box::new(counter.clone())) {
            Ok(()) => {}
            Err(prometheus::Error::AlreadyReg) => {
                if !is_registered_in(&counter, registry) {
                    return Err(prometheus::Error::Msg(format!(
                        "{} is already registered in this registry by a different collector",
                        METRIC_NAME
                    )));
                }
                tracing::debug!(
                    target: "rpc_complexity::prometheus",
                    metric = METRIC_NAME,
                    "collector already registered, reusing it"
                );
            }
            Err(err) => return Err(err),
        }
        Ok(Self { counter })
    }

    /// The counter this sink increments.
    pub fn counter(&self) -> &IntCounterVec {
        &self.counter
    }

    /// Current total for one label set.
    pub fn value(&self, service: &str, method: &str, token: &str) -> u64 {
        self.counter.with_label_values(&[service, method, token]).get()
    }
}

/// Whether the collector `registry` holds under [`METRIC_NAME`] shares state
/// with `counter`.
///
/// A registry only compares names, so a foreign collector with other labels or
/// help text also reports `AlreadyReg`. A marker child is set on `counter` and
/// looked up in a scrape of `registry`.
fn is_registered_in(counter: &IntCounterVec, registry: &Registry) -> bool {
    let _guard = IDENTITY_CHECK.lock().unwrap_or_else(PoisonError::into_inner);
    if counter.get_metric_with_label_values(&MARKER_LABELS).is_err() {
        return false;
    }
    let found = registry
        .gather()
        .iter()
        .filter(|family| family.get_name() == METRIC_NAME)
        .any(|family| {
            family.get_metric().iter().any(|metric| {
                let labels = metric.get_label();
                labels.len() == LABELS.len()
                    && labels.iter().all(|pair| pair.get_value().is_empty())
            })
        });
    if let Err(err) = counter.remove_label_values(&MARKER_LABELS) {
        tracing::debug!(target: "rpc_complexity::prometheus", error = %err, "marker removal failed");
    }
    found
}

impl tower_service::Service<AdmissionEvent> for PrometheusSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: AdmissionEvent) -> Self::Future {
        if let AdmissionEvent::Admitted { service, method, token, weight } = &event {
            self.counter
                .with_label_values(&[service.as_str(), method.as_str(), token.as_str()])
                .inc_by(*weight);
        }
        ready(Ok(()))
    }
}

impl TelemetrySink for PrometheusSink {
    type SinkError = Infallible;
}
