//! Error types for admission control
use std::fmt;
use std::time::Duration;

/// Why a limiter could not admit a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    /// The request asks for more units than the limiter can ever hold at once.
    #[error("wait(n={requested}) exceeds limiter's burst {burst}")]
    ExceedsBurst {
        /// Units requested.
        requested: u64,
        /// Burst capacity of the limiter.
        burst: u64,
    },
    /// Admitting the request would take longer than the time left before the deadline.
    #[error("wait(n={requested}) would take {wait:?}, exceeding the remaining {remaining:?}")]
    WouldExceedDeadline {
        /// Units requested.
        requested: u64,
        /// Time the request would have to wait.
        wait: Duration,
        /// Time left before the call's deadline.
        remaining: Duration,
    },
    /// The limiter never refills, so the request can never be satisfied.
    #[error("wait(n={requested}) can never be satisfied by a limiter with zero refill rate")]
    Starved {
        /// Units requested.
        requested: u64,
    },
}

/// A call rejected because one of its tokens ran out of quota.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("limiter[{token}] wait {weight} for {service}/{method}: {source}")]
pub struct Rejection {
    /// Service name parsed from the method path.
    pub service: String,
    /// Method name parsed from the method path.
    pub method: String,
    /// Token whose limiter refused the weight.
    pub token: String,
    /// Weight that was requested for `token`.
    pub weight: u64,
    /// Underlying limiter failure.
    pub source: WaitError,
}

/// Unified error returned by the admission layer.
#[derive(Debug, Clone)]
pub enum ComplexityError<E> {
    /// A quota was exhausted; the call never reached the inner service.
    ResourceExhausted(Rejection),
    /// The inner service failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for ComplexityError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceExhausted(rejection) => write!(f, "resource exhausted: {}", rejection),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ComplexityError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ResourceExhausted(rejection) => Some(rejection),
            Self::Inner(e) => Some(e),
        }
    }
}

impl<E> From<Rejection> for ComplexityError<E> {
    fn from(rejection: Rejection) -> Self {
        Self::ResourceExhausted(rejection)
    }
}

impl<E> ComplexityError<E> {
    /// Check if the call was rejected by a limiter.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, Self::ResourceExhausted(_))
    }
    /// Check if this error wraps an inner error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }
    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
    /// Access the rejection details if the call was refused.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::ResourceExhausted(r) => Some(r),
            _ => None,
        }
    }
    /// Access the limiter failure if the call was refused.
    pub fn wait_error(&self) -> Option<&WaitError> {
        self.rejection().map(|r| &r.source)
    }
}

/// Errors raised while registering services.
///
/// These are startup configuration errors: a process must not begin serving
/// after receiving one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A service with the same name was already registered.
    #[error("duplicate service registration for {service:?}")]
    DuplicateService {
        /// Name of the offending service.
        service: String,
    },
    /// A service descriptor lists the same method twice.
    #[error("service {service:?} declares method {method:?} more than once")]
    DuplicateMethod {
        /// Service being registered.
        service: String,
        /// Method declared twice.
        method: String,
    },
}

/// Errors produced when building a server.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// A service registration made through the builder failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
