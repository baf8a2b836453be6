//! Tower integration for the admission-control interceptor.
use crate::call::UnaryCall;
use crate::error::ComplexityError;
use crate::server::ComplexityServer;
use crate::telemetry::{NullSink, TelemetrySink};
use futures::future::BoxFuture;
use std::any::Any;
use std::fmt;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// A layer that runs every [`UnaryCall`] through a [`ComplexityServer`].
#[derive(Clone)]
pub struct ComplexityLayer<K = NullSink> {
    server: ComplexityServer<K>,
}

impl<K> ComplexityLayer<K> {
    /// Create a new complexity layer.
    pub fn new(server: ComplexityServer<K>) -> Self {
        Self { server }
    }
}

impl<K> fmt::Debug for ComplexityLayer<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComplexityLayer").field("server", &self.server).finish()
    }
}

impl<S, K> Layer<S> for ComplexityLayer<K> {
    type Service = ComplexityService<S, K>;

    fn layer(&self, service: S) -> Self::Service {
        ComplexityService { inner: service, server: self.server.clone() }
    }
}

/// Middleware service that admits calls before forwarding them.
#[derive(Clone)]
pub struct ComplexityService<S, K = NullSink> {
    inner: S,
    server: ComplexityServer<K>,
}

impl<S, K> ComplexityService<S, K> {
    /// Wrap `inner` directly, without going through a layer.
    pub fn new(inner: S, server: ComplexityServer<K>) -> Self {
        Self { inner, server }
    }

    /// The wrapped service.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S: fmt::Debug, K> fmt::Debug for ComplexityService<S, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComplexityService")
            .field("inner", &self.inner)
            .field("server", &self.server)
            .finish()
    }
}

impl<S, K, M> Service<UnaryCall<M>> for ComplexityService<S, K>
where
    S: Service<UnaryCall<M>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    K: TelemetrySink,
    K::Error: std::error::Error + Send + 'static,
    K::Future: Send + 'static,
    M: Any + Send + 'static,
{
    type Response = S::Response;
    type Error = ComplexityError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(ComplexityError::Inner)
    }

    fn call(&mut self, req: UnaryCall<M>) -> Self::Future {
        let server = self.server.clone();
        // Take the service that was driven to readiness, leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let (info, message) = req.into_parts();
            let admission = server.admit(&info, &message);
            admission.await?;
            inner.call(UnaryCall::from_parts(info, message)).await.map_err(ComplexityError::Inner)
        })
    }
}
