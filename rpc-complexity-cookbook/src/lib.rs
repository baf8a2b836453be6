//! Worked examples ("cookbook") for rpc-complexity.
//!
//! The `helloworld.Greeter` glue below is exactly what a code generator emits
//! for a service with a single `SayHello` method:
//! - a complexity trait with one weight method per RPC method,
//! - a default implementation charging one unit of the `default` token,
//! - a static [`ServiceDesc`] and a registration function.
//!
//! Hand-written services follow the same shape.

use rpc_complexity::{
    CallInfo, ComplexityServerBuilder, MethodDesc, Rate, RegistryError, ServiceDesc,
    ServiceRegistrar, UnaryCall, WeightMap,
};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// Full method path of `helloworld.Greeter/SayHello`.
pub const SAY_HELLO_FULL_METHOD: &str = "/helloworld.Greeter/SayHello";

/// Request of `SayHello`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelloRequest {
    /// Who to greet.
    pub name: String,
}

/// Response of `SayHello`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelloReply {
    /// The greeting.
    pub message: String,
}

/// Complexity of every `helloworld.Greeter` method.
pub trait GreeterComplexity: Send + Sync + 'static {
    /// Weights charged by one `SayHello` call.
    fn say_hello(&self, cx: &CallInfo, req: &HelloRequest) -> WeightMap;
}

/// Charges `{"default": 1}` for every method.
///
/// Wrap it to override only some methods.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultGreeterComplexity;

impl GreeterComplexity for DefaultGreeterComplexity {
    fn say_hello(&self, _cx: &CallInfo, _req: &HelloRequest) -> WeightMap {
        WeightMap::unit()
    }
}

fn greeter_say_hello_complexity(
    srv: &dyn GreeterComplexity,
    cx: &CallInfo,
    req: &(dyn Any + Send),
) -> Option<WeightMap> {
    req.downcast_ref::<HelloRequest>().map(|req| srv.say_hello(cx, req))
}

/// Registration descriptor of `helloworld.Greeter`.
pub static GREETER_COMPLEXITY_DESC: ServiceDesc<dyn GreeterComplexity> = ServiceDesc {
    service_name: "helloworld.Greeter",
    methods: &[MethodDesc { method_name: "SayHello", handler: greeter_say_hello_complexity }],
};

/// Register `imp` as the complexity implementation of `helloworld.Greeter`.
pub fn register_greeter_complexity<R>(
    registrar: &mut R,
    imp: Arc<dyn GreeterComplexity>,
) -> Result<(), RegistryError>
where
    R: ServiceRegistrar,
{
    registrar.register_service(&GREETER_COMPLEXITY_DESC, imp)
}

/// The quota used by the Greeter demo: 3 calls per second with a burst of 3,
/// waiting at most 5 seconds.
pub fn hello_world_quota<K>(builder: ComplexityServerBuilder<K>) -> ComplexityServerBuilder<K> {
    builder.global_rate(Rate::per_second(3.0), 3).max_wait(Duration::from_secs(5))
}

/// A trivial `SayHello` handler, usable with `tower::service_fn`.
pub async fn say_hello(call: UnaryCall<HelloRequest>) -> Result<HelloReply, std::io::Error> {
    Ok(HelloReply { message: format!("Hello {}", call.message.name) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpc_complexity::{ComplexityServer, MemorySink, Registry};
    use tower::{service_fn, ServiceBuilder, ServiceExt};

    struct ByNameLength;
    impl GreeterComplexity for ByNameLength {
        fn say_hello(&self, _cx: &CallInfo, req: &HelloRequest) -> WeightMap {
            WeightMap::new().with("letters", req.name.len() as u64)
        }
    }

    #[test]
    fn default_implementation_charges_one_unit() {
        let mut registry = Registry::new();
        register_greeter_complexity(&mut registry, Arc::new(DefaultGreeterComplexity)).unwrap();

        let descriptor = registry.lookup("helloworld.Greeter", "SayHello").expect("registered");
        let info = CallInfo::new(SAY_HELLO_FULL_METHOD);
        let weights = descriptor.weigh(&info, &HelloRequest { name: "x".into() });
        assert_eq!(weights, Some(WeightMap::unit()));
    }

    #[test]
    fn registering_twice_fails() {
        let mut registry = Registry::new();
        register_greeter_complexity(&mut registry, Arc::new(DefaultGreeterComplexity)).unwrap();
        let err = register_greeter_complexity(&mut registry, Arc::new(ByNameLength)).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateService { .. }));
    }

    #[tokio::test]
    async fn custom_weights_reach_the_sink() {
        let sink = MemorySink::new();
        // "world" costs 5 letters, more than the global burst of 3.
        let mut builder = hello_world_quota(ComplexityServer::builder())
            .rate("letters", Rate::per_second(100.0), 16)
            .sink(sink.clone());
        register_greeter_complexity(&mut builder, Arc::new(ByNameLength)).unwrap();
        let server = builder.build().unwrap();

        let svc = ServiceBuilder::new().layer(server.layer()).service(service_fn(say_hello));
        let reply = svc
            .oneshot(UnaryCall::new(SAY_HELLO_FULL_METHOD, HelloRequest { name: "world".into() }))
            .await
            .unwrap();

        assert_eq!(reply.message, "Hello world");
        assert_eq!(sink.admitted_weight("helloworld.Greeter", "SayHello", "letters"), 5);
        assert_eq!(sink.admitted_weight("helloworld.Greeter", "SayHello", "default"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn demo_quota_admits_three_then_queues() {
        let imp: Arc<dyn GreeterComplexity> = Arc::new(DefaultGreeterComplexity);
        let server = hello_world_quota(ComplexityServer::builder())
            .service(&GREETER_COMPLEXITY_DESC, imp)
            .build()
            .unwrap();
        let svc = ServiceBuilder::new().layer(server.layer()).service(service_fn(say_hello));

        let start = tokio::time::Instant::now();
        for name in ["a", "b", "c", "d"] {
            let call = UnaryCall::new(SAY_HELLO_FULL_METHOD, HelloRequest { name: name.into() });
            svc.clone().oneshot(call).await.unwrap();
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= std::time::Duration::from_millis(330), "elapsed = {elapsed:?}");
        assert!(elapsed <= std::time::Duration::from_millis(340), "elapsed = {elapsed:?}");
    }
}
