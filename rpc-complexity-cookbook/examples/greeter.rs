//! Greeter server behind complexity limits.
//!
//! Five callers hit `SayHello` at once against a quota of 3 calls per second:
//! three are admitted immediately, the other two wait for refills. The scraped
//! Prometheus counter is printed at the end.

use futures::future::join_all;
use prometheus::{Registry, TextEncoder};
use rpc_complexity::prelude::*;
use rpc_complexity_cookbook::{
    hello_world_quota, register_greeter_complexity, say_hello, DefaultGreeterComplexity,
    HelloRequest, SAY_HELLO_FULL_METHOD,
};
use rpc_complexity_prometheus::PrometheusSink;
use std::sync::Arc;
use tower::{ServiceBuilder, ServiceExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG).init();

    println!("=== Greeter Complexity Example ===\n");

    let registry = Registry::new();
    let sink = PrometheusSink::register(&registry)?;

    let mut builder = hello_world_quota(ComplexityServer::builder()).sink(sink);
    register_greeter_complexity(&mut builder, Arc::new(DefaultGreeterComplexity))?;
    let server = builder.build()?;

    let svc = ServiceBuilder::new().layer(server.layer()).service_fn(say_hello);

    let start = tokio::time::Instant::now();
    let calls = (1..=5).map(|i| {
        let call = UnaryCall::new(SAY_HELLO_FULL_METHOD, HelloRequest { name: format!("caller {i}") });
        svc.clone().oneshot(call)
    });
    for result in join_all(calls).await {
        match result {
            Ok(reply) => println!("[{:>6.3?}] {}", start.elapsed(), reply.message),
            Err(e) => println!("[{:>6.3?}] rejected: {}", start.elapsed(), e),
        }
    }

    // An unregistered method is never limited.
    let call = UnaryCall::new("/helloworld.Greeter/SayGoodbye", HelloRequest::default());
    let reply = svc.clone().oneshot(call).await?;
    println!("unlimited: {}", reply.message);

    println!("\nScraped metrics:");
    print!("{}", TextEncoder::new().encode_to_string(&registry.gather())?);

    Ok(())
}
