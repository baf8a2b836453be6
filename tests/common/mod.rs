//! Shared fixtures: hand-written Greeter glue and a log-capturing subscriber.
#![allow(dead_code)]

use rpc_complexity::{CallInfo, MethodDesc, ServiceDesc, UnaryCall, WeightMap};
use std::any::Any;
use std::sync::{Arc, Mutex};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;

pub const SAY_HELLO: &str = "/helloworld.Greeter/SayHello";

#[derive(Debug, Clone)]
pub struct HelloRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloReply {
    pub message: String,
}

pub trait GreeterComplexity: Send + Sync + 'static {
    fn say_hello(&self, cx: &CallInfo, req: &HelloRequest) -> WeightMap;
}

fn say_hello_handler(
    srv: &dyn GreeterComplexity,
    cx: &CallInfo,
    req: &(dyn Any + Send),
) -> Option<WeightMap> {
    req.downcast_ref::<HelloRequest>().map(|req| srv.say_hello(cx, req))
}

pub static GREETER_DESC: ServiceDesc<dyn GreeterComplexity> = ServiceDesc {
    service_name: "helloworld.Greeter",
    methods: &[MethodDesc { method_name: "SayHello", handler: say_hello_handler }],
};

/// Charges the same weights for every call.
pub struct Fixed(pub WeightMap);

impl GreeterComplexity for Fixed {
    fn say_hello(&self, _cx: &CallInfo, _req: &HelloRequest) -> WeightMap {
        self.0.clone()
    }
}

/// Reads weights from the request name, e.g. `"cpu=1,db=3"`.
pub struct FromName;

impl GreeterComplexity for FromName {
    fn say_hello(&self, _cx: &CallInfo, req: &HelloRequest) -> WeightMap {
        req.name
            .split(',')
            .filter_map(|pair| {
                let (token, weight) = pair.split_once('=')?;
                Some((token.trim(), weight.trim().parse::<u64>().ok()?))
            })
            .collect()
    }
}

pub fn fixed(weights: WeightMap) -> Arc<dyn GreeterComplexity> {
    Arc::new(Fixed(weights))
}

pub fn from_name() -> Arc<dyn GreeterComplexity> {
    Arc::new(FromName)
}

pub fn hello(name: &str) -> UnaryCall<HelloRequest> {
    UnaryCall::new(SAY_HELLO, HelloRequest { name: name.to_string() })
}

pub async fn greet(call: UnaryCall<HelloRequest>) -> Result<HelloReply, std::io::Error> {
    Ok(HelloReply { message: format!("Hello {}", call.message.name) })
}

#[derive(Clone)]
pub struct SharedWriter(pub Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedGuard;
    fn make_writer(&'a self) -> Self::Writer {
        SharedGuard(self.0.clone())
    }
}

pub struct SharedGuard(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Route this thread's `tracing` output into a buffer until the guard drops.
pub fn capture_logs() -> (Arc<Mutex<Vec<u8>>>, DefaultGuard) {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(BoxMakeWriter::new(SharedWriter(buffer.clone())))
        .with_max_level(tracing::Level::DEBUG)
        .with_target(true)
        .with_ansi(false)
        .without_time()
        .finish();
    (buffer, tracing::subscriber::set_default(subscriber))
}

pub fn logs(buffer: &Arc<Mutex<Vec<u8>>>) -> String {
    String::from_utf8(buffer.lock().unwrap().clone()).unwrap()
}
