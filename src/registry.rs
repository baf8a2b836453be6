//! Registry of complexity-controlled services and their weight functions.
//!
//! Generated glue describes each service with a static [`ServiceDesc`] whose
//! methods are plain function pointers taking `&S`, where `S` is the service's
//! complexity trait object (e.g. `dyn GreeterComplexity`). Registration pairs
//! that descriptor with an `Arc<S>`, so an implementation that does not conform
//! to the service's trait is rejected by the compiler rather than at startup.
//!
//! ```rust
//! use rpc_complexity::{CallInfo, MethodDesc, Registry, ServiceDesc, WeightMap};
//! use std::any::Any;
//! use std::sync::Arc;
//!
//! pub struct EchoRequest { pub payload: String }
//!
//! pub trait EchoComplexity: Send + Sync + 'static {
//!     fn echo(&self, cx: &CallInfo, req: &EchoRequest) -> WeightMap;
//! }
//!
//! fn echo_handler(
//!     srv: &dyn EchoComplexity,
//!     cx: &CallInfo,
//!     req: &(dyn Any + Send),
//! ) -> Option<WeightMap> {
//!     req.downcast_ref::<EchoRequest>().map(|req| srv.echo(cx, req))
//! }
//!
//! pub static ECHO_COMPLEXITY_DESC: ServiceDesc<dyn EchoComplexity> = ServiceDesc {
//!     service_name: "demo.Echo",
//!     methods: &[MethodDesc { method_name: "Echo", handler: echo_handler }],
//! };
//!
//! struct BySize;
//! impl EchoComplexity for BySize {
//!     fn echo(&self, _cx: &CallInfo, req: &EchoRequest) -> WeightMap {
//!         WeightMap::new().with("bytes", req.payload.len() as u64)
//!     }
//! }
//!
//! let imp: Arc<dyn EchoComplexity> = Arc::new(BySize);
//! let mut registry = Registry::new();
//! registry.register_service(&ECHO_COMPLEXITY_DESC, imp).unwrap();
//! assert!(registry.lookup("demo.Echo", "Echo").is_some());
//! ```

use crate::call::{CallInfo, WeightMap};
use crate::error::RegistryError;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Weight function of one method as emitted by generated glue.
///
/// Returns `None` when `request` is not the message type the method expects.
pub type WeightHandler<S> = fn(&S, &CallInfo, &(dyn Any + Send)) -> Option<WeightMap>;

/// Static description of one method.
pub struct MethodDesc<S: ?Sized + 'static> {
    /// Method name as it appears in the call path.
    pub method_name: &'static str,
    /// Computes the call's weights from its request.
    pub handler: WeightHandler<S>,
}

/// Static description of one service.
pub struct ServiceDesc<S: ?Sized + 'static> {
    /// Fully-qualified service name as it appears in the call path.
    pub service_name: &'static str,
    /// Methods under complexity control.
    pub methods: &'static [MethodDesc<S>],
}

impl<S: ?Sized + 'static> fmt::Debug for ServiceDesc<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDesc")
            .field("service_name", &self.service_name)
            .field("methods", &self.methods.iter().map(|m| m.method_name).collect::<Vec<_>>())
            .finish()
    }
}

type ErasedHandler = dyn Fn(&CallInfo, &(dyn Any + Send)) -> Option<WeightMap> + Send + Sync;

/// A registered method, bound to its service implementation.
#[derive(Clone)]
pub struct MethodDescriptor {
    service: Arc<str>,
    method: Arc<str>,
    handler: Arc<ErasedHandler>,
}

impl MethodDescriptor {
    /// Service this method belongs to.
    pub fn service_name(&self) -> &str {
        &self.service
    }

    /// Method name.
    pub fn method_name(&self) -> &str {
        &self.method
    }

    /// Compute the weights of a call, `None` if `request` has an unexpected type.
    pub fn weigh(&self, info: &CallInfo, request: &(dyn Any + Send)) -> Option<WeightMap> {
        (self.handler)(info, request)
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("service", &self.service)
            .field("method", &self.method)
            .field("handler", &"<weight fn>")
            .finish()
    }
}

/// Something generated glue can register services into.
pub trait ServiceRegistrar {
    /// Register `imp` as the complexity implementation of `desc`.
    fn register_service<S>(
        &mut self,
        desc: &ServiceDesc<S>,
        imp: Arc<S>,
    ) -> Result<(), RegistryError>
    where
        S: ?Sized + Send + Sync + 'static;
}

/// In-memory service → method → descriptor map.
///
/// Mutable only while the server is being assembled; afterwards it is shared
/// immutably and lookups take no lock.
#[derive(Default, Clone, Debug)]
pub struct Registry {
    services: HashMap<String, HashMap<String, MethodDescriptor>>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the descriptor registered for `service`/`method`.
    pub fn lookup(&self, service: &str, method: &str) -> Option<&MethodDescriptor> {
        self.services.get(service)?.get(method)
    }

    /// Whether `service` has been registered.
    pub fn contains_service(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    /// Registered service names, sorted.
    pub fn service_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Register `imp` as the complexity implementation of `desc`.
    ///
    /// Fails if the service name is already taken or the descriptor lists a
    /// method twice; the registry is left unchanged in both cases.
    pub fn register_service<S>(
        &mut self,
        desc: &ServiceDesc<S>,
        imp: Arc<S>,
    ) -> Result<(), RegistryError>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        if self.services.contains_key(desc.service_name) {
            return Err(RegistryError::DuplicateService { service: desc.service_name.to_string() });
        }

        let service: Arc<str> = Arc::from(desc.service_name);
        let mut methods = HashMap::with_capacity(desc.methods.len());
        for m in desc.methods {
            let imp = imp.clone();
            let handler = m.handler;
            let descriptor = MethodDescriptor {
                service: service.clone(),
                method: Arc::from(m.method_name),
                handler: Arc::new(move |info: &CallInfo, req: &(dyn Any + Send)| {
                    handler(&*imp, info, req)
                }),
            };
            if methods.insert(m.method_name.to_string(), descriptor).is_some() {
                return Err(RegistryError::DuplicateMethod {
                    service: desc.service_name.to_string(),
                    method: m.method_name.to_string(),
                });
            }
        }

        tracing::debug!(
            target: "rpc_complexity::registry",
            service = desc.service_name,
            methods = desc.methods.len(),
            "registered complexity service"
        );
        self.services.insert(desc.service_name.to_string(), methods);
        Ok(())
    }
}

impl ServiceRegistrar for Registry {
    fn register_service<S>(
        &mut self,
        desc: &ServiceDesc<S>,
        imp: Arc<S>,
    ) -> Result<(), RegistryError>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        Registry::register_service(self, desc, imp)
    }
}
