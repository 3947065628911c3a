//! Finding a service, wherever it runs.
//!
//! Service code asks a [`Locator`] for a collaborator and gets a [`ServiceHandle`]. When the
//! collaborator is hosted by this process the handle wraps the instance itself; otherwise it
//! wraps the registry's cached [`RemoteStub`]. Calls look the same either way.

use crate::{
    dispatcher::DispatchTable,
    error::{Result, RpcError},
    net::client::RemoteStub,
    registry::Registry,
    types::{IntoArgs, Returnable, ServiceName, Type, Value},
    Service,
};
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::{any::Any, sync::Arc};
use tokio::sync::Mutex;
use tracing::info;

/// A service instance hosted by this process, with its dispatch table.
///
/// The instance sits behind an async mutex, so in-process calls and the dispatch server take
/// turns. A method that calls its own service through the locator while hosted here will
/// wait on itself forever.
pub struct LocalService<S> {
    instance: Arc<Mutex<S>>,
    table: Arc<DispatchTable<S>>,
}

impl<S> Clone for LocalService<S> {
    fn clone(&self) -> Self {
        Self {
            instance: Arc::clone(&self.instance),
            table: Arc::clone(&self.table),
        }
    }
}

impl<S: Service> LocalService<S> {
    pub fn new(instance: S) -> Result<Self> {
        Ok(Self {
            instance: Arc::new(Mutex::new(instance)),
            table: Arc::new(S::dispatch_table()?),
        })
    }

    pub fn instance(&self) -> &Arc<Mutex<S>> {
        &self.instance
    }

    pub fn table(&self) -> &DispatchTable<S> {
        &self.table
    }

    /// Type-reference arguments are checked against `registry`.
    pub async fn call(&self, method: &str, args: Vec<Value>, registry: &Registry) -> Result<Value> {
        let mut instance = self.instance.lock().await;
        self.table.call(&mut *instance, method, args, registry).await
    }
}

trait HostedService: Send + Sync {
    fn call<'a>(
        &'a self,
        method: &'a str,
        args: Vec<Value>,
        registry: &'a Registry,
    ) -> BoxFuture<'a, Result<Value>>;
    fn as_any(&self) -> &dyn Any;
}

impl<S: Service> HostedService for LocalService<S> {
    fn call<'a>(
        &'a self,
        method: &'a str,
        args: Vec<Value>,
        registry: &'a Registry,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(LocalService::call(self, method, args, registry))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Clone)]
pub struct Locator {
    registry: Arc<Registry>,
    hosted: Arc<DashMap<ServiceName, Arc<dyn HostedService>>>,
}

impl Locator {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            hosted: Arc::default(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Marks `S` as hosted by this process. Later lookups of `S` return this instance.
    pub fn host<S: Service>(&self, local: LocalService<S>) {
        info!(service = S::NAME, "hosting service locally");
        self.hosted.insert(S::NAME.into(), Arc::new(local));
    }

    pub fn is_hosted(&self, service: &str) -> bool {
        self.hosted.contains_key(service)
    }

    pub fn get<S: Service>(&self) -> Result<ServiceHandle<S>> {
        if let Some(hosted) = self.hosted.get(S::NAME) {
            if let Some(local) = hosted.as_any().downcast_ref::<LocalService<S>>() {
                return Ok(ServiceHandle::Local {
                    service: local.clone(),
                    registry: Arc::clone(&self.registry),
                });
            }
        }
        Ok(ServiceHandle::Remote(self.registry.resolve(S::NAME)?))
    }

    /// Calls `method` on the service named `service`, for callers that only hold a type
    /// reference to it.
    pub async fn invoke(
        &self,
        service: &str,
        method: &str,
        args: Vec<Value>,
        returns: &Type,
    ) -> Result<Value> {
        let hosted = self.hosted.get(service).map(|entry| Arc::clone(entry.value()));
        match hosted {
            Some(local) => {
                if !returns.is_return() {
                    return Err(RpcError::UnsupportedReturnType {
                        method: method.to_owned(),
                        typ: returns.clone(),
                    });
                }
                let retval = local.call(method, args, &self.registry).await?;
                local_return(method, retval, returns)
            }
            None => {
                let stub = self.registry.resolve(service)?;
                stub.invoke(method, &args, returns).await
            }
        }
    }
}

/// Either the hosted instance of `S` or a stub for it.
pub enum ServiceHandle<S> {
    Local {
        service: LocalService<S>,
        registry: Arc<Registry>,
    },
    Remote(Arc<RemoteStub>),
}

impl<S> Clone for ServiceHandle<S> {
    fn clone(&self) -> Self {
        match self {
            ServiceHandle::Local { service, registry } => ServiceHandle::Local {
                service: service.clone(),
                registry: Arc::clone(registry),
            },
            ServiceHandle::Remote(stub) => ServiceHandle::Remote(Arc::clone(stub)),
        }
    }
}

impl<S: Service> ServiceHandle<S> {
    pub fn is_local(&self) -> bool {
        matches!(self, ServiceHandle::Local { .. })
    }

    pub async fn call<A, R>(&self, method: &str, args: A) -> Result<R>
    where
        A: IntoArgs,
        R: Returnable,
    {
        let args = args.into_values();
        let returns = R::rpc_type();
        let retval = match self {
            ServiceHandle::Local { service, registry } => {
                let retval = service.call(method, args, registry).await?;
                local_return(method, retval, &returns)?
            }
            ServiceHandle::Remote(stub) => stub.invoke(method, &args, &returns).await?,
        };
        R::decode(retval).map_err(|mismatch| RpcError::InvalidResponse {
            method: method.to_owned(),
            reason: mismatch.to_string(),
        })
    }
}

/// Matches a locally produced value against the caller's expected return type, the way a
/// stub would convert the rendered text.
fn local_return(method: &str, retval: Value, returns: &Type) -> Result<Value> {
    if *returns == Type::Void {
        return Ok(Value::Void);
    }
    if retval.rpc_type() != *returns {
        return Err(RpcError::InvalidResponse {
            method: method.to_owned(),
            reason: format!("expected {returns}, got {}", retval.rpc_type()),
        });
    }
    Ok(retval)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Tally {
        count: i32,
    }

    impl Service for Tally {
        const NAME: &'static str = "Tally";

        fn dispatch_table() -> Result<DispatchTable<Self>> {
            let mut table = DispatchTable::new();
            table
                .method("bump", |tally: &mut Tally, (): ()| {
                    tally.count += 1;
                    Ok(tally.count)
                })?
                .method("label", |tally: &mut Tally, (): ()| {
                    Ok(format!("tally={}", tally.count))
                })?
                .method("report_to", |_: &mut Tally, (target,): (ServiceName,)| {
                    Ok(target.to_string())
                })?;
            Ok(table)
        }
    }

    fn locator() -> Locator {
        let registry = Registry::new();
        registry.register_service::<Tally>("localhost", 9100);
        Locator::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn hosted_service_is_called_in_process() {
        let locator = locator();
        locator.host(LocalService::new(Tally::default()).unwrap());

        let tally = locator.get::<Tally>().unwrap();
        assert!(tally.is_local());
        assert_eq!(tally.call::<_, i32>("bump", ()).await.unwrap(), 1);
        assert_eq!(tally.call::<_, i32>("bump", ()).await.unwrap(), 2);
        tally.call::<_, ()>("bump", ()).await.unwrap();
        assert_eq!(
            tally.call::<_, String>("label", ()).await.unwrap(),
            "tally=3"
        );
    }

    #[tokio::test]
    async fn local_return_type_must_match() {
        let locator = locator();
        locator.host(LocalService::new(Tally::default()).unwrap());
        let tally = locator.get::<Tally>().unwrap();
        assert!(matches!(
            tally.call::<_, String>("bump", ()).await,
            Err(RpcError::InvalidResponse { .. })
        ));
    }

    #[tokio::test]
    async fn invoke_by_name() {
        let locator = locator();
        locator.host(LocalService::new(Tally::default()).unwrap());
        assert_eq!(
            locator.invoke("Tally", "bump", vec![], &Type::Int).await.unwrap(),
            Value::Int(1)
        );
        assert!(matches!(
            locator.invoke("Tally", "bump", vec![], &Type::TypeRef).await,
            Err(RpcError::UnsupportedReturnType { .. })
        ));
        assert!(matches!(
            locator.invoke("Ghost", "bump", vec![], &Type::Int).await,
            Err(RpcError::UnregisteredService(_))
        ));
    }

    #[tokio::test]
    async fn local_type_references_resolve_like_remote_ones() {
        let locator = locator();
        locator.host(LocalService::new(Tally::default()).unwrap());
        let tally = locator.get::<Tally>().unwrap();

        let target: String = tally
            .call("report_to", (ServiceName::from("Tally"),))
            .await
            .unwrap();
        assert_eq!(target, "Tally");

        assert!(matches!(
            tally.call::<_, String>("report_to", (ServiceName::from("Ghost"),)).await,
            Err(RpcError::TypeResolutionFailed(name)) if name == "Ghost"
        ));
        assert!(matches!(
            locator
                .invoke("Tally", "report_to", vec![ServiceName::from("Ghost").into()], &Type::String)
                .await,
            Err(RpcError::TypeResolutionFailed(_))
        ));
    }

    #[test]
    fn unhosted_service_gets_cached_stub() {
        let locator = locator();
        let first = locator.get::<Tally>().unwrap();
        let second = locator.get::<Tally>().unwrap();
        match (first, second) {
            (ServiceHandle::Remote(a), ServiceHandle::Remote(b)) => {
                assert!(Arc::ptr_eq(&a, &b));
                assert_eq!(a.descriptor().port, 9100);
            }
            _ => panic!("expected remote handles"),
        }
        assert!(!locator.is_hosted("Tally"));
    }

    #[test]
    fn unregistered_service_is_an_error() {
        let locator = Locator::new(Arc::new(Registry::new()));
        assert!(matches!(
            locator.get::<Tally>(),
            Err(RpcError::UnregisteredService(_))
        ));
    }
}
