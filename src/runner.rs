use crate::{
    config::DEFAULT_PORT,
    deploy::{ClusterDeployer, DeployError, Deployment, ImageBuilder, Packager, ServiceDeployer},
    error::{Result, RpcError},
    locator::Locator,
    net::server::DispatchServer,
    registry::Registry,
    types::ServiceName,
    Service,
};
use futures::future::BoxFuture;
use std::{collections::BTreeMap, convert::Infallible, marker::PhantomData, sync::Arc};
use tracing::info;

/// The entry point of a process that hosts one of a known set of services.
///
/// Every service is registered up front with a factory. A process then either serves one of
/// them by name, or deploys all of them.
pub struct ServiceRunner {
    locator: Locator,
    factories: BTreeMap<ServiceName, Box<dyn ServiceFactory>>,
}

impl ServiceRunner {
    pub fn new(registry: Registry) -> Self {
        Self::with_registry(Arc::new(registry))
    }

    pub fn with_registry(registry: Arc<Registry>) -> Self {
        Self {
            locator: Locator::new(registry),
            factories: BTreeMap::new(),
        }
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.locator.registry()
    }

    /// Registers `S` at host `S::NAME` in lower case, on the default port.
    pub fn register<S, F>(&mut self, make: F) -> &mut Self
    where
        S: Service,
        F: FnOnce(Locator) -> S + Send + 'static,
    {
        self.register_at(S::NAME.to_lowercase(), DEFAULT_PORT, make)
    }

    pub fn register_at<S, F>(&mut self, host: impl Into<String>, port: u16, make: F) -> &mut Self
    where
        S: Service,
        F: FnOnce(Locator) -> S + Send + 'static,
    {
        self.registry().register_service::<S>(host, port);
        self.provide(make)
    }

    /// Adds a factory for `S` without touching the registry, for when locations come from
    /// configuration.
    pub fn provide<S, F>(&mut self, make: F) -> &mut Self
    where
        S: Service,
        F: FnOnce(Locator) -> S + Send + 'static,
    {
        let factory = Factory {
            make,
            _service: PhantomData::<fn() -> S>,
        };
        self.factories.insert(S::NAME.into(), Box::new(factory));
        self
    }

    /// Builds the named service and serves it until the process exits.
    pub async fn serve(mut self, service: &str) -> Result<Infallible> {
        let factory = self
            .factories
            .remove(service)
            .ok_or_else(|| RpcError::UnregisteredService(service.into()))?;
        info!(service, "starting");
        factory.serve(self.locator).await
    }

    pub async fn deploy<P, B, D>(
        &self,
        deployer: &ServiceDeployer<P, B, D>,
    ) -> Result<Vec<Deployment>, DeployError>
    where
        P: Packager,
        B: ImageBuilder,
        D: ClusterDeployer,
    {
        deployer.deploy_all(self.registry()).await
    }
}

trait ServiceFactory: Send {
    fn serve(self: Box<Self>, locator: Locator) -> BoxFuture<'static, Result<Infallible>>;
}

struct Factory<S, F> {
    make: F,
    _service: PhantomData<fn() -> S>,
}

impl<S, F> ServiceFactory for Factory<S, F>
where
    S: Service,
    F: FnOnce(Locator) -> S + Send + 'static,
{
    fn serve(self: Box<Self>, locator: Locator) -> BoxFuture<'static, Result<Infallible>> {
        let instance = (self.make)(locator.clone());
        Box::pin(async move { DispatchServer::new(locator, instance)?.run().await })
    }
}
