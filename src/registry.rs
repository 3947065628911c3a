//! Where each service lives.
//!
//! The [`Registry`] is the single source of truth for service locations. One is built at
//! process start and shared by `Arc` with everything that needs it.

use crate::{
    config::RegistryConfig,
    error::{Result, RpcError},
    net::client::RemoteStub,
    types::ServiceName,
    Service,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tracing::{debug, info};

/// The network binding recorded for a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub service: ServiceName,
    pub host: String,
    pub port: u16,
}

impl fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} at {}:{}", self.service, self.host, self.port)
    }
}

/// Maps service names to their descriptors, and memoizes one [`RemoteStub`] per service.
///
/// Registering a service again replaces its descriptor without complaint. A stub, once built,
/// is never rebuilt, so re-registering after the first [`resolve`](Registry::resolve) does not
/// redirect calls.
#[derive(Default)]
pub struct Registry {
    descriptors: DashMap<ServiceName, ServiceDescriptor>,
    stubs: DashMap<ServiceName, Arc<RemoteStub>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        let registry = Self::new();
        config.apply(&registry);
        registry
    }

    pub fn register(&self, service: impl Into<ServiceName>, host: impl Into<String>, port: u16) {
        let service = service.into();
        let descriptor = ServiceDescriptor {
            service: service.clone(),
            host: host.into(),
            port,
        };
        info!(%service, host = %descriptor.host, port, "registering service");
        self.descriptors.insert(service, descriptor);
    }

    pub fn register_service<S: Service>(&self, host: impl Into<String>, port: u16) {
        self.register(S::NAME, host, port);
    }

    pub fn lookup_descriptor(&self, service: &str) -> Result<ServiceDescriptor> {
        self.descriptors
            .get(service)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RpcError::UnregisteredService(service.into()))
    }

    pub fn contains(&self, service: &str) -> bool {
        self.descriptors.contains_key(service)
    }

    /// The registered name matching `name`, if any.
    pub fn resolve_type(&self, name: &str) -> Option<ServiceName> {
        self.descriptors.get(name).map(|entry| entry.key().clone())
    }

    /// Returns the stub for `service`, building and caching it on first use.
    pub fn resolve(&self, service: &str) -> Result<Arc<RemoteStub>> {
        if let Some(stub) = self.stubs.get(service) {
            let descriptor = stub.descriptor();
            debug!(service, host = %descriptor.host, port = descriptor.port, "reusing remote stub");
            return Ok(Arc::clone(stub.value()));
        }

        let descriptor = self.lookup_descriptor(service)?;
        debug!(service, host = %descriptor.host, port = descriptor.port, "building remote stub");
        let key = descriptor.service.clone();
        let stub = Arc::new(RemoteStub::new(descriptor));

        // Two first calls may race here; whichever inserts first is kept.
        let cached = self.stubs.entry(key).or_insert(stub);
        Ok(Arc::clone(cached.value()))
    }

    /// Every registered descriptor, ordered by service name.
    pub fn descriptors(&self) -> Vec<ServiceDescriptor> {
        let mut descriptors: Vec<_> = self
            .descriptors
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        descriptors.sort_by(|a, b| a.service.cmp(&b.service));
        descriptors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_registration_wins() {
        let registry = Registry::new();
        registry.register("Echo", "localhost", 9001);
        registry.register("Echo", "echo.internal", 80);

        let descriptor = registry.lookup_descriptor("Echo").unwrap();
        assert_eq!(descriptor.host, "echo.internal");
        assert_eq!(descriptor.port, 80);
        assert_eq!(registry.descriptors().len(), 1);
    }

    #[test]
    fn unknown_service_is_unregistered() {
        let registry = Registry::new();
        assert!(matches!(
            registry.lookup_descriptor("Nope"),
            Err(RpcError::UnregisteredService(name)) if name.as_str() == "Nope"
        ));
        assert!(matches!(
            registry.resolve("Nope"),
            Err(RpcError::UnregisteredService(_))
        ));
        assert!(registry.resolve_type("Nope").is_none());
    }

    #[test]
    fn resolve_is_memoized() {
        let registry = Registry::new();
        registry.register("Echo", "localhost", 9001);

        let first = registry.resolve("Echo").unwrap();
        let second = registry.resolve("Echo").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.descriptor().port, 9001);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn every_resolve_is_traced_with_its_address() {
        let registry = Registry::new();
        registry.register("Echo", "localhost", 9001);

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            registry.resolve("Echo").unwrap();
            registry.resolve("Echo").unwrap();
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 2, "{output}");
        assert!(lines[0].contains("building remote stub"));
        assert!(lines[1].contains("reusing remote stub"));
        assert!(lines
            .iter()
            .all(|line| line.contains("Echo") && line.contains("localhost") && line.contains("9001")));
    }

    #[test]
    fn cached_stub_survives_reregistration() {
        let registry = Registry::new();
        registry.register("Echo", "localhost", 9001);
        let stub = registry.resolve("Echo").unwrap();

        registry.register("Echo", "localhost", 9002);
        assert_eq!(registry.lookup_descriptor("Echo").unwrap().port, 9002);
        assert!(Arc::ptr_eq(&stub, &registry.resolve("Echo").unwrap()));
        assert_eq!(registry.resolve("Echo").unwrap().descriptor().port, 9001);
    }

    #[test]
    fn descriptors_are_sorted_by_name() {
        let registry = Registry::new();
        registry.register("PiService", "pi", 80);
        registry.register("CollectorService", "collector", 80);

        let names: Vec<_> = registry
            .descriptors()
            .into_iter()
            .map(|d| d.service.to_string())
            .collect();
        assert_eq!(names, ["CollectorService", "PiService"]);
    }
}
