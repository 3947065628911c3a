//! Stateful services that call each other as if they were local.
//!
//! A process registers where every service lives in a [`Registry`], hosts at most a few of
//! them behind a [`DispatchServer`], and reaches the rest through a [`Locator`], which hands
//! out either the local instance or a [`RemoteStub`] that ships each call over TCP.

pub mod codec;
pub mod config;
pub mod deploy;
pub mod dispatcher;
pub mod error;
pub mod locator;
mod macros;
pub mod net;
pub mod registry;
pub mod runner;
pub mod types;

pub use dispatcher::{DispatchTable, MethodInfo, Signature};
pub use error::{Result, RpcError};
pub use futures::future::BoxFuture;
pub use locator::{LocalService, Locator, ServiceHandle};
pub use net::{BoundServer, DispatchServer, RemoteStub};
pub use registry::{Registry, ServiceDescriptor};
pub use runner::ServiceRunner;
pub use types::{ServiceName, Type, Value};

/// A stateful unit with a public method interface, hosted by exactly one process at a time.
pub trait Service: Sized + Send + 'static {
    /// The service's identity in the registry and on the wire.
    const NAME: &'static str;

    /// The methods callers may invoke. Built once per hosted instance.
    fn dispatch_table() -> Result<DispatchTable<Self>>;
}
