use crate::types::{ServiceName, Type};
use std::io;
use thiserror::Error;

pub type Result<T, E = RpcError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("no service registered as {0}")]
    UnregisteredService(ServiceName),

    #[error("could not connect to {service} at {host}:{port}")]
    ServiceUnreachable {
        service: ServiceName,
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("malformed invocation: {0}")]
    MalformedInvocation(String),

    #[error("{service} has no method {method}")]
    MethodNotFound { service: ServiceName, method: String },

    #[error("{service}#{method} is not public")]
    MethodNotPublic { service: ServiceName, method: String },

    #[error("{method} takes {expected} arguments, but received {received}")]
    ArgumentCountMismatch {
        method: String,
        expected: usize,
        received: usize,
    },

    #[error("{method} parameter {index} has unsupported type {typ}")]
    UnsupportedArgumentType {
        method: String,
        index: usize,
        typ: Type,
    },

    #[error("{method} has unsupported return type {typ}")]
    UnsupportedReturnType { method: String, typ: Type },

    #[error("did not find a service matching {0:?}")]
    TypeResolutionFailed(String),

    #[error("{method} received an invalid argument: {reason}")]
    InvalidArgument { method: String, reason: String },

    #[error("invalid response to {method}: {reason}")]
    InvalidResponse { method: String, reason: String },

    #[error("{method} failed: {source}")]
    HandlerInvocationFailed {
        method: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("connection to {service} dropped before a response was read")]
    ResponseAborted {
        service: ServiceName,
        #[source]
        source: io::Error,
    },

    #[error("{service} declares {method} more than once")]
    DuplicateMethod { service: ServiceName, method: String },

    #[error("could not bind port {port}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}
