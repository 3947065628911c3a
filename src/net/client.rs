use crate::{
    codec,
    error::{Result, RpcError},
    registry::ServiceDescriptor,
    types::{ServiceName, Type, Value},
};
use std::io;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, BufStream},
    net::TcpStream,
};
use tracing::debug;

/// Forwards calls to a service's dispatch server, one connection per call.
///
/// There is no pooling and no retry: a call that cannot connect fails with
/// [`RpcError::ServiceUnreachable`] and the caller decides what to do next.
#[derive(Debug)]
pub struct RemoteStub {
    descriptor: ServiceDescriptor,
}

impl RemoteStub {
    pub fn new(descriptor: ServiceDescriptor) -> Self {
        Self { descriptor }
    }

    pub fn service(&self) -> &ServiceName {
        &self.descriptor.service
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    async fn connect(&self) -> Result<BufStream<TcpStream>> {
        let ServiceDescriptor {
            service,
            host,
            port,
        } = &self.descriptor;
        let sock = TcpStream::connect((host.as_str(), *port))
            .await
            .map_err(|source| RpcError::ServiceUnreachable {
                service: service.clone(),
                host: host.clone(),
                port: *port,
                source,
            })?;
        Ok(BufStream::new(sock))
    }

    /// Calls `method` remotely and converts the response text to `returns`.
    ///
    /// `returns` must be `Void`, `String` or `Int`; anything else fails before connecting.
    pub async fn invoke(&self, method: &str, args: &[Value], returns: &Type) -> Result<Value> {
        if !returns.is_return() {
            return Err(RpcError::UnsupportedReturnType {
                method: method.to_owned(),
                typ: returns.clone(),
            });
        }

        let mut sock = self.connect().await?;
        debug!(service = %self.service(), method, "calling remote method");
        sock.write_all(codec::encode(method, args).as_bytes()).await?;
        sock.flush().await?;

        let mut response = String::new();
        sock.read_to_string(&mut response)
            .await
            .map_err(|source| match source.kind() {
                io::ErrorKind::InvalidData => RpcError::InvalidResponse {
                    method: method.to_owned(),
                    reason: source.to_string(),
                },
                _ => RpcError::ResponseAborted {
                    service: self.service().clone(),
                    source,
                },
            })?;
        debug!(service = %self.service(), method, bytes = response.len(), "received response");

        Value::parse(&response, returns).map_err(|e| RpcError::InvalidResponse {
            method: method.to_owned(),
            reason: e.to_string(),
        })
    }
}
