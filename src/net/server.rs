use crate::{
    codec,
    error::{Result, RpcError},
    locator::{LocalService, Locator},
    Service,
};
use std::{
    convert::Infallible,
    io,
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};
use tokio::{
    io::{AsyncWriteExt, BufStream},
    net::{TcpListener, TcpStream},
};
use tracing::{debug, info, warn};

/// Serves one service instance over TCP.
///
/// Connections are handled strictly one after another: the next connection is not accepted
/// until the current one has been answered and closed. This is what keeps calls against the
/// instance totally ordered.
pub struct DispatchServer<S: Service> {
    locator: Locator,
    local: LocalService<S>,
}

impl<S: Service> DispatchServer<S> {
    /// Takes ownership of `instance` and marks `S` as hosted by this process in `locator`.
    pub fn new(locator: Locator, instance: S) -> Result<Self> {
        let local = LocalService::new(instance)?;
        locator.host(local.clone());
        Ok(Self { locator, local })
    }

    pub fn local(&self) -> &LocalService<S> {
        &self.local
    }

    /// Binds the port registered for `S` on all interfaces.
    pub async fn bind(self) -> Result<BoundServer<S>> {
        let descriptor = self.locator.registry().lookup_descriptor(S::NAME)?;
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, descriptor.port))
            .await
            .map_err(|source| RpcError::Bind {
                port: descriptor.port,
                source,
            })?;
        info!(
            service = S::NAME,
            addr = %listener.local_addr()?,
            methods = self.local.table().methods().len(),
            "serving"
        );
        Ok(BoundServer {
            listener,
            locator: self.locator,
            local: self.local,
        })
    }

    /// Binds and serves forever. Only a bind failure returns.
    pub async fn run(self) -> Result<Infallible> {
        Ok(self.bind().await?.serve().await)
    }
}

pub struct BoundServer<S: Service> {
    listener: TcpListener,
    locator: Locator,
    local: LocalService<S>,
}

impl<S: Service> BoundServer<S> {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn serve(self) -> Infallible {
        loop {
            let (sock, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(service = S::NAME, error = %e, "accept failed");
                    continue;
                }
            };
            if let Err(e) = self.handle_connection(sock).await {
                warn!(service = S::NAME, %peer, error = %e, "dropped connection without a response");
            }
        }
    }

    async fn handle_connection(&self, sock: TcpStream) -> Result<()> {
        let mut sock = BufStream::new(sock);
        match self.respond(&mut sock).await {
            Ok(()) => {
                sock.shutdown().await?;
                Ok(())
            }
            Err(e) => {
                // Reset instead of a clean close, so the caller's read fails rather than
                // seeing an empty response.
                #[allow(deprecated)]
                let reset = sock.get_ref().set_linger(Some(Duration::ZERO));
                if let Err(linger) = reset {
                    warn!(service = S::NAME, error = %linger, "could not reset connection");
                }
                Err(e)
            }
        }
    }

    async fn respond(&self, sock: &mut BufStream<TcpStream>) -> Result<()> {
        let invocation = codec::decode(sock).await?;
        debug!(
            service = S::NAME,
            method = %invocation.method,
            args = ?invocation.args,
            "got invocation"
        );

        let retval = {
            let mut instance = self.local.instance().lock().await;
            self.local
                .table()
                .dispatch(&mut *instance, invocation, self.locator.registry())
                .await?
        };

        let output = retval.render();
        sock.write_all(output.as_bytes()).await?;
        sock.flush().await?;
        debug!(service = S::NAME, bytes = output.len(), "sent response");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dispatcher::DispatchTable, registry::Registry, RpcError};
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;

    struct Ping;

    impl Service for Ping {
        const NAME: &'static str = "Ping";

        fn dispatch_table() -> Result<DispatchTable<Self>> {
            let mut table = DispatchTable::new();
            table.method("ping", |_: &mut Ping, (): ()| Ok("pong".to_owned()))?;
            Ok(table)
        }
    }

    async fn bound() -> BoundServer<Ping> {
        let registry = Arc::new(Registry::new());
        registry.register_service::<Ping>("127.0.0.1", 0);
        DispatchServer::new(Locator::new(registry), Ping)
            .unwrap()
            .bind()
            .await
            .unwrap()
    }

    async fn exchange(server: &BoundServer<Ping>, request: &[u8]) -> (Result<()>, Vec<u8>) {
        let mut client = TcpStream::connect(server.local_addr().unwrap()).await.unwrap();
        client.write_all(request).await.unwrap();
        let (sock, _) = server.listener.accept().await.unwrap();

        let handled = server.handle_connection(sock).await;
        let mut response = Vec::new();
        let _ = client.read_to_end(&mut response).await;
        (handled, response)
    }

    #[tokio::test]
    async fn answers_and_closes() {
        let server = bound().await;
        let (handled, response) = exchange(&server, b"ping\n$\n").await;
        handled.unwrap();
        assert_eq!(response, b"pong");
    }

    #[tokio::test]
    async fn failed_dispatch_reports_its_own_error() {
        let server = bound().await;

        let (handled, response) = exchange(&server, b"pong\n$\n").await;
        assert!(
            matches!(&handled, Err(RpcError::MethodNotFound { method, .. }) if method == "pong"),
            "{handled:?}"
        );
        assert!(response.is_empty());

        let (handled, response) = exchange(&server, b"ping\nextra\n$\n").await;
        assert!(matches!(
            handled,
            Err(RpcError::ArgumentCountMismatch { expected: 0, received: 1, .. })
        ));
        assert!(response.is_empty());
    }
}
