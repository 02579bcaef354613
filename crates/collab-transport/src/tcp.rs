//! Default TCP transport wiring a [`TcpStream`] into a [`Multiplexer`].
//! Grounded in `spark-transport-tcp::listener`'s bind/accept shape,
//! simplified since this multiplexer has no deadline/cancellation
//! context of its own at this layer — cancellation is handled by
//! dropping the returned connection.

use crate::connection::Multiplexer;
use collab_core::dispatch::ServiceRegistry;
use collab_core::error::{CoreError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};

/// Listens for inbound connections and spawns a [`Multiplexer`] for each
/// one, serving `registry` on it.
pub struct TcpListener {
    inner: TokioTcpListener,
}

impl TcpListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let inner = TokioTcpListener::bind(addr).await.map_err(CoreError::store)?;
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr().map_err(CoreError::store)
    }

    /// Accepts one inbound connection and spawns a [`Multiplexer`] over
    /// it, serving `registry`.
    pub async fn accept(&self, service: impl Into<String>, registry: Arc<ServiceRegistry>) -> Result<(Arc<Multiplexer>, SocketAddr)> {
        let (stream, peer) = self.inner.accept().await.map_err(CoreError::store)?;
        stream.set_nodelay(true).map_err(CoreError::store)?;
        let mux = Multiplexer::spawn(stream, service, Some(registry));
        Ok((mux, peer))
    }
}

/// Connects to a remote service's listener and returns a client-role
/// [`Multiplexer`] (serves no registry of its own).
pub async fn connect(addr: SocketAddr, service: impl Into<String>) -> Result<Arc<Multiplexer>> {
    let stream = TcpStream::connect(addr).await.map_err(CoreError::store)?;
    stream.set_nodelay(true).map_err(CoreError::store)?;
    Ok(Multiplexer::spawn(stream, service, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use collab_core::dispatch::value_handler;
    use collab_core::dispatch::Reply;
    use serde_json::Value;

    #[tokio::test]
    async fn client_connects_and_round_trips_a_request() {
        let registry = Arc::new(ServiceRegistry::new("content"));
        registry
            .register("ping", value_handler(|_args| async { Ok(Value::from("pong")) }))
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let _ = listener.accept("content", registry).await.unwrap();
        });

        let client = connect(addr, "content").await.unwrap();
        let reply = client.request("ping", vec![]).await.unwrap();
        match reply {
            Reply::Value(v) => assert_eq!(v, Value::from("pong")),
            Reply::Stream(_) => panic!("expected a value reply"),
        }
    }
}
