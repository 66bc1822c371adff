//! Server role: accept TLS connections, run the HTTP/2 handshake on each, and
//! dispatch every fully-arrived [`IncomingRequest`] to an application
//! [`Handler`]. Grounded on the teacher's `client.rs` (the only
//! application-facing wrapper the teacher has) for the "build a config,
//! expose one entry point" shape, and on `other_examples`' `dpc-astra`
//! `Server`/`Service` pair (`bind` builder + a trait applications implement,
//! blanket-impl'd for plain closures) for the accept-loop API itself, since
//! the teacher never had a server role to generalize from.

use crate::config::Config;
use crate::connection::{Connection, IncomingRequest, Role};
use crate::types::Headers;
use bytes::Bytes;
use log::{error, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// Answers one accepted request with response headers (including `:status`)
/// and a body. Implemented for any `Fn(&IncomingRequest) -> (Headers, Bytes)`
/// closure so simple handlers don't need a named type.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, request: &IncomingRequest) -> (Headers, Bytes);
}

impl<F> Handler for F
where
    F: Fn(&IncomingRequest) -> (Headers, Bytes) + Send + Sync + 'static,
{
    fn call(&self, request: &IncomingRequest) -> (Headers, Bytes) {
        (self)(request)
    }
}

/// A bound listener plus the TLS/connection configuration every accepted
/// connection is handed. One `Connection` (and its reader/writer task pair,
/// see `connection.rs`) is spawned per accepted stream.
pub struct Server {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    config: Config,
}

impl Server {
    /// Binds `addr` and pairs it with an already-built `TlsAcceptor` (ALPN
    /// negotiation of `h2` is the caller's `rustls::ServerConfig`'s
    /// responsibility, mirroring `tls.rs`'s client-side split of concerns).
    pub async fn bind(addr: SocketAddr, acceptor: TlsAcceptor, config: Config) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, acceptor, config })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever, handing each a clone of `handler`.
    /// Returns only if accepting itself fails; a single connection's errors
    /// (bad handshake, protocol violation) are logged and do not stop the
    /// loop.
    pub async fn serve<H: Handler>(self, handler: H) -> anyhow::Result<()> {
        let handler = Arc::new(handler);
        loop {
            let (tcp, peer) = self.listener.accept().await?;
            tcp.set_nodelay(true).ok();
            let acceptor = self.acceptor.clone();
            let config = self.config.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                if let Err(err) = serve_one(tcp, acceptor, config, handler).await {
                    warn!("connection from {peer} ended with an error: {err:#}");
                }
            });
        }
    }
}

async fn serve_one<H: Handler>(
    tcp: tokio::net::TcpStream,
    acceptor: TlsAcceptor,
    config: Config,
    handler: Arc<H>,
) -> anyhow::Result<()> {
    let tls = acceptor.accept(tcp).await?;
    let (_, session) = tls.get_ref();
    if session.alpn_protocol() != Some(b"h2") {
        anyhow::bail!("peer did not negotiate h2 over ALPN");
    }

    let (connection, mut driver) = Connection::establish(tls, Role::Server, config).await?;
    while let Some(request) = driver.incoming.recv().await {
        let connection = connection.clone();
        let handler = handler.clone();
        tokio::spawn(async move {
            let (headers, body) = handler.call(&request);
            if let Err(err) = connection.respond(request.stream_id, headers, body).await {
                error!("failed to send response on stream {}: {err}", request.stream_id);
            }
        });
    }
    driver.closed().await;
    Ok(())
}
