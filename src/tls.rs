//! Async TLS bootstrap: ALPN-negotiated `h2` over a `tokio_rustls` client
//! connection. Grounded on the teacher's `client.rs` (root store + ALPN
//! protocol list construction) and `socket.rs` (the synchronous
//! `rustls::ClientConnection` driver this replaces), rearchitected onto
//! `tokio_rustls::TlsConnector` so the connection manager's reader/writer
//! tasks (`connection.rs`) get a plain `AsyncRead + AsyncWrite` transport
//! without any manual `wants_read`/`wants_write` polling loop.

use anyhow::{anyhow, bail};
use rustls::{OwnedTrustAnchor, RootCertStore, ServerName};
use std::convert::TryFrom;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};

/// Builds the shared `rustls::ClientConfig` this endpoint presents: the
/// Mozilla root set (`webpki-roots`, as the teacher's `Client::default` does)
/// and `h2` as the sole ALPN protocol offered, since this crate never speaks
/// HTTP/1.1.
pub fn client_config() -> Arc<rustls::ClientConfig> {
    let mut root_store = RootCertStore::empty();
    root_store.add_server_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.0.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(ta.subject, ta.spki, ta.name_constraints)
    }));
    let mut config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"h2".to_vec()];
    Arc::new(config)
}

/// Connects to `host:port`, completes the TLS handshake, and confirms the
/// peer actually agreed to speak `h2` over ALPN (spec §2.1's negotiation
/// requirement; a peer that only offers `http/1.1` is not a peer this crate
/// can talk to).
pub async fn connect(host: &str, port: u16, config: Arc<rustls::ClientConfig>) -> anyhow::Result<TlsStream<TcpStream>> {
    let tcp = TcpStream::connect((host, port)).await?;
    tcp.set_nodelay(true)?;
    let server_name = ServerName::try_from(host).map_err(|_| anyhow!("invalid DNS name: {host}"))?;
    let connector = TlsConnector::from(config);
    let tls = connector.connect(server_name, tcp).await?;

    let alpn = tls.get_ref().1.alpn_protocol();
    if alpn != Some(b"h2") {
        bail!("peer did not negotiate h2 over ALPN (got {:?})", alpn.map(String::from_utf8_lossy));
    }
    Ok(tls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_offers_only_h2() {
        let config = client_config();
        assert_eq!(config.alpn_protocols, vec![b"h2".to_vec()]);
    }
}
