//! Shared test plumbing: an in-process client/server connection pair wired
//! over `tokio::io::duplex` instead of a live socket, per the project's test
//! tooling choice (`connection.rs`'s own tests use the same pattern one layer
//! down, over `io::FramedReader`/`FramedWriter`).

use http2::{Config, Connection, ConnectionDriver, Role};

pub async fn connection_pair(config: Config) -> ((Connection, ConnectionDriver), (Connection, ConnectionDriver)) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client, server) = tokio::try_join!(
        Connection::establish(client_io, Role::Client, config.clone()),
        Connection::establish(server_io, Role::Server, config),
    )
    .expect("handshake over the duplex pipe should always succeed");
    (client, server)
}
