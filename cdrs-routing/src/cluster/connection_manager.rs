use std::net::SocketAddr;
use tokio::sync::mpsc::Sender;

use crate::error::{Error, Result};
use crate::future::BoxFuture;
use crate::transport::CdrsTransport;

/// Manages establishing connections to nodes. Connection setup (TCP/TLS, protocol handshake,
/// authentication) happens entirely behind this trait.
pub trait ConnectionManager<T: CdrsTransport>: Send + Sync {
    /// Tries to establish a new, ready to use connection. Once established, the connection
    /// should report fatal errors (e.g. broken socket) to the optional error handler, which
    /// triggers reconnection of the owning pool.
    fn connection(
        &self,
        error_handler: Option<Sender<Error>>,
        addr: SocketAddr,
    ) -> BoxFuture<'_, Result<T>>;
}
