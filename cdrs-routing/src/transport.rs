//! This module contains a declaration of the `CdrsTransport` trait, which is the boundary between
//! the routing core and the protocol layer.
//!
//! A transport is a single established, ready to use connection to a node. Requests and
//! responses cross this boundary as opaque, already encoded bytes - the routing core never
//! looks inside them. Implementations are expected to multiplex concurrent requests over the
//! connection, so one transport can serve many attempts at once.
use bytes::Bytes;
use std::net::SocketAddr;

use crate::future::BoxFuture;
use crate::Result;

/// General CDRS transport trait.
pub trait CdrsTransport: Send + Sync {
    /// Schedules encoded request for writing and waits for the encoded response. Node-side
    /// failures are reported as [`Error::Server`](crate::Error::Server), everything else as
    /// transport errors.
    fn write_request<'a>(&'a self, request: &'a Bytes) -> BoxFuture<'a, Result<Bytes>>;

    /// Sends a lightweight liveness probe (e.g. an `OPTIONS` request) and waits for the answer.
    fn send_heartbeat(&self) -> BoxFuture<'_, Result<()>>;

    /// Checks if the connection is broken (e.g. after read or write errors, or after it has been
    /// closed).
    fn is_broken(&self) -> bool;

    /// Closes the connection. Pending and future requests fail; `is_broken()` returns `true`
    /// afterwards.
    fn close(&self);

    /// Returns associated node address
    fn address(&self) -> SocketAddr;
}
