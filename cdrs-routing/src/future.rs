/// Boxed, sendable future returned by the transport and connection manager traits, which need
/// to stay object safe.
pub type BoxFuture<'a, T> = futures::future::BoxFuture<'a, T>;
