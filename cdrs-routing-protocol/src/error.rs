use derive_more::Display;
use std::io;
use std::net::SocketAddr;
use std::result;
use thiserror::Error as ThisError;

pub type Result<T> = result::Result<T, Error>;

/// Classification of a failure reported by a node. The routing core only needs enough detail
/// to decide whether retrying (on the same or another node) is worth it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Display)]
pub enum ServerErrorKind {
    Overloaded,
    IsBootstrapping,
    Unavailable,
    ReadTimeout,
    WriteTimeout,
    Truncate,
    ServerError,
    Syntax,
    Invalid,
    Other,
}

/// CDRS routing error type. Failures either originate in the transport (I/O, node-reported
/// errors) or in the routing core itself (exhausted plans, timeouts, bad configuration).
#[derive(Debug, ThisError)]
pub enum Error {
    /// Internal IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// General error
    #[error("General error: {0}")]
    General(String),
    /// Error reported by a node.
    #[error("Server {addr} error ({kind}): {message}")]
    Server {
        addr: SocketAddr,
        kind: ServerErrorKind,
        message: String,
    },
    /// Timed out waiting for an operation to complete.
    #[error("Timeout: {0}")]
    Timeout(String),
    /// The query plan was exhausted without any node to send the request to.
    #[error("No host available: {0}")]
    NoHostAvailable(String),
    /// A single attempt against a given node failed.
    #[error("Attempt against {addr} failed: {source}")]
    AttemptFailed {
        addr: SocketAddr,
        #[source]
        source: Box<Error>,
    },
    /// Invalid driver configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// A connection did not see any successful heartbeat within its idle timeout.
    #[error("Heartbeat timeout on connection to: {0}")]
    HeartbeatTimeout(SocketAddr),
    /// The operation was abandoned by the driver.
    #[error("Operation cancelled")]
    Cancelled,
    /// Unknown consistency.
    #[error("Unknown consistency: {0}")]
    UnknownConsistency(i16),
    /// Invalid format found for given keyspace replication strategy.
    #[error("Invalid replication format for: {keyspace}")]
    InvalidReplicationFormat { keyspace: String },
}

impl Error {
    /// Wraps an error as a failure of an attempt against given node. Already wrapped errors are
    /// left alone.
    pub fn attempt_failed(addr: SocketAddr, error: Error) -> Error {
        match error {
            error @ Error::AttemptFailed { .. } => error,
            error => Error::AttemptFailed {
                addr,
                source: Box::new(error),
            },
        }
    }

    /// Returns the innermost cause of an attempt failure.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::AttemptFailed { source, .. } => source.root_cause(),
            error => error,
        }
    }

    /// Checks if the error was reported by a node which actually answered, as opposed to a
    /// failure to reach it.
    pub fn is_node_response(&self) -> bool {
        matches!(self.root_cause(), Error::Server { .. })
    }
}

impl From<String> for Error {
    fn from(err: String) -> Error {
        Error::General(err)
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Error {
        Error::General(err.to_string())
    }
}

impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Error::Io(error) => Error::Io(io::Error::new(
                error.kind(),
                error
                    .get_ref()
                    .map(|error| error.to_string())
                    .unwrap_or_default(),
            )),
            Error::General(error) => Error::General(error.clone()),
            Error::Server {
                addr,
                kind,
                message,
            } => Error::Server {
                addr: *addr,
                kind: *kind,
                message: message.clone(),
            },
            Error::Timeout(error) => Error::Timeout(error.clone()),
            Error::NoHostAvailable(error) => Error::NoHostAvailable(error.clone()),
            Error::AttemptFailed { addr, source } => Error::AttemptFailed {
                addr: *addr,
                source: source.clone(),
            },
            Error::Configuration(error) => Error::Configuration(error.clone()),
            Error::HeartbeatTimeout(addr) => Error::HeartbeatTimeout(*addr),
            Error::Cancelled => Error::Cancelled,
            Error::UnknownConsistency(value) => Error::UnknownConsistency(*value),
            Error::InvalidReplicationFormat { keyspace } => Error::InvalidReplicationFormat {
                keyspace: keyspace.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 9042)
    }

    #[test]
    fn should_not_double_wrap_attempt_failures() {
        let error = Error::attempt_failed(addr(), Error::General("boom".into()));
        let error = Error::attempt_failed(addr(), error);

        match error {
            Error::AttemptFailed { source, .. } => {
                assert!(matches!(*source, Error::General(_)))
            }
            error => panic!("Unexpected error: {error}"),
        }
    }

    #[test]
    fn should_find_root_cause() {
        let error = Error::attempt_failed(
            addr(),
            Error::Server {
                addr: addr(),
                kind: ServerErrorKind::Overloaded,
                message: "busy".into(),
            },
        );

        assert!(error.is_node_response());
        assert!(!Error::Io(io::ErrorKind::BrokenPipe.into()).is_node_response());
    }

    #[test]
    fn should_clone_io_errors() {
        let error = Error::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        match error.clone() {
            Error::Io(error) => {
                assert_eq!(error.kind(), io::ErrorKind::ConnectionReset);
                assert_eq!(error.to_string(), "reset");
            }
            error => panic!("Unexpected error: {error}"),
        }
    }
}
