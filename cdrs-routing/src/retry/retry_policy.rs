use derive_more::Display;

use crate::error::{Error, ServerErrorKind};

#[derive(Debug, PartialEq, Eq, Ord, PartialOrd, Hash, Copy, Clone, Display)]
pub enum RetryDecision {
    RetrySameNode,
    RetryNextNode,
    DontRetry,
}

/// Information about a failed attempt.
pub struct QueryInfo<'a> {
    pub error: &'a Error,
    pub is_idempotent: bool,
}

/// Query-specific information about current state of retrying.
pub trait RetrySession {
    /// Decide what to do with the failing query.
    fn decide(&mut self, query_info: QueryInfo) -> RetryDecision;
}

/// Retry policy determines what to do in case of communication error.
pub trait RetryPolicy {
    /// Called for each new query execution, starts a session of deciding about retries.
    /// Speculative executions of the same query get separate sessions.
    fn new_session(&self) -> Box<dyn RetrySession + Send + Sync>;
}

/// Forwards all errors directly to the user, never retries
#[derive(Default, Debug, Clone, Copy)]
pub struct FallthroughRetryPolicy;

impl RetryPolicy for FallthroughRetryPolicy {
    fn new_session(&self) -> Box<dyn RetrySession + Send + Sync> {
        Box::new(FallthroughRetrySession)
    }
}

#[derive(Default)]
pub struct FallthroughRetrySession;

impl RetrySession for FallthroughRetrySession {
    fn decide(&mut self, _query_info: QueryInfo) -> RetryDecision {
        RetryDecision::DontRetry
    }
}

/// Default retry policy - retries when there is a high chance that a retry might help.
/// Requests which might have been applied by a node are moved to another node only when
/// idempotent.
#[derive(Default, Debug, Clone, Copy)]
pub struct DefaultRetryPolicy;

impl RetryPolicy for DefaultRetryPolicy {
    fn new_session(&self) -> Box<dyn RetrySession + Send + Sync> {
        Box::new(DefaultRetrySession::default())
    }
}

#[derive(Default)]
pub struct DefaultRetrySession {
    was_unavailable_retry: bool,
    was_read_timeout_retry: bool,
    was_write_timeout_retry: bool,
}

impl DefaultRetrySession {
    // a request already written to a node can only move on if it's safe to execute twice
    #[inline]
    fn next_node(is_idempotent: bool) -> RetryDecision {
        if is_idempotent {
            RetryDecision::RetryNextNode
        } else {
            RetryDecision::DontRetry
        }
    }
}

impl RetrySession for DefaultRetrySession {
    fn decide(&mut self, query_info: QueryInfo) -> RetryDecision {
        let is_idempotent = query_info.is_idempotent;
        let kind = match query_info.error.root_cause() {
            Error::Io(_) | Error::General(_) | Error::HeartbeatTimeout(_) => {
                return Self::next_node(is_idempotent);
            }
            Error::Server { kind, .. } => *kind,
            _ => return RetryDecision::DontRetry,
        };

        match kind {
            ServerErrorKind::Overloaded
            | ServerErrorKind::ServerError
            | ServerErrorKind::Truncate
            | ServerErrorKind::IsBootstrapping => Self::next_node(is_idempotent),
            ServerErrorKind::Unavailable => {
                if !self.was_unavailable_retry {
                    self.was_unavailable_retry = true;
                    Self::next_node(is_idempotent)
                } else {
                    RetryDecision::DontRetry
                }
            }
            ServerErrorKind::ReadTimeout => {
                if !self.was_read_timeout_retry {
                    self.was_read_timeout_retry = true;
                    RetryDecision::RetrySameNode
                } else {
                    RetryDecision::DontRetry
                }
            }
            ServerErrorKind::WriteTimeout => {
                if !self.was_write_timeout_retry && is_idempotent {
                    self.was_write_timeout_retry = true;
                    RetryDecision::RetrySameNode
                } else {
                    RetryDecision::DontRetry
                }
            }
            _ => RetryDecision::DontRetry,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use crate::error::{Error, ServerErrorKind};
    use crate::retry::{
        DefaultRetryPolicy, FallthroughRetryPolicy, QueryInfo, RetryDecision, RetryPolicy,
    };

    fn server_error(kind: ServerErrorKind) -> Error {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9042);
        Error::attempt_failed(
            addr,
            Error::Server {
                addr,
                kind,
                message: "".into(),
            },
        )
    }

    fn decide(error: &Error, is_idempotent: bool) -> RetryDecision {
        DefaultRetryPolicy.new_session().decide(QueryInfo {
            error,
            is_idempotent,
        })
    }

    #[test]
    fn should_move_idempotent_requests_on_transport_errors() {
        let error = Error::Io(io::ErrorKind::ConnectionReset.into());

        assert_eq!(decide(&error, true), RetryDecision::RetryNextNode);
        assert_eq!(decide(&error, false), RetryDecision::DontRetry);
    }

    #[test]
    fn should_retry_unavailable_once() {
        let error = server_error(ServerErrorKind::Unavailable);
        let mut session = DefaultRetryPolicy.new_session();

        let query_info = || QueryInfo {
            error: &error,
            is_idempotent: true,
        };

        assert_eq!(session.decide(query_info()), RetryDecision::RetryNextNode);
        assert_eq!(session.decide(query_info()), RetryDecision::DontRetry);
    }

    #[test]
    fn should_not_move_non_idempotent_requests_on_unavailable() {
        let error = server_error(ServerErrorKind::Unavailable);
        assert_eq!(decide(&error, false), RetryDecision::DontRetry);
    }

    #[test]
    fn should_retry_write_timeout_only_when_idempotent() {
        let error = server_error(ServerErrorKind::WriteTimeout);

        assert_eq!(decide(&error, true), RetryDecision::RetrySameNode);
        assert_eq!(decide(&error, false), RetryDecision::DontRetry);
    }

    #[test]
    fn should_move_away_from_bootstrapping_node_only_when_idempotent() {
        let error = server_error(ServerErrorKind::IsBootstrapping);

        assert_eq!(decide(&error, true), RetryDecision::RetryNextNode);
        assert_eq!(decide(&error, false), RetryDecision::DontRetry);
    }

    #[test]
    fn should_not_retry_syntax_errors() {
        let error = server_error(ServerErrorKind::Syntax);
        assert_eq!(decide(&error, true), RetryDecision::DontRetry);
    }

    #[test]
    fn should_never_retry_with_fallthrough() {
        let error = server_error(ServerErrorKind::IsBootstrapping);
        let decision = FallthroughRetryPolicy.new_session().decide(QueryInfo {
            error: &error,
            is_idempotent: true,
        });

        assert_eq!(decision, RetryDecision::DontRetry);
    }
}
