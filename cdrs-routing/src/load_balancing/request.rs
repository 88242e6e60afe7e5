use derive_more::Constructor;

use crate::consistency::Consistency;
use crate::token::Murmur3Token;

/// A request to be planned. If the token is not given, it is computed from the routing key, if
/// present.
#[derive(Constructor, Clone, Debug, Default)]
pub struct Request<'a> {
    pub keyspace: Option<&'a str>,
    pub token: Option<Murmur3Token>,
    pub routing_key: Option<&'a [u8]>,
    pub consistency: Option<Consistency>,
}

impl Request<'_> {
    /// Returns the token to route by, if known.
    #[inline]
    pub fn routing_token(&self) -> Option<Murmur3Token> {
        self.token
            .or_else(|| self.routing_key.map(Murmur3Token::generate))
    }
}
