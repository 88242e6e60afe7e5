use fxhash::FxHashMap;
use serde_json::Value;

use crate::error::{Error, Result};

const CLASS_KEY: &str = "class";
const REPLICATION_FACTOR_KEY: &str = "replication_factor";

/// A replication strategy determines the nodes where replicas are placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationStrategy {
    SimpleStrategy {
        replication_factor: usize,
    },
    NetworkTopologyStrategy {
        datacenter_replication_factor: FxHashMap<String, usize>,
    },
    Other,
}

impl ReplicationStrategy {
    /// Parses the replication map as stored in `system_schema.keyspaces`, e.g.
    /// `{'class': 'org.apache.cassandra.locator.NetworkTopologyStrategy', 'dc1': '3'}`.
    pub fn from_replication_map(
        keyspace: &str,
        replication: &FxHashMap<String, String>,
    ) -> Result<Self> {
        let class = replication
            .get(CLASS_KEY)
            .ok_or_else(|| invalid_format(keyspace))?;

        let options = replication
            .iter()
            .filter(|(key, _)| key.as_str() != CLASS_KEY)
            .map(|(key, value)| (key.as_str(), value.as_str()));

        Self::from_class_and_options(keyspace, class, options)
    }

    /// Parses the pre-3.0 representation: strategy class and JSON-encoded strategy options, as
    /// stored in `system.schema_keyspaces`.
    pub fn from_legacy_options(keyspace: &str, class: &str, strategy_options: &str) -> Result<Self> {
        let options: serde_json::Map<String, Value> =
            serde_json::from_str(strategy_options).map_err(|_| invalid_format(keyspace))?;

        let options = options
            .into_iter()
            .map(|(key, value)| match value {
                Value::String(value) => Ok((key, value)),
                Value::Number(value) => Ok((key, value.to_string())),
                _ => Err(invalid_format(keyspace)),
            })
            .collect::<Result<Vec<_>>>()?;

        Self::from_class_and_options(
            keyspace,
            class,
            options
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str())),
        )
    }

    fn from_class_and_options<'a>(
        keyspace: &str,
        class: &str,
        mut options: impl Iterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self> {
        match class.rsplit('.').next().unwrap_or(class) {
            "SimpleStrategy" => {
                let replication_factor = options
                    .find(|(key, _)| *key == REPLICATION_FACTOR_KEY)
                    .ok_or_else(|| invalid_format(keyspace))
                    .and_then(|(_, value)| parse_replication_factor(keyspace, value))?;

                Ok(ReplicationStrategy::SimpleStrategy { replication_factor })
            }
            "NetworkTopologyStrategy" => {
                let datacenter_replication_factor = options
                    .filter(|(key, _)| *key != REPLICATION_FACTOR_KEY)
                    .map(|(dc, value)| {
                        parse_replication_factor(keyspace, value).map(|factor| (dc.into(), factor))
                    })
                    .collect::<Result<_>>()?;

                Ok(ReplicationStrategy::NetworkTopologyStrategy {
                    datacenter_replication_factor,
                })
            }
            _ => Ok(ReplicationStrategy::Other),
        }
    }
}

// transient replication uses "<all>/<transient>" notation - only the total matters for routing
fn parse_replication_factor(keyspace: &str, value: &str) -> Result<usize> {
    value
        .split('/')
        .next()
        .and_then(|factor| factor.trim().parse().ok())
        .ok_or_else(|| invalid_format(keyspace))
}

#[inline]
fn invalid_format(keyspace: &str) -> Error {
    Error::InvalidReplicationFormat {
        keyspace: keyspace.into(),
    }
}
