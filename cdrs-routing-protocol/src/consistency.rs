#![warn(missing_docs)]
//! Consistency levels, as far as routing is concerned.
//!
//! The routing core treats a consistency level as an opaque value with a single observable
//! property: whether it is confined to the local datacenter.
use crate::error;
use derive_more::Display;
use std::convert::TryFrom;
use std::str::FromStr;

/// Consistency level requested for a statement.
#[derive(Debug, PartialEq, Clone, Copy, Display, Ord, PartialOrd, Eq, Hash, Default)]
#[non_exhaustive]
pub enum Consistency {
    /// Any node may acknowledge a write, including via hinted handoff.
    Any,
    /// One replica.
    #[default]
    One,
    /// Two replicas.
    Two,
    /// Three replicas.
    Three,
    /// A quorum of replicas across all datacenters.
    Quorum,
    /// Every replica.
    All,
    /// A quorum of replicas in the coordinator's datacenter.
    LocalQuorum,
    /// A quorum of replicas in each datacenter.
    EachQuorum,
    /// Linearizable consistency for lightweight transactions.
    Serial,
    /// Linearizable consistency confined to the local datacenter.
    LocalSerial,
    /// One replica in the local datacenter.
    LocalOne,
}

impl FromStr for Consistency {
    type Err = error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let consistency = match s {
            "Any" | "ANY" => Consistency::Any,
            "One" | "ONE" => Consistency::One,
            "Two" | "TWO" => Consistency::Two,
            "Three" | "THREE" => Consistency::Three,
            "Quorum" | "QUORUM" => Consistency::Quorum,
            "All" | "ALL" => Consistency::All,
            "LocalQuorum" | "LOCAL_QUORUM" => Consistency::LocalQuorum,
            "EachQuorum" | "EACH_QUORUM" => Consistency::EachQuorum,
            "Serial" | "SERIAL" => Consistency::Serial,
            "LocalSerial" | "LOCAL_SERIAL" => Consistency::LocalSerial,
            "LocalOne" | "LOCAL_ONE" => Consistency::LocalOne,
            _ => {
                return Err(error::Error::General(format!(
                    "Invalid consistency provided: {s}"
                )))
            }
        };

        Ok(consistency)
    }
}

impl TryFrom<i16> for Consistency {
    type Error = error::Error;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0x0000 => Ok(Consistency::Any),
            0x0001 => Ok(Consistency::One),
            0x0002 => Ok(Consistency::Two),
            0x0003 => Ok(Consistency::Three),
            0x0004 => Ok(Consistency::Quorum),
            0x0005 => Ok(Consistency::All),
            0x0006 => Ok(Consistency::LocalQuorum),
            0x0007 => Ok(Consistency::EachQuorum),
            0x0008 => Ok(Consistency::Serial),
            0x0009 => Ok(Consistency::LocalSerial),
            0x000A => Ok(Consistency::LocalOne),
            _ => Err(error::Error::UnknownConsistency(value)),
        }
    }
}

impl From<Consistency> for i16 {
    fn from(value: Consistency) -> Self {
        match value {
            Consistency::Any => 0x0000,
            Consistency::One => 0x0001,
            Consistency::Two => 0x0002,
            Consistency::Three => 0x0003,
            Consistency::Quorum => 0x0004,
            Consistency::All => 0x0005,
            Consistency::LocalQuorum => 0x0006,
            Consistency::EachQuorum => 0x0007,
            Consistency::Serial => 0x0008,
            Consistency::LocalSerial => 0x0009,
            Consistency::LocalOne => 0x000A,
        }
    }
}

impl Consistency {
    /// Does this consistency require local dc.
    #[inline]
    pub fn is_dc_local(self) -> bool {
        matches!(
            self,
            Consistency::LocalOne | Consistency::LocalQuorum | Consistency::LocalSerial
        )
    }

    /// Is this one of the serial (lightweight transaction) levels.
    #[inline]
    pub fn is_serial(self) -> bool {
        matches!(self, Consistency::Serial | Consistency::LocalSerial)
    }
}
