// ── SNMP values and varbinds ──

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::oid::Oid;

/// A decoded SNMP value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnmpValue {
    Integer(i64),
    Counter32(u32),
    Counter64(u64),
    Gauge32(u32),
    /// Hundredths of a second.
    TimeTicks(u32),
    OctetString(Vec<u8>),
    Oid(Oid),
    IpAddress(IpAddr),
    Null,
    /// v2c exception: the instance does not exist.
    NoSuchInstance,
    /// v2c exception: the object does not exist.
    NoSuchObject,
    /// v2c exception: the walk ran off the end of the MIB view.
    EndOfMibView,
}

impl SnmpValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Counter32(v) | Self::Gauge32(v) | Self::TimeTicks(v) => Some(i64::from(*v)),
            Self::Counter64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::Integer(v) => u32::try_from(*v).ok(),
            Self::Counter32(v) | Self::Gauge32(v) | Self::TimeTicks(v) => Some(*v),
            Self::Counter64(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Octet-string payload decoded as UTF-8, lossily.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::OctetString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }

    pub fn as_oid(&self) -> Option<&Oid> {
        match self {
            Self::Oid(oid) => Some(oid),
            _ => None,
        }
    }

    pub fn as_ip(&self) -> Option<IpAddr> {
        match self {
            Self::IpAddress(addr) => Some(*addr),
            _ => None,
        }
    }

    /// True for the v2c exception markers that carry no data.
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            Self::NoSuchInstance | Self::NoSuchObject | Self::EndOfMibView
        )
    }
}

impl fmt::Display for SnmpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Counter32(v) | Self::Gauge32(v) | Self::TimeTicks(v) => write!(f, "{v}"),
            Self::Counter64(v) => write!(f, "{v}"),
            Self::OctetString(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
            Self::Oid(oid) => write!(f, "{oid}"),
            Self::IpAddress(addr) => write!(f, "{addr}"),
            Self::Null => write!(f, "null"),
            Self::NoSuchInstance => write!(f, "noSuchInstance"),
            Self::NoSuchObject => write!(f, "noSuchObject"),
            Self::EndOfMibView => write!(f, "endOfMibView"),
        }
    }
}

/// One (OID, value) binding from a response or notification PDU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarBind {
    pub oid: Oid,
    pub value: SnmpValue,
}

impl VarBind {
    pub fn new(oid: Oid, value: SnmpValue) -> Self {
        Self { oid, value }
    }
}
