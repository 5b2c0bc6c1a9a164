// ── SNMP client trait and session parameters ──
//
// One `SnmpClient` per device. Sessions are exclusively owned by the
// device's task queue; task runs are serialized per device, so the trait
// requires no internal request pipelining.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SnmpError;
use crate::oid::Oid;
use crate::value::{SnmpValue, VarBind};

pub const DEFAULT_PORT: u16 = 161;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_MAX_REPETITIONS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnmpVersion {
    V1,
    V2c,
}

impl fmt::Display for SnmpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1 => write!(f, "v1"),
            Self::V2c => write!(f, "v2c"),
        }
    }
}

impl FromStr for SnmpVersion {
    type Err = SnmpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "v1" | "1" => Ok(Self::V1),
            "v2c" | "2c" | "2" => Ok(Self::V2c),
            other => Err(SnmpError::Decode(format!("unknown SNMP version '{other}'"))),
        }
    }
}

/// Everything a backend needs to talk to one agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    pub address: IpAddr,
    pub port: u16,
    pub community: String,
    pub version: SnmpVersion,
    pub timeout: Duration,
    pub retries: u32,
    pub max_repetitions: u32,
}

impl SessionParams {
    pub fn new(address: IpAddr, community: impl Into<String>) -> Self {
        Self {
            address,
            port: DEFAULT_PORT,
            community: community.into(),
            version: SnmpVersion::V2c,
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            max_repetitions: DEFAULT_MAX_REPETITIONS,
        }
    }
}

/// Async SNMP request interface implemented by transport backends.
#[async_trait]
pub trait SnmpClient: Send + Sync {
    /// GET a single object instance.
    async fn get(&self, oid: &Oid) -> Result<SnmpValue, SnmpError>;

    /// GET-NEXT: the lexicographically next instance after `oid`.
    ///
    /// Past the end of the MIB view the returned varbind carries
    /// [`SnmpValue::EndOfMibView`].
    async fn get_next(&self, oid: &Oid) -> Result<VarBind, SnmpError>;

    /// GET-BULK: up to `max_repetitions` successors of `oid`.
    async fn get_bulk(&self, oid: &Oid, max_repetitions: u32)
    -> Result<Vec<VarBind>, SnmpError>;
}

/// Walk the subtree rooted at `base`, returning varbinds in tree order.
///
/// Uses GET-BULK and stops at the first varbind that leaves the subtree
/// or reports end-of-MIB.
pub async fn walk(
    client: &dyn SnmpClient,
    base: &Oid,
    max_repetitions: u32,
) -> Result<Vec<VarBind>, SnmpError> {
    let mut results = Vec::new();
    let mut cursor = base.clone();

    loop {
        let chunk = client.get_bulk(&cursor, max_repetitions).await?;
        if chunk.is_empty() {
            break;
        }

        let mut progressed = false;
        for vb in chunk {
            if vb.value == SnmpValue::EndOfMibView || !vb.oid.starts_with(base.as_slice()) {
                return Ok(results);
            }
            // A non-advancing cursor would loop forever on a broken agent.
            if vb.oid <= cursor {
                return Err(SnmpError::Decode(format!(
                    "agent returned non-increasing OID {} while walking {base}",
                    vb.oid
                )));
            }
            cursor = vb.oid.clone();
            progressed = true;
            results.push(vb);
        }
        if !progressed {
            break;
        }
    }

    Ok(results)
}

/// Factory handed to the engine so the backend choice stays in the binary.
pub type ClientFactory = Arc<dyn Fn(SessionParams) -> Arc<dyn SnmpClient> + Send + Sync>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn version_parsing() {
        assert_eq!("v1".parse::<SnmpVersion>().unwrap(), SnmpVersion::V1);
        assert_eq!("v2c".parse::<SnmpVersion>().unwrap(), SnmpVersion::V2c);
        assert!("v3".parse::<SnmpVersion>().is_err());
    }

    #[test]
    fn session_defaults() {
        let params = SessionParams::new("10.0.0.1".parse().unwrap(), "public");
        assert_eq!(params.port, DEFAULT_PORT);
        assert_eq!(params.retries, DEFAULT_RETRIES);
        assert_eq!(params.version, SnmpVersion::V2c);
    }
}
